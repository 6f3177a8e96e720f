//! Process runtime boundary
//!
//! The orchestrator only needs start/stop/exec/status from whatever engine
//! actually runs services. [`LocalRuntime`] runs plain host processes; tests
//! use the scripted mock. A container engine would implement the same trait.

pub mod local;
#[cfg(test)]
pub mod mock;

use crate::error::Result;
use crate::network::Network;
use crate::stack::ServiceSpec;
use async_trait::async_trait;
use std::time::Duration;

pub use local::LocalRuntime;

/// Opaque handle to a started service process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// Runtime-assigned ID
    pub id: String,
    /// Service name
    pub service: String,
    /// OS process ID, when the runtime has one
    pub pid: Option<u32>,
}

/// Output of an exec'd command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Exit code zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Coarse process state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is running
    Running,
    /// Process exited with the given code
    Exited(i32),
    /// Runtime cannot tell (e.g. handle no longer tracked)
    Unknown,
}

/// External process/container engine seam
#[async_trait]
pub trait ProcessRuntime: Send + Sync + 'static {
    /// Start the service and attach it to the shared network
    async fn start(&self, spec: &ServiceSpec, network: &Network) -> Result<ProcessHandle>;

    /// Stop the process: graceful within `grace`, forced afterwards
    async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> Result<()>;

    /// Run a command in the service's context, bounded by `timeout`
    async fn exec(
        &self,
        handle: &ProcessHandle,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Current process state
    async fn status(&self, handle: &ProcessHandle) -> Result<ProcessState>;
}
