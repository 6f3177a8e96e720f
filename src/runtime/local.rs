//! Local process runtime
//!
//! Runs services as plain host processes under tokio. No isolation is
//! attempted: ports, volumes and the network attachment are bookkeeping the
//! service command is expected to honor. Stdout and stderr go to one log
//! file per service under the runtime's log directory.

use super::{ExecOutput, ProcessHandle, ProcessRuntime, ProcessState};
use crate::error::{BosunError, Result};
use crate::network::Network;
use crate::stack::ServiceSpec;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Local process runtime
pub struct LocalRuntime {
    /// Started processes by handle ID
    processes: Arc<Mutex<HashMap<String, Arc<Mutex<Child>>>>>,
    /// Directory for per-service log files
    log_dir: PathBuf,
}

impl LocalRuntime {
    /// Create a runtime writing logs under `log_dir`
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            log_dir,
        })
    }

    /// Path of a service's log file
    pub fn log_path(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", service))
    }

    async fn child(&self, handle: &ProcessHandle) -> Option<Arc<Mutex<Child>>> {
        let processes = self.processes.lock().await;
        processes.get(&handle.id).cloned()
    }
}

#[async_trait]
impl ProcessRuntime for LocalRuntime {
    async fn start(&self, spec: &ServiceSpec, network: &Network) -> Result<ProcessHandle> {
        let program = spec.command.first().ok_or_else(|| {
            BosunError::ProcessStartFailure {
                service: spec.name.clone(),
                reason: "empty command".to_string(),
            }
        })?;

        let log_file = std::fs::File::create(self.log_path(&spec.name))?;
        let log_err = log_file.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(&spec.command[1..])
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err));
        if let Some(ref dir) = spec.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| BosunError::ProcessStartFailure {
                service: spec.name.clone(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        let handle = ProcessHandle {
            id: Uuid::new_v4().to_string().replace('-', "")[..12].to_string(),
            service: spec.name.clone(),
            pid,
        };

        network.attach(
            &spec.name,
            spec.ports.iter().map(|p| p.host_port).collect(),
        );

        let mut processes = self.processes.lock().await;
        processes.insert(handle.id.clone(), Arc::new(Mutex::new(child)));

        tracing::debug!(service = %spec.name, pid = ?pid, "process started");
        Ok(handle)
    }

    async fn stop(&self, handle: &ProcessHandle, grace: Duration) -> Result<()> {
        let Some(entry) = self.child(handle).await else {
            return Err(BosunError::ServiceNotRunning(handle.service.clone()));
        };

        let mut child = entry.lock().await;

        if let Some(pid) = child.id() {
            // SIGTERM first; SIGKILL only if the grace period runs out
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    tracing::warn!(
                        service = %handle.service,
                        "did not exit within grace period, killing"
                    );
                    child.kill().await?;
                }
            }
        }

        drop(child);
        let mut processes = self.processes.lock().await;
        processes.remove(&handle.id);
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ProcessHandle,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let program = command.first().ok_or_else(|| {
            BosunError::Probe(format!("empty exec command for '{}'", handle.service))
        })?;

        // Probes run from the host against the service's published surface.
        let future = Command::new(program)
            .args(&command[1..])
            .stdin(Stdio::null())
            .output();

        let output = tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| BosunError::Timeout(format!("exec in '{}'", handle.service)))??;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn status(&self, handle: &ProcessHandle) -> Result<ProcessState> {
        let Some(entry) = self.child(handle).await else {
            return Ok(ProcessState::Unknown);
        };

        let mut child = entry.lock().await;
        match child.try_wait()? {
            None => Ok(ProcessState::Running),
            Some(status) => Ok(ProcessState::Exited(status.code().unwrap_or(-1))),
        }
    }
}
