//! Scripted in-memory runtime for orchestration tests

use super::{ExecOutput, ProcessHandle, ProcessRuntime, ProcessState};
use crate::error::{BosunError, Result};
use crate::network::Network;
use crate::stack::ServiceSpec;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Behavior {
    /// Number of start attempts that fail before one succeeds
    start_failures: u32,
    /// Number of probes that fail before the first success
    probe_failures: u32,
    /// Probes never succeed
    probe_never_healthy: bool,
    /// The process exits with this code right after a successful start
    exit_code: Option<i32>,
}

#[derive(Default)]
struct State {
    behaviors: HashMap<String, Behavior>,
    running: HashSet<String>,
    start_order: Vec<String>,
    stop_order: Vec<String>,
    probe_counts: HashMap<String, u32>,
    next_id: u64,
}

/// Scripted runtime: per-service start failures and probe outcomes are
/// programmed up front, and call order is recorded for assertions.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` start attempts of `service`
    pub fn fail_starts(&self, service: &str, count: u32) {
        let mut state = self.state.lock().unwrap();
        state.behaviors.entry(service.to_string()).or_default().start_failures = count;
    }

    /// Fail the first `count` probes of `service`, then succeed
    pub fn fail_probes(&self, service: &str, count: u32) {
        let mut state = self.state.lock().unwrap();
        state.behaviors.entry(service.to_string()).or_default().probe_failures = count;
    }

    /// Probes of `service` never succeed
    pub fn never_healthy(&self, service: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .behaviors
            .entry(service.to_string())
            .or_default()
            .probe_never_healthy = true;
    }

    /// The process of `service` exits with `code` right after starting
    pub fn exit_after_start(&self, service: &str, code: i32) {
        let mut state = self.state.lock().unwrap();
        state.behaviors.entry(service.to_string()).or_default().exit_code = Some(code);
    }

    /// How many probes `service` has received
    pub fn probe_count(&self, service: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.probe_counts.get(service).copied().unwrap_or(0)
    }

    /// Services in the order their start succeeded
    pub fn start_order(&self) -> Vec<String> {
        self.state.lock().unwrap().start_order.clone()
    }

    /// Services in the order they were stopped
    pub fn stop_order(&self) -> Vec<String> {
        self.state.lock().unwrap().stop_order.clone()
    }

    /// Whether the service is currently running
    pub fn is_running(&self, service: &str) -> bool {
        self.state.lock().unwrap().running.contains(service)
    }
}

#[async_trait]
impl ProcessRuntime for MockRuntime {
    async fn start(&self, spec: &ServiceSpec, network: &Network) -> Result<ProcessHandle> {
        let mut state = self.state.lock().unwrap();

        if let Some(behavior) = state.behaviors.get_mut(&spec.name) {
            if behavior.start_failures > 0 {
                behavior.start_failures -= 1;
                return Err(BosunError::ProcessStartFailure {
                    service: spec.name.clone(),
                    reason: "scripted failure".to_string(),
                });
            }
        }

        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.running.insert(spec.name.clone());
        state.start_order.push(spec.name.clone());
        drop(state);

        network.attach(&spec.name, spec.ports.iter().map(|p| p.host_port).collect());

        Ok(ProcessHandle {
            id,
            service: spec.name.clone(),
            pid: None,
        })
    }

    async fn stop(&self, handle: &ProcessHandle, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.running.remove(&handle.service);
        state.stop_order.push(handle.service.clone());
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ProcessHandle,
        _command: &[String],
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        let mut state = self.state.lock().unwrap();

        let count = state
            .probe_counts
            .entry(handle.service.clone())
            .or_insert(0);
        *count += 1;
        let seen = *count;

        let behavior = state.behaviors.entry(handle.service.clone()).or_default();
        let healthy = !behavior.probe_never_healthy && seen > behavior.probe_failures;

        Ok(ExecOutput {
            stdout: String::new(),
            exit_code: if healthy { 0 } else { 1 },
        })
    }

    async fn status(&self, handle: &ProcessHandle) -> Result<ProcessState> {
        let state = self.state.lock().unwrap();
        if !state.running.contains(&handle.service) {
            return Ok(ProcessState::Unknown);
        }
        if let Some(code) = state
            .behaviors
            .get(&handle.service)
            .and_then(|b| b.exit_code)
        {
            return Ok(ProcessState::Exited(code));
        }
        Ok(ProcessState::Running)
    }
}
