//! Health probing
//!
//! Each service with a declared healthcheck gets one periodic probe task,
//! decoupled from the start sequence: health can flap after startup without
//! re-entering the start protocol. The task publishes transitions on a
//! watch channel and stops when the orchestrator drops the receiver or
//! aborts the task on service stop.

use crate::runtime::{ProcessHandle, ProcessRuntime};
use crate::stack::HealthCheck;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default probe interval
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
/// Default per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Default consecutive failures before unhealthy
pub const DEFAULT_PROBE_RETRIES: u32 = 3;

/// Probed health of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No definitive probe result yet
    Unknown,
    /// Last probe (or a probe since the last failure streak) succeeded
    Healthy,
    /// `retries` consecutive probes failed
    Unhealthy,
}

/// Consecutive-failure accounting for one service
///
/// One success makes the service healthy; it takes `retries` consecutive
/// failures to make it unhealthy. Failures below the threshold keep the
/// previous status (a flap, recovered locally).
#[derive(Debug)]
pub struct ProbeTracker {
    retries: u32,
    consecutive_failures: u32,
    status: HealthStatus,
}

impl ProbeTracker {
    pub fn new(retries: u32) -> Self {
        Self {
            retries: retries.max(1),
            consecutive_failures: 0,
            status: HealthStatus::Unknown,
        }
    }

    /// Current status
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Record a successful probe
    pub fn record_success(&mut self) -> HealthStatus {
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.status
    }

    /// Record a failed probe
    pub fn record_failure(&mut self) -> HealthStatus {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.retries {
            self.status = HealthStatus::Unhealthy;
        }
        self.status
    }
}

/// Spawn the periodic probe task for one service.
///
/// The caller keeps the [`JoinHandle`] and aborts it when the service
/// stops, so probing deterministically ends with the service lifetime.
pub fn spawn_monitor<R: ProcessRuntime>(
    service: String,
    check: HealthCheck,
    handle: ProcessHandle,
    runtime: Arc<R>,
    tx: watch::Sender<HealthStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !check.start_period.is_zero() {
            tokio::time::sleep(check.start_period).await;
        }

        let mut tracker = ProbeTracker::new(check.retries);
        let mut interval = tokio::time::interval(check.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let ok = match runtime.exec(&handle, &check.test, check.timeout).await {
                Ok(output) => output.success(),
                Err(e) => {
                    tracing::debug!(service = %service, error = %e, "probe error");
                    false
                }
            };

            let before = tracker.status();
            let after = if ok {
                tracker.record_success()
            } else {
                tracker.record_failure()
            };

            if after != before {
                tracing::info!(service = %service, from = ?before, to = ?after, "health changed");
                if tx.send(after).is_err() {
                    break; // orchestrator is gone
                }
            } else if !ok && before == HealthStatus::Healthy {
                tracing::debug!(service = %service, "probe failed (flap, below retry threshold)");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::runtime::mock::MockRuntime;
    use crate::stack::config::ServiceSpec;

    #[test]
    fn test_tracker_one_success_is_healthy() {
        let mut tracker = ProbeTracker::new(3);
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert_eq!(tracker.record_success(), HealthStatus::Healthy);
    }

    #[test]
    fn test_tracker_needs_consecutive_failures() {
        let mut tracker = ProbeTracker::new(3);
        tracker.record_success();

        // two flaps stay healthy
        assert_eq!(tracker.record_failure(), HealthStatus::Healthy);
        assert_eq!(tracker.record_failure(), HealthStatus::Healthy);
        // a success resets the streak
        assert_eq!(tracker.record_success(), HealthStatus::Healthy);
        assert_eq!(tracker.record_failure(), HealthStatus::Healthy);
        assert_eq!(tracker.record_failure(), HealthStatus::Healthy);
        assert_eq!(tracker.record_failure(), HealthStatus::Unhealthy);
        // recovery
        assert_eq!(tracker.record_success(), HealthStatus::Healthy);
    }

    #[test]
    fn test_tracker_unknown_until_definitive() {
        let mut tracker = ProbeTracker::new(3);
        assert_eq!(tracker.record_failure(), HealthStatus::Unknown);
        assert_eq!(tracker.record_failure(), HealthStatus::Unknown);
        assert_eq!(tracker.record_failure(), HealthStatus::Unhealthy);
    }

    fn probed_service(name: &str, retries: u32) -> (ServiceSpec, HealthCheck) {
        let check = HealthCheck {
            test: vec!["probe".to_string()],
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
            retries,
            start_period: Duration::ZERO,
        };
        let spec = ServiceSpec {
            name: name.to_string(),
            profile: None,
            image: None,
            command: vec!["svc".to_string()],
            working_dir: None,
            environment: Default::default(),
            ports: Vec::new(),
            volumes: Vec::new(),
            depends_on: Vec::new(),
            health_check: Some(check.clone()),
            stop_grace: None,
        };
        (spec, check)
    }

    #[tokio::test]
    async fn test_monitor_reports_unhealthy_then_recovers() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_probes("db", 2);

        let network = Network::new("t");
        let (spec, check) = probed_service("db", 2);
        let handle = runtime.start(&spec, &network).await.unwrap();

        let (tx, mut rx) = watch::channel(HealthStatus::Unknown);
        let task = spawn_monitor("db".to_string(), check, handle, runtime.clone(), tx);

        // two scripted failures with retries=2 -> unhealthy first
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == HealthStatus::Unhealthy))
            .await
            .expect("timed out waiting for unhealthy")
            .unwrap();

        // third probe onward succeeds -> healthy
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == HealthStatus::Healthy))
            .await
            .expect("timed out waiting for healthy")
            .unwrap();

        task.abort();
    }

    #[tokio::test]
    async fn test_monitor_stops_when_receiver_dropped() {
        let runtime = Arc::new(MockRuntime::new());
        let network = Network::new("t");
        let (spec, check) = probed_service("db", 1);
        let handle = runtime.start(&spec, &network).await.unwrap();

        let (tx, rx) = watch::channel(HealthStatus::Unknown);
        let task = spawn_monitor("db".to_string(), check, handle, runtime.clone(), tx);

        drop(rx);
        // first transition attempt finds the channel closed and the task ends
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
