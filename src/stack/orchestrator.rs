//! Stack lifecycle orchestrator
//!
//! Drives up/down/restart over a [`ProcessRuntime`]: resolves the active
//! set and start batches, starts each batch concurrently, gates dependents
//! on dependency health, and contains failures to the dependent subtree.

use super::config::{DependsCondition, ServiceSpec, Stack};
use super::graph::compute_start_order;
use super::profile::select_active;
use crate::error::{BosunError, Result};
use crate::events::EventBus;
use crate::health::{self, HealthStatus};
use crate::network::Network;
use crate::runtime::{ProcessHandle, ProcessRuntime, ProcessState};
use crate::storage::VolumeManager;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Orchestrator tuning. All gate and retry knobs live here rather than as
/// hard-coded constants.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Start attempts per service before it is reported failed
    pub start_retries: u32,
    /// Base backoff between start attempts (grows linearly, with jitter)
    pub start_backoff: Duration,
    /// Grace added on top of the deadline derived from a dependency's
    /// healthcheck (interval x retries + start period)
    pub ready_grace: Duration,
    /// Default stop grace period when a service declares none
    pub stop_grace: Duration,
    /// How often a started service's process is polled for an exit
    pub exit_poll: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            start_retries: 3,
            start_backoff: Duration::from_millis(500),
            ready_grace: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            exit_poll: Duration::from_millis(500),
        }
    }
}

/// Per-service run state, owned by the orchestrator for the duration of an
/// activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Starting,
    Started,
    Healthy,
    Unhealthy,
    Stopped,
    Failed,
    /// A dependency failed or never became healthy; this service was not
    /// started because of it
    Blocked,
    /// An in-flight `up` was cancelled before this service started
    Cancelled,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Starting => "starting",
            RunState::Started => "started",
            RunState::Healthy => "healthy",
            RunState::Unhealthy => "unhealthy",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
            RunState::Blocked => "blocked",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One row of the status table
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: RunState,
    pub reason: Option<String>,
}

/// Overall outcome of an `up`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpOutcome {
    /// Every active service started (and reached health where probed)
    Success,
    /// Some services failed or were blocked; independent subtrees run
    PartialFailure,
    /// The activation was cancelled mid-flight
    Cancelled,
}

/// Result of an `up`: outcome plus the full status table. No failure is
/// silent; blocked and failed services appear here with a reason.
#[derive(Debug, Clone)]
pub struct UpReport {
    pub outcome: UpOutcome,
    pub statuses: Vec<ServiceStatus>,
}

struct Entry {
    state: RunState,
    reason: Option<String>,
    tx: watch::Sender<RunState>,
    handle: Option<ProcessHandle>,
    monitor: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
    exit_watcher: Option<JoinHandle<()>>,
}

impl Entry {
    fn abort_probe_tasks(&mut self) {
        if let Some(task) = self.monitor.take() {
            task.abort();
        }
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }

    fn abort_tasks(&mut self) {
        self.abort_probe_tasks();
        if let Some(task) = self.exit_watcher.take() {
            task.abort();
        }
    }
}

/// Shared run-state table: states, per-service watch channels, event bus
struct RunTable {
    entries: RwLock<HashMap<String, Entry>>,
    events: EventBus,
}

impl RunTable {
    fn new(events: EventBus) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn reset(&self, services: &[ServiceSpec]) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // tasks of the previous activation must not outlive its table
        // entries and write into the new ones
        for entry in entries.values_mut() {
            entry.abort_tasks();
        }
        entries.clear();
        for spec in services {
            let (tx, _) = watch::channel(RunState::Pending);
            entries.insert(
                spec.name.clone(),
                Entry {
                    state: RunState::Pending,
                    reason: None,
                    tx,
                    handle: None,
                    monitor: None,
                    forwarder: None,
                    exit_watcher: None,
                },
            );
        }
    }

    fn set_state(&self, name: &str, new: RunState, reason: Option<String>) {
        let old = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = entries.get_mut(name) else {
                return;
            };
            let old = entry.state;
            entry.state = new;
            entry.reason = reason.clone();
            entry.tx.send_replace(new);
            old
        };
        if old != new {
            tracing::info!(service = %name, from = %old, to = %new, reason = ?reason, "state");
            self.events.emit(name, old, new, reason);
        }
    }

    fn state(&self, name: &str) -> Option<RunState> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).map(|e| e.state)
    }

    fn watch(&self, name: &str) -> Option<watch::Receiver<RunState>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).map(|e| e.tx.subscribe())
    }

    fn set_handle(&self, name: &str, handle: ProcessHandle) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(name) {
            entry.handle = Some(handle);
        }
    }

    fn handle(&self, name: &str) -> Option<ProcessHandle> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).and_then(|e| e.handle.clone())
    }

    fn take_handle(&self, name: &str) -> Option<ProcessHandle> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.get_mut(name).and_then(|e| e.handle.take())
    }

    fn set_tasks(&self, name: &str, monitor: JoinHandle<()>, forwarder: JoinHandle<()>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(name) {
            entry.monitor = Some(monitor);
            entry.forwarder = Some(forwarder);
        }
    }

    fn set_exit_watcher(&self, name: &str, watcher: JoinHandle<()>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(name) {
            entry.exit_watcher = Some(watcher);
        }
    }

    /// Abort the probe tasks only, leaving the exit watcher in place
    fn abort_probe_tasks(&self, name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(name) {
            entry.abort_probe_tasks();
        }
    }

    /// Abort all observation tasks; teardown must deterministically end
    /// probing and exit watching
    fn abort_tasks(&self, name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(name) {
            entry.abort_tasks();
        }
    }

    fn status(&self, name: &str) -> Option<ServiceStatus> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).map(|e| ServiceStatus {
            name: name.to_string(),
            state: e.state,
            reason: e.reason.clone(),
        })
    }
}

enum DepWait {
    Ready,
    Blocked(String),
    Cancelled,
}

enum StartResult {
    Started(ProcessHandle),
    Failed(String),
    Cancelled,
}

/// Whether `state` decides the wait for a dependency with `condition`.
/// `Some(true)` means satisfied, `Some(false)` means the dependency is
/// gone for good, `None` means keep waiting.
fn dep_decided(
    state: RunState,
    condition: DependsCondition,
    dep_has_check: bool,
) -> Option<bool> {
    match condition {
        DependsCondition::Started => match state {
            RunState::Started | RunState::Healthy | RunState::Unhealthy => Some(true),
            RunState::Failed | RunState::Blocked | RunState::Cancelled | RunState::Stopped => {
                Some(false)
            }
            RunState::Pending | RunState::Starting => None,
        },
        DependsCondition::Healthy => match state {
            RunState::Healthy => Some(true),
            // no probe: started is as healthy as it gets
            RunState::Started if !dep_has_check => Some(true),
            RunState::Failed | RunState::Blocked | RunState::Cancelled | RunState::Stopped => {
                Some(false)
            }
            _ => None,
        },
    }
}

/// Stack lifecycle orchestrator
pub struct StackOrchestrator<R: ProcessRuntime> {
    stack: Stack,
    runtime: Arc<R>,
    config: OrchestratorConfig,
    volumes: VolumeManager,
    network: Network,
    table: Arc<RunTable>,
    /// Active services of the current activation, in declaration order
    active: Mutex<Vec<ServiceSpec>>,
    /// Start batches of the current activation
    batches: Mutex<Vec<Vec<String>>>,
    cancel: watch::Sender<bool>,
}

impl<R: ProcessRuntime> StackOrchestrator<R> {
    /// Create an orchestrator for a validated stack
    pub fn new(
        stack: Stack,
        runtime: Arc<R>,
        volumes: VolumeManager,
        config: OrchestratorConfig,
    ) -> Self {
        let network = Network::new(&stack.network);
        let (cancel, _) = watch::channel(false);
        Self {
            stack,
            runtime,
            config,
            volumes,
            network,
            table: Arc::new(RunTable::new(EventBus::default())),
            active: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            cancel,
        }
    }

    /// The stack this orchestrator drives
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Shared network resource
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> EventBus {
        self.table.events.clone()
    }

    /// Cancel an in-flight `up`. Started services are rolled back in
    /// reverse order; services that never started are marked cancelled.
    pub fn cancel_up(&self) {
        let _ = self.cancel.send(true);
    }

    /// Bring the stack up for the requested profiles.
    ///
    /// Validation errors abort before any side effect. Afterwards, batches
    /// start sequentially with every service in a batch starting
    /// concurrently; a dependent with a `healthy` edge waits for the
    /// dependency's run state, bounded by the deadline derived from its
    /// healthcheck. Per-service failures only block the dependent subtree.
    pub async fn up(&self, profiles: &[String]) -> Result<UpReport> {
        let active = select_active(&self.stack.services, profiles);
        let batches = compute_start_order(&active)?;

        tracing::info!(
            stack = %self.stack.name,
            services = active.len(),
            batches = batches.len(),
            "bringing stack up"
        );

        for volume in &self.stack.volumes {
            self.volumes.ensure(volume)?;
        }

        self.cancel.send_replace(false);
        self.table.reset(&active);
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = active.clone();
        *self.batches.lock().unwrap_or_else(|e| e.into_inner()) = batches.clone();

        let specs: Arc<HashMap<String, ServiceSpec>> = Arc::new(
            active
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
        );

        let mut cancelled = false;
        for (i, batch) in batches.iter().enumerate() {
            if *self.cancel.borrow() {
                cancelled = true;
                self.mark_unstarted_cancelled(&batches[i..]);
                break;
            }

            let mut set = JoinSet::new();
            for name in batch {
                let spec = specs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| BosunError::Internal(format!("no spec for '{name}'")))?;
                let table = Arc::clone(&self.table);
                let runtime = Arc::clone(&self.runtime);
                let network = self.network.clone();
                let config = self.config.clone();
                let specs = Arc::clone(&specs);
                let cancel = self.cancel.subscribe();

                set.spawn(async move {
                    run_service_start(spec, table, runtime, network, config, specs, cancel).await
                });
            }

            while let Some(joined) = set.join_next().await {
                joined.map_err(|e| BosunError::Internal(format!("start task panicked: {e}")))?;
            }
        }

        if !cancelled && *self.cancel.borrow() {
            cancelled = true;
            self.mark_unstarted_cancelled(&[]);
        }

        if cancelled {
            self.stop_started_reverse().await;
        }

        let statuses = self.ps();
        let outcome = if cancelled {
            UpOutcome::Cancelled
        } else if statuses
            .iter()
            .any(|s| matches!(s.state, RunState::Failed | RunState::Blocked))
        {
            UpOutcome::PartialFailure
        } else {
            UpOutcome::Success
        };

        Ok(UpReport { outcome, statuses })
    }

    /// Tear the stack down: dependents stop before their dependencies
    /// (reverse start order). Persistent volumes survive unless
    /// `purge_volumes` is set.
    pub async fn down(&self, purge_volumes: bool) -> Result<()> {
        tracing::info!(stack = %self.stack.name, purge = purge_volumes, "stopping stack");

        self.stop_started_reverse().await;

        if purge_volumes {
            let removed = self.volumes.purge(&self.stack.volumes)?;
            for name in removed {
                tracing::info!(volume = %name, "volume purged");
            }
        }
        Ok(())
    }

    /// Restart one service in place. Only its own dependencies are
    /// re-validated: each must currently satisfy its edge condition.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let spec = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| BosunError::ServiceNotFound(name.to_string()))?
        };

        let specs: HashMap<String, ServiceSpec> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.iter().map(|s| (s.name.clone(), s.clone())).collect()
        };

        for dep in &spec.depends_on {
            let state = self
                .table
                .state(&dep.service)
                .ok_or_else(|| BosunError::ServiceNotFound(dep.service.clone()))?;
            let has_check = specs
                .get(&dep.service)
                .map(|s| s.health_check.is_some())
                .unwrap_or(false);
            if dep_decided(state, dep.condition, has_check) != Some(true) {
                return Err(BosunError::DependencyTimeout {
                    service: name.to_string(),
                    dependency: dep.service.clone(),
                });
            }
        }

        self.stop_service(&spec).await;

        self.table.set_state(name, RunState::Starting, None);
        let handle = self
            .runtime
            .start(&spec, &self.network)
            .await
            .map_err(|e| {
                self.table
                    .set_state(name, RunState::Failed, Some(e.to_string()));
                e
            })?;
        self.table.set_handle(name, handle.clone());
        self.table.set_state(name, RunState::Started, None);

        if let Some(check) = spec.health_check.clone() {
            spawn_probe(
                &self.table,
                Arc::clone(&self.runtime),
                spec.name.clone(),
                check,
                handle.clone(),
            );
        }
        let watcher = spawn_exit_watcher(
            &self.table,
            Arc::clone(&self.runtime),
            spec.name.clone(),
            handle,
            self.config.exit_poll,
        );
        self.table.set_exit_watcher(name, watcher);
        Ok(())
    }

    /// Start batches of the current activation
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Process handle of a started service, if it has one
    pub fn handle(&self, name: &str) -> Option<ProcessHandle> {
        self.table.handle(name)
    }

    /// Full status table in declaration order of the active set
    pub fn ps(&self) -> Vec<ServiceStatus> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .iter()
            .filter_map(|s| self.table.status(&s.name))
            .collect()
    }

    fn mark_unstarted_cancelled(&self, remaining: &[Vec<String>]) {
        for batch in remaining {
            for name in batch {
                if self.table.state(name) == Some(RunState::Pending) {
                    self.table
                        .set_state(name, RunState::Cancelled, Some("up cancelled".to_string()));
                }
            }
        }
        // waiters may have marked themselves, anything still pending too
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for spec in active.iter() {
            if self.table.state(&spec.name) == Some(RunState::Pending) {
                self.table.set_state(
                    &spec.name,
                    RunState::Cancelled,
                    Some("up cancelled".to_string()),
                );
            }
        }
    }

    /// Stop everything with a live handle, in reverse batch order
    async fn stop_started_reverse(&self) {
        let batches = {
            let guard = self.batches.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let specs: HashMap<String, ServiceSpec> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.iter().map(|s| (s.name.clone(), s.clone())).collect()
        };

        for batch in batches.iter().rev() {
            for name in batch.iter().rev() {
                if let Some(spec) = specs.get(name) {
                    self.stop_service(spec).await;
                }
            }
        }
    }

    /// Stop one service if it has a live handle: abort probing, signal the
    /// process (grace then force), detach from the network.
    async fn stop_service(&self, spec: &ServiceSpec) {
        self.table.abort_tasks(&spec.name);

        let Some(handle) = self.table.take_handle(&spec.name) else {
            return;
        };
        let grace = spec.stop_grace.unwrap_or(self.config.stop_grace);
        if let Err(e) = self.runtime.stop(&handle, grace).await {
            tracing::warn!(service = %spec.name, error = %e, "teardown failure");
        }
        self.network.detach(&spec.name);
        self.table
            .set_state(&spec.name, RunState::Stopped, None);
    }
}

/// The per-service start task: wait for dependencies, start with bounded
/// retries, then hand the service over to its health monitor.
async fn run_service_start<R: ProcessRuntime>(
    spec: ServiceSpec,
    table: Arc<RunTable>,
    runtime: Arc<R>,
    network: Network,
    config: OrchestratorConfig,
    specs: Arc<HashMap<String, ServiceSpec>>,
    cancel: watch::Receiver<bool>,
) {
    match wait_for_dependencies(&spec, &table, &config, &specs, cancel.clone()).await {
        DepWait::Ready => {}
        DepWait::Blocked(reason) => {
            table.set_state(&spec.name, RunState::Blocked, Some(reason));
            return;
        }
        DepWait::Cancelled => {
            table.set_state(
                &spec.name,
                RunState::Cancelled,
                Some("up cancelled".to_string()),
            );
            return;
        }
    }

    match start_with_retries(&spec, &table, &runtime, &network, &config, cancel).await {
        StartResult::Started(handle) => {
            table.set_handle(&spec.name, handle.clone());
            table.set_state(&spec.name, RunState::Started, None);
            if let Some(check) = spec.health_check.clone() {
                spawn_probe(
                    &table,
                    Arc::clone(&runtime),
                    spec.name.clone(),
                    check,
                    handle.clone(),
                );
            }
            let watcher =
                spawn_exit_watcher(&table, runtime, spec.name.clone(), handle, config.exit_poll);
            table.set_exit_watcher(&spec.name, watcher);
        }
        StartResult::Failed(reason) => {
            table.set_state(&spec.name, RunState::Failed, Some(reason));
        }
        StartResult::Cancelled => {
            table.set_state(
                &spec.name,
                RunState::Cancelled,
                Some("up cancelled".to_string()),
            );
        }
    }
}

async fn wait_for_dependencies(
    spec: &ServiceSpec,
    table: &RunTable,
    config: &OrchestratorConfig,
    specs: &HashMap<String, ServiceSpec>,
    mut cancel: watch::Receiver<bool>,
) -> DepWait {
    for dep in &spec.depends_on {
        let Some(dep_spec) = specs.get(&dep.service) else {
            return DepWait::Blocked(format!("unknown dependency '{}'", dep.service));
        };
        let has_check = dep_spec.health_check.is_some();

        // Deadline derived from the dependency's own probe schedule; a
        // service with no probe can only gate on process start, which its
        // batch already finished.
        let deadline = match (&dep.condition, dep_spec.health_check.as_ref()) {
            (DependsCondition::Healthy, Some(check)) => check.gate_deadline(config.ready_grace),
            _ => config.ready_grace,
        };

        let Some(mut rx) = table.watch(&dep.service) else {
            return DepWait::Blocked(format!("dependency '{}' not tracked", dep.service));
        };

        let condition = dep.condition;
        let wait = rx.wait_for(move |s| dep_decided(*s, condition, has_check).is_some());

        tokio::select! {
            outcome = tokio::time::timeout(deadline, wait) => match outcome {
                Ok(Ok(state)) => {
                    let decided = dep_decided(*state, dep.condition, has_check);
                    if decided != Some(true) {
                        return DepWait::Blocked(format!(
                            "dependency '{}' is {}",
                            dep.service, *state
                        ));
                    }
                }
                Ok(Err(_)) => {
                    return DepWait::Blocked(format!(
                        "dependency '{}' no longer tracked",
                        dep.service
                    ));
                }
                Err(_) => {
                    let err = BosunError::DependencyTimeout {
                        service: spec.name.clone(),
                        dependency: dep.service.clone(),
                    };
                    return DepWait::Blocked(err.to_string());
                }
            },
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return DepWait::Cancelled;
                }
            }
        }
    }
    DepWait::Ready
}

async fn start_with_retries<R: ProcessRuntime>(
    spec: &ServiceSpec,
    table: &RunTable,
    runtime: &Arc<R>,
    network: &Network,
    config: &OrchestratorConfig,
    cancel: watch::Receiver<bool>,
) -> StartResult {
    table.set_state(&spec.name, RunState::Starting, None);

    let attempts = config.start_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if *cancel.borrow() {
            return StartResult::Cancelled;
        }

        match runtime.start(spec, network).await {
            Ok(handle) => return StartResult::Started(handle),
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    service = %spec.name,
                    attempt,
                    error = %last_error,
                    "start attempt failed"
                );
                if attempt < attempts {
                    let backoff = config.start_backoff * attempt;
                    let jitter = {
                        let mut rng = rand::thread_rng();
                        let quarter = (backoff.as_millis() as u64 / 4).max(1);
                        Duration::from_millis(rng.gen_range(0..quarter))
                    };
                    tokio::time::sleep(backoff + jitter).await;
                }
            }
        }
    }

    StartResult::Failed(last_error)
}

/// Wire a started service to its probe: the monitor publishes health on a
/// watch channel and the forwarder folds it into the run-state table.
fn spawn_probe<R: ProcessRuntime>(
    table: &Arc<RunTable>,
    runtime: Arc<R>,
    service: String,
    check: super::config::HealthCheck,
    handle: ProcessHandle,
) {
    let (tx, mut rx) = watch::channel(HealthStatus::Unknown);
    let monitor = health::spawn_monitor(service.clone(), check, handle, runtime, tx);

    let fwd_table = Arc::clone(table);
    let fwd_service = service.clone();
    let forwarder = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = *rx.borrow_and_update();
            match status {
                HealthStatus::Healthy => {
                    fwd_table.set_state(&fwd_service, RunState::Healthy, None);
                }
                HealthStatus::Unhealthy => {
                    fwd_table.set_state(
                        &fwd_service,
                        RunState::Unhealthy,
                        Some("health probe failing".to_string()),
                    );
                }
                HealthStatus::Unknown => {}
            }
        }
    });

    table.set_tasks(&service, monitor, forwarder);
}

/// Watch a started service for a process exit. An exit in steady state is
/// unrecoverable: probing stops and the service is marked failed with the
/// exit code as the reason.
fn spawn_exit_watcher<R: ProcessRuntime>(
    table: &Arc<RunTable>,
    runtime: Arc<R>,
    service: String,
    handle: ProcessHandle,
    poll: Duration,
) -> JoinHandle<()> {
    let table = Arc::clone(table);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match runtime.status(&handle).await {
                Ok(ProcessState::Running) => {}
                Ok(ProcessState::Exited(code)) => {
                    table.abort_probe_tasks(&service);
                    table.set_state(
                        &service,
                        RunState::Failed,
                        Some(format!("process exited with code {code}")),
                    );
                    break;
                }
                // the runtime no longer tracks the handle; whatever stopped
                // it already updated the table
                Ok(ProcessState::Unknown) | Err(_) => break,
            }
        }
    })
}
