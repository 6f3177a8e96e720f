//! Error types for bosun

use thiserror::Error;

/// Result type for bosun operations
pub type Result<T> = std::result::Result<T, BosunError>;

/// Bosun error types
#[derive(Error, Debug)]
pub enum BosunError {
    #[error("Service error: {0}")]
    Service(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already running: {0}")]
    ServiceAlreadyRunning(String),

    #[error("Service not running: {0}")]
    ServiceNotRunning(String),

    #[error("Dependency cycle detected among services: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Host port {port} is bound by both '{first}' and '{second}'")]
    PortCollision {
        port: u16,
        first: String,
        second: String,
    },

    #[error("Dependency '{dependency}' of '{service}' did not become healthy in time")]
    DependencyTimeout { service: String, dependency: String },

    #[error("Service '{service}' failed to start: {reason}")]
    ProcessStartFailure { service: String, reason: String },

    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Volume error: {0}")]
    Volume(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stack file parse error: {0}")]
    StackParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BosunError {
    /// Whether this error was caught by static validation, before any
    /// process was started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BosunError::CycleDetected(_)
                | BosunError::UnknownDependency { .. }
                | BosunError::PortCollision { .. }
                | BosunError::StackParse(_)
                | BosunError::InvalidConfig(_)
        )
    }
}
