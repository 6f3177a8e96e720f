//! Stack file configuration types
//!
//! The raw types mirror the YAML stack file (with compose-style short and
//! long syntax where both exist). `resolve` in the parser module turns them
//! into the validated [`Stack`] / [`ServiceSpec`] model consumed by the
//! orchestrator.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Raw stack file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFile {
    /// Stack name (defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Stack-wide environment defaults, overridden per service
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    /// Services, in declaration order
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
    /// Named persistent volumes
    #[serde(default)]
    pub volumes: IndexMap<String, VolumeConfig>,
    /// Shared network name (defaults to "<stack>_default")
    #[serde(default)]
    pub network: Option<String>,
}

/// Raw service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name (informational for the local runtime)
    #[serde(default)]
    pub image: Option<String>,
    /// Command to run
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Working directory
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Environment variables
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default)]
    pub ports: Option<Vec<PortConfig>>,
    /// Volume mounts
    #[serde(default)]
    pub volumes: Option<Vec<VolumeMountConfig>>,
    /// Service dependencies
    #[serde(default)]
    pub depends_on: Option<DependsOnConfig>,
    /// Healthcheck configuration
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Profile tag; untagged services are always active
    #[serde(default)]
    pub profile: Option<String>,
    /// Stop grace period (e.g. "10s")
    #[serde(default)]
    pub stop_grace_period: Option<String>,
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandConfig {
    /// Normalize to argv form; shell strings run under `/bin/sh -c`.
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            CommandConfig::Shell(s) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), s.clone()]
            }
            CommandConfig::Exec(arr) => arr.clone(),
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(IndexMap<String, Option<String>>),
}

impl EnvironmentConfig {
    /// Flatten into a plain map; array entries without '=' are dropped,
    /// map entries with a null value are dropped.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        match self {
            EnvironmentConfig::Array(arr) => {
                for item in arr {
                    if let Some((key, value)) = item.split_once('=') {
                        out.insert(key.to_string(), value.to_string());
                    }
                }
            }
            EnvironmentConfig::Map(map) => {
                for (key, value) in map {
                    if let Some(v) = value {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
        }
        out
    }
}

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Short syntax: "8080:80" or "8080:80/udp"
    Short(String),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port inside the service
    pub target: u16,
    /// Published port on the host
    pub published: Option<u16>,
    /// Protocol (tcp/udp)
    pub protocol: Option<String>,
}

/// Volume mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMountConfig {
    /// Short syntax: "source:target" or "source:target:ro"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type ("volume" or "bind")
    #[serde(rename = "type")]
    pub mount_type: Option<String>,
    /// Source path or volume name
    pub source: String,
    /// Target path inside the service
    pub target: String,
    /// Read only
    pub read_only: Option<bool>,
}

/// Depends on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names (condition defaults to started)
    Array(Vec<String>),
    /// Map of service to condition
    Map(IndexMap<String, DependsOnEntry>),
}

/// Depends on map entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnEntry {
    /// Condition to wait for ("service_started" or "service_healthy")
    pub condition: String,
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Test command
    pub test: Option<CommandConfig>,
    /// Interval between probes
    pub interval: Option<String>,
    /// Probe timeout
    pub timeout: Option<String>,
    /// Consecutive failures before unhealthy
    pub retries: Option<u32>,
    /// Grace period before failures count
    pub start_period: Option<String>,
    /// Disable the healthcheck entirely
    pub disable: Option<bool>,
}

/// Named volume configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Explicit volume name (defaults to "<stack>_<key>")
    pub name: Option<String>,
    /// Volume labels
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Resolved model

/// Dependency gating condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependsCondition {
    /// Dependency process must have started
    Started,
    /// Dependency must report healthy
    Healthy,
}

/// One edge of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name of the service depended on
    pub service: String,
    /// Required condition
    pub condition: DependsCondition,
}

/// Network protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Resolved port binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

/// Kind of volume binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Named volume; persists across teardown unless purged
    Named,
    /// Bind mirror of a source tree; ephemeral by nature
    Bind,
}

/// Resolved volume binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    /// Volume name or host path
    pub source: String,
    /// Target path inside the service
    pub target: String,
    /// Binding kind
    pub kind: VolumeKind,
    /// Read only
    pub read_only: bool,
}

/// Resolved healthcheck definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Probe command (argv form)
    pub test: Vec<String>,
    /// Interval between probes
    pub interval: Duration,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Consecutive failures before unhealthy
    pub retries: u32,
    /// Grace period before failures count
    pub start_period: Duration,
}

impl HealthCheck {
    /// Upper bound a dependent will wait for this service to report
    /// healthy: worst case every probe slot fails until the last.
    pub fn gate_deadline(&self, grace: Duration) -> Duration {
        self.interval * self.retries.max(1) + self.start_period + grace
    }
}

/// Resolved service descriptor; never mutated during a run
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique name within the stack
    pub name: String,
    /// Profile tag; None means always active
    pub profile: Option<String>,
    /// Image name, if declared
    pub image: Option<String>,
    /// Command argv
    pub command: Vec<String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Effective environment (stack defaults merged under service values)
    pub environment: HashMap<String, String>,
    /// Port bindings
    pub ports: Vec<PortBinding>,
    /// Volume bindings
    pub volumes: Vec<VolumeBinding>,
    /// Dependency edges
    pub depends_on: Vec<Dependency>,
    /// Readiness probe, if declared
    pub health_check: Option<HealthCheck>,
    /// Stop grace period override
    pub stop_grace: Option<Duration>,
}

impl ServiceSpec {
    /// Dependencies that gate on health
    pub fn healthy_deps(&self) -> impl Iterator<Item = &Dependency> {
        self.depends_on
            .iter()
            .filter(|d| d.condition == DependsCondition::Healthy)
    }
}

/// A full stack: services in declaration order, named persistent volumes,
/// and the single shared network
#[derive(Debug, Clone)]
pub struct Stack {
    /// Stack name
    pub name: String,
    /// Services in declaration order
    pub services: Vec<ServiceSpec>,
    /// Named persistent volume names
    pub volumes: Vec<String>,
    /// Shared network name
    pub network: String,
}

impl Stack {
    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Merge layered environment maps. `overrides` wins over `base`; neither
/// input is modified. Override order is documented here once: stack-wide
/// defaults form the base, service-level values are the overrides.
pub fn merge_env(
    base: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Parse a human duration like "500ms", "10s", "1m" or "1h".
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> crate::error::Result<Duration> {
    let s = input.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().map_err(|_| {
        crate::error::BosunError::InvalidConfig(format!("invalid duration: {input}"))
    })?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(crate::error::BosunError::InvalidConfig(format!(
            "invalid duration unit in: {input}"
        ))),
    }
}
