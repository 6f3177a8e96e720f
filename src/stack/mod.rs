//! Stack definition, validation and lifecycle orchestration

pub mod config;
pub mod graph;
pub mod orchestrator;
pub mod parser;
pub mod profile;

pub use config::{
    DependsCondition, Dependency, HealthCheck, PortBinding, ServiceSpec, Stack, VolumeBinding,
    VolumeKind,
};
pub use graph::compute_start_order;
pub use orchestrator::{
    OrchestratorConfig, RunState, ServiceStatus, StackOrchestrator, UpOutcome, UpReport,
};
pub use parser::StackParser;
pub use profile::select_active;
