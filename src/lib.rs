//! Bosun - a local multi-service stack supervisor
//!
//! Bosun brings a declarative stack of services up and down in dependency
//! order. It provides:
//!
//! - Stack files with profiles, ports, volumes and health checks
//! - Dependency-ordered parallel startup with health gating
//! - Periodic health probing with consecutive-failure accounting
//! - Reverse-order teardown with optional volume purge
//! - A lifecycle event stream over every run-state transition

pub mod error;
pub mod events;
pub mod health;
pub mod network;
pub mod runtime;
pub mod stack;
pub mod storage;

pub use error::{BosunError, Result};
