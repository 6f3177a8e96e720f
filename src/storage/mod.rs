//! Persistent storage for stack volumes

pub mod volume;

pub use volume::{Volume, VolumeManager};
