//! Profile filtering
//!
//! A service with no profile tag is always active; a tagged service is
//! active only when its tag was requested. Pure and order-preserving.

use super::config::ServiceSpec;

/// Select the active subset of services for the requested profiles,
/// preserving declaration order.
pub fn select_active(services: &[ServiceSpec], profiles: &[String]) -> Vec<ServiceSpec> {
    services
        .iter()
        .filter(|s| match &s.profile {
            None => true,
            Some(tag) => profiles.iter().any(|p| p == tag),
        })
        .cloned()
        .collect()
}
