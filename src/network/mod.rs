//! Shared stack network
//!
//! One network namespace is shared by every service in a stack so services
//! can address each other by name. It is modelled as an explicit resource
//! handed to every start call rather than ambient global state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Shared network namespace for a stack
#[derive(Debug, Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

#[derive(Debug)]
struct NetworkInner {
    /// Network ID
    id: String,
    /// Network name
    name: String,
    /// Service name -> endpoint
    endpoints: RwLock<HashMap<String, Endpoint>>,
    /// Created timestamp
    created: DateTime<Utc>,
}

/// One service's attachment to the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Service name, which doubles as the address alias
    pub service: String,
    /// Host ports published by the service
    pub published_ports: Vec<u16>,
}

impl Network {
    /// Create a new, empty network
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                id: Uuid::new_v4().to_string().replace('-', "")[..12].to_string(),
                name: name.to_string(),
                endpoints: RwLock::new(HashMap::new()),
                created: Utc::now(),
            }),
        }
    }

    /// Network ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Creation time
    pub fn created(&self) -> DateTime<Utc> {
        self.inner.created
    }

    /// Attach a service. Called by the runtime on start.
    pub fn attach(&self, service: &str, published_ports: Vec<u16>) {
        let mut endpoints = self.inner.endpoints.write().unwrap_or_else(|e| e.into_inner());
        endpoints.insert(
            service.to_string(),
            Endpoint {
                service: service.to_string(),
                published_ports,
            },
        );
    }

    /// Detach a service on stop.
    pub fn detach(&self, service: &str) {
        let mut endpoints = self.inner.endpoints.write().unwrap_or_else(|e| e.into_inner());
        endpoints.remove(service);
    }

    /// Resolve a service name to its endpoint, if attached
    pub fn resolve(&self, service: &str) -> Option<Endpoint> {
        let endpoints = self.inner.endpoints.read().unwrap_or_else(|e| e.into_inner());
        endpoints.get(service).cloned()
    }

    /// Names of currently attached services
    pub fn attached(&self) -> Vec<String> {
        let endpoints = self.inner.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = endpoints.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_resolve_detach() {
        let network = Network::new("shop_default");
        assert_eq!(network.name(), "shop_default");
        assert!(network.resolve("db").is_none());

        network.attach("db", vec![5432]);
        let endpoint = network.resolve("db").unwrap();
        assert_eq!(endpoint.published_ports, vec![5432]);

        network.detach("db");
        assert!(network.resolve("db").is_none());
    }

    #[test]
    fn test_shared_across_clones() {
        let network = Network::new("shop_default");
        let clone = network.clone();

        network.attach("cache", vec![]);
        assert!(clone.resolve("cache").is_some());
        assert_eq!(clone.attached(), vec!["cache".to_string()]);
    }
}
