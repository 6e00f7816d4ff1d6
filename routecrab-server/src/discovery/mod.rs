//! Backend discovery
//!
//! A [`Discovery`] source answers which backends advertise a capability. The
//! [`Poller`] asks it for every backend serving route manifests, fetches each
//! manifest and merges the routes into the registry. The addresses it learns
//! land in a [`BackendDirectory`] the dispatcher resolves backend names
//! against.

mod poller;

pub use poller::{CycleReport, MANIFEST_CAPABILITY, Poller, PollerConfig};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A discovered backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef {
    /// Logical name routes are bound to
    pub name: String,
    /// `host:port` of the backend's RPC listener
    pub address: String,
}

impl BackendRef {
    pub fn new(name: &str, address: &str) -> Self {
        BackendRef {
            name: name.to_string(),
            address: address.to_string(),
        }
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.address)
    }
}

/// Parses `name=host:port`
impl FromStr for BackendRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=host:port, got {s:?}"))?;
        let (name, address) = (name.trim(), address.trim());

        if name.is_empty() {
            return Err(format!("missing backend name in {s:?}"));
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return Err(format!("invalid backend address {address:?}")),
        }

        Ok(BackendRef::new(name, address))
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Source of backends
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Backends advertising `capability`
    async fn discover(&self, capability: &str) -> Result<Vec<BackendRef>, DiscoveryError>;
}

/// Fixed set of backends from configuration
///
/// Every configured backend is assumed to serve every capability.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    backends: Vec<BackendRef>,
}

impl StaticDiscovery {
    pub fn new(backends: Vec<BackendRef>) -> Self {
        StaticDiscovery { backends }
    }

    /// Parse `name=host:port` entries
    pub fn parse<I, S>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let backends = entries
            .into_iter()
            .map(|entry| entry.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(backends))
    }

    pub fn backends(&self) -> &[BackendRef] {
        &self.backends
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _capability: &str) -> Result<Vec<BackendRef>, DiscoveryError> {
        Ok(self.backends.clone())
    }
}

/// Latest known address of every backend by name
#[derive(Debug, Default)]
pub struct BackendDirectory {
    addresses: RwLock<HashMap<String, BackendRef>>,
}

impl BackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `backends`; known names keep their entry unless the address moved
    pub fn update(&self, backends: &[BackendRef]) {
        let mut addresses = self.addresses.write();
        for backend in backends {
            let previous = addresses.insert(backend.name.clone(), backend.clone());
            if let Some(previous) = previous.filter(|p| p.address != backend.address) {
                tracing::info!(
                    backend = %backend.name,
                    from = %previous.address,
                    to = %backend.address,
                    "Backend address changed"
                );
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Option<BackendRef> {
        self.addresses.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.addresses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_ref() {
        let backend: BackendRef = "billing=127.0.0.1:9000".parse().unwrap();
        assert_eq!(backend, BackendRef::new("billing", "127.0.0.1:9000"));
        assert_eq!(backend.to_string(), "billing=127.0.0.1:9000");

        let backend: BackendRef = " users = users.internal:7000 ".parse().unwrap();
        assert_eq!(backend.address, "users.internal:7000");

        assert!("billing".parse::<BackendRef>().is_err());
        assert!("=127.0.0.1:9000".parse::<BackendRef>().is_err());
        assert!("billing=127.0.0.1".parse::<BackendRef>().is_err());
        assert!("billing=127.0.0.1:http".parse::<BackendRef>().is_err());
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::parse(["a=127.0.0.1:1", "b=127.0.0.1:2"]).unwrap();
        let found = discovery.discover(MANIFEST_CAPABILITY).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].name, "b");

        assert!(StaticDiscovery::parse(["nope"]).is_err());
    }

    #[test]
    fn test_directory_tracks_latest_address() {
        let directory = BackendDirectory::new();
        assert!(directory.resolve("a").is_none());

        directory.update(&[BackendRef::new("a", "127.0.0.1:1")]);
        directory.update(&[BackendRef::new("a", "127.0.0.1:2")]);

        assert_eq!(directory.len(), 1);
        assert_eq!(directory.resolve("a").unwrap().address, "127.0.0.1:2");
    }
}
