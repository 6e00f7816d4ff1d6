//! Wire types shared between the gateway, its backends and the rate store
//!
//! # Route manifest
//!
//! Every backend answers the manifest endpoint with a [`Manifest`]: the prefix
//! under which its non-global routes are mounted and the routes themselves.
//!
//! ```json
//! {
//!   "mount_prefix": "billing",
//!   "routes": [
//!     {
//!       "method": "GET",
//!       "path": "/invoices/:id",
//!       "endpoint": "Invoices.Get",
//!       "params": ["id"],
//!       "auth_required": true,
//!       "ratelimit_client_ip": ["100-M"],
//!       "ratelimit_user": ["1000-H"]
//!     }
//!   ]
//! }
//! ```
//!
//! # Shared rate store
//!
//! [`ThrottleRequest`] and [`ThrottleResponse`] are the JSON bodies of the
//! `POST /throttle` call made to a remote counter service.

use routecrab::{RateRule, RouteDescriptor};
use serde::{Deserialize, Serialize};

/// One route as advertised in a backend manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Mount at the gateway root instead of below the backend prefix
    #[serde(default)]
    pub global: bool,
    pub method: String,
    pub path: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub ratelimit_client_ip: Vec<String>,
    #[serde(default)]
    pub ratelimit_user: Vec<String>,
}

impl RouteEntry {
    pub fn new(method: &str, path: &str, endpoint: &str) -> Self {
        RouteEntry {
            method: method.to_string(),
            path: path.to_string(),
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn into_descriptor(self, backend_name: &str, mount_prefix: &str) -> RouteDescriptor {
        RouteDescriptor::new(backend_name, &self.method, &self.path)
            .mount_prefix(mount_prefix)
            .global(self.global)
            .endpoint(&self.endpoint)
            .params(self.params)
            .auth_required(self.auth_required)
            .client_ip_rate_limits(self.ratelimit_client_ip)
            .user_rate_limits(self.ratelimit_user)
    }
}

/// Reply of the manifest endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub mount_prefix: String,
    pub routes: Vec<RouteEntry>,
}

/// A registered route as reported by the introspection endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
    pub backend: String,
    pub endpoint: String,
    pub params: Vec<String>,
    pub auth_required: bool,
    pub ratelimit_client_ip: Vec<String>,
    pub ratelimit_user: Vec<String>,
}

impl From<&RouteDescriptor> for RouteInfo {
    fn from(route: &RouteDescriptor) -> Self {
        RouteInfo {
            method: route.method.clone(),
            path: route.mounted_path(),
            backend: route.backend_name.clone(),
            endpoint: route.endpoint_name.clone(),
            params: route.param_names.clone(),
            auth_required: route.auth_required,
            ratelimit_client_ip: route.client_ip_rate_limits.clone(),
            ratelimit_user: route.user_rate_limits.clone(),
        }
    }
}

/// Body of a remote rate store check
///
/// A rule `N-P` is sent as a burst of `N` with `N` tokens per `P` seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRequest {
    pub key: String,
    pub max_burst: i64,
    pub count_per_period: i64,
    /// Period in seconds
    pub period: i64,
}

impl ThrottleRequest {
    pub fn new(key: &str, rule: &RateRule) -> Self {
        ThrottleRequest {
            key: key.to_string(),
            max_burst: rule.limit() as i64,
            count_per_period: rule.limit() as i64,
            period: rule.period().as_secs() as i64,
        }
    }
}

/// Reply of a remote rate store check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleResponse {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    /// Seconds until the key is back at full capacity
    pub reset_after: i64,
    /// Seconds until the next request can pass (0 if allowed)
    pub retry_after: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_optional_fields() {
        let json = r#"{
            "mount_prefix": "billing",
            "routes": [{"method": "GET", "path": "/invoices", "endpoint": "Invoices.List"}]
        }"#;

        let manifest: Manifest = serde_json::from_str(json).unwrap();
        let route = &manifest.routes[0];
        assert!(!route.global);
        assert!(!route.auth_required);
        assert!(route.params.is_empty());
        assert!(route.ratelimit_client_ip.is_empty());
    }

    #[test]
    fn test_entry_into_descriptor() {
        let entry = RouteEntry {
            params: vec!["id".to_string()],
            ratelimit_client_ip: vec!["2-M".to_string()],
            auth_required: true,
            ..RouteEntry::new("get", "/invoices/:id", "Invoices.Get")
        };

        let route = entry.into_descriptor("billing", "billing");
        assert_eq!(route.method, "GET");
        assert_eq!(route.mounted_path(), "/billing/invoices/:id");
        assert_eq!(route.param_names, ["id"]);
        assert_eq!(route.client_ip_rate_limits, ["2-M"]);
        assert!(route.auth_required);

        let info = RouteInfo::from(&route);
        assert_eq!(info.path, "/billing/invoices/:id");
        assert_eq!(info.endpoint, "Invoices.Get");
    }

    #[test]
    fn test_throttle_request_from_rule() {
        let rule = RateRule::parse("2-M").unwrap();
        let request = ThrottleRequest::new("/x-2-M-10.0.0.1", &rule);
        assert_eq!(request.max_burst, 2);
        assert_eq!(request.count_per_period, 2);
        assert_eq!(request.period, 60);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"key\":\"/x-2-M-10.0.0.1\""));
    }
}
