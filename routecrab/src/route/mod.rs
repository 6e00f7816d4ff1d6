//! Route descriptors and mounting
//!
//! A backend advertises routes relative to itself. Global routes are mounted
//! at the gateway root; all others are mounted below the backend's prefix.

mod template;

pub use template::PathTemplate;

use std::fmt;

/// Unique identity of a registered route: method and fully mounted path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: &str, path: &str) -> Self {
        RouteKey {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.path)
    }
}

/// Mount `template` below `prefix`, or at the root when `prefix` is `None`
///
/// ```
/// use routecrab::mount_path;
///
/// assert_eq!(mount_path(None, "/health"), "/health");
/// assert_eq!(mount_path(Some("billing"), "/invoices"), "/billing/invoices");
/// assert_eq!(mount_path(Some("/billing/"), "invoices"), "/billing/invoices");
/// ```
pub fn mount_path(prefix: Option<&str>, template: &str) -> String {
    let template = template.trim_start_matches('/');
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) if template.is_empty() => format!("/{prefix}"),
        Some(prefix) => format!("/{prefix}/{template}"),
        None => format!("/{template}"),
    }
}

/// One route advertised by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub backend_name: String,
    pub method: String,
    pub path_template: String,
    pub is_global: bool,
    /// Namespace the backend declared for its non-global routes
    pub mount_prefix: String,
    pub endpoint_name: String,
    pub param_names: Vec<String>,
    pub auth_required: bool,
    /// Rules such as `"100-M"`, strictest first
    pub client_ip_rate_limits: Vec<String>,
    pub user_rate_limits: Vec<String>,
}

impl RouteDescriptor {
    pub fn new(backend_name: &str, method: &str, path_template: &str) -> Self {
        RouteDescriptor {
            backend_name: backend_name.to_string(),
            method: method.to_ascii_uppercase(),
            path_template: path_template.to_string(),
            is_global: false,
            mount_prefix: String::new(),
            endpoint_name: String::new(),
            param_names: Vec::new(),
            auth_required: false,
            client_ip_rate_limits: Vec::new(),
            user_rate_limits: Vec::new(),
        }
    }

    pub fn mount_prefix(mut self, prefix: &str) -> Self {
        self.mount_prefix = prefix.to_string();
        self
    }

    pub fn global(mut self, is_global: bool) -> Self {
        self.is_global = is_global;
        self
    }

    pub fn endpoint(mut self, endpoint_name: &str) -> Self {
        self.endpoint_name = endpoint_name.to_string();
        self
    }

    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn client_ip_rate_limits<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_ip_rate_limits = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn user_rate_limits<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_rate_limits = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Full path under which the gateway serves this route
    pub fn mounted_path(&self) -> String {
        if self.is_global {
            mount_path(None, &self.path_template)
        } else {
            mount_path(Some(&self.mount_prefix), &self.path_template)
        }
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(&self.method, &self.mounted_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_route_mounts_at_root() {
        let route = RouteDescriptor::new("status", "get", "/health")
            .mount_prefix("status")
            .global(true);
        assert_eq!(route.mounted_path(), "/health");
        assert_eq!(route.key(), RouteKey::new("GET", "/health"));
    }

    #[test]
    fn test_scoped_route_mounts_under_prefix() {
        let route = RouteDescriptor::new("billing", "POST", "/invoices").mount_prefix("billing");
        assert_eq!(route.mounted_path(), "/billing/invoices");
        assert_eq!(route.key().to_string(), "POST:/billing/invoices");
    }

    #[test]
    fn test_empty_prefix_mounts_at_root() {
        let route = RouteDescriptor::new("misc", "GET", "/ping");
        assert_eq!(route.mounted_path(), "/ping");
    }

    #[test]
    fn test_method_is_normalized() {
        assert_eq!(RouteDescriptor::new("a", "patch", "/x").method, "PATCH");
        assert_eq!(RouteKey::new("delete", "/x").method, "DELETE");
    }
}
