//! # RouteCrab
//!
//! The data-plane core of the routecrab gateway: the route table, path-template
//! matching, and GCRA-based rate rules.
//!
//! ## Overview
//!
//! Backends advertise the HTTP routes they want exposed. The gateway mounts each
//! route either at the root (global routes) or below the backend's own prefix,
//! stores it in a [`RouteRegistry`], and looks inbound requests up against it.
//! Routes can carry rate rules such as `"100-M"` (100 per minute), which are
//! evaluated with the Generic Cell Rate Algorithm by a [`RateLimiter`].
//!
//! This crate has no async or network dependencies; the `routecrab-server`
//! crate builds the gateway on top of it.
//!
//! ## Quick Start
//!
//! ```
//! use routecrab::{RouteDescriptor, RouteRegistry};
//!
//! let registry: RouteRegistry = RouteRegistry::new();
//!
//! let route = RouteDescriptor::new("billing", "GET", "/invoices/:id")
//!     .mount_prefix("billing")
//!     .endpoint("Invoices.Get")
//!     .params(["id"]);
//!
//! assert!(registry.merge(route.clone(), ()));
//! // Re-advertising the same route is a no-op
//! assert!(!registry.merge(route, ()));
//!
//! let found = registry.lookup("GET", "/billing/invoices/42").unwrap();
//! assert_eq!(found.descriptor().endpoint_name, "Invoices.Get");
//! assert_eq!(found.param("id"), Some("42"));
//! ```
//!
//! ## Rate Rules
//!
//! ```
//! use routecrab::{PeriodicStore, RateLimiter, RateRule};
//! use std::time::SystemTime;
//!
//! let rule: RateRule = "2-M".parse().unwrap();
//! let mut limiter = RateLimiter::new(PeriodicStore::new());
//!
//! let now = SystemTime::now();
//! assert!(limiter.check("ip:10.0.0.1", &rule, now).unwrap().allowed);
//! assert!(limiter.check("ip:10.0.0.1", &rule, now).unwrap().allowed);
//!
//! let third = limiter.check("ip:10.0.0.1", &rule, now).unwrap();
//! assert!(!third.allowed);
//! assert_eq!(third.remaining, 0);
//! ```
//!
//! ## Thread Safety
//!
//! [`RouteRegistry`] is internally synchronized and meant to be shared behind an
//! `Arc`. [`RateLimiter`] is not; the server crate owns one inside an actor task.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing

pub mod core;
pub mod registry;
pub mod route;

pub use core::{
    Decision, LimitError, PeriodicStore, PeriodicStoreBuilder, RateLimiter, RateRule, RuleError,
    Store,
};
pub use registry::{Registered, RouteMatch, RouteRegistry};
pub use route::{PathTemplate, RouteDescriptor, RouteKey, mount_path};
