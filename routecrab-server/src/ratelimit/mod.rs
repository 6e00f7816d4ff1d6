//! Rate limiting for proxied routes
//!
//! A route can declare rules on two dimensions: the caller's IP address and
//! the authenticated user. Each declared dimension gets a [`RouteLimiter`]
//! bound to the route when it is first registered.
//!
//! Counters live in a [`RateStore`]:
//!
//! - [`LocalStore`] (`memory://`): an in-process actor, for single instances
//! - [`RemoteStore`] (`http://host:port`): a shared counter service reached
//!   over HTTP/JSON, for deployments running several gateways

mod local;
mod remote;

pub use local::LocalStore;
pub use remote::RemoteStore;

use crate::config::StoreConfig;
use async_trait::async_trait;
use routecrab::{RateRule, RouteDescriptor, RuleError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Counters reported by a store for one key and rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// The rule's limit was reached and the request must be refused
    pub reached: bool,
    pub limit: i64,
    pub remaining: i64,
    /// When the key is back at full capacity, in epoch seconds
    pub reset_at: i64,
}

/// The store could not be read or written
///
/// Distinct from a refusal, which is `RateDecision { reached: true, .. }`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate store unavailable: {0}")]
    Unavailable(String),
    #[error("rate store failed: {0}")]
    Backend(String),
}

/// Pluggable counter storage
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Count one request for `key` under `rule`
    async fn acquire(&self, key: &str, rule: &RateRule) -> Result<RateDecision, StoreError>;
}

/// Build the store named by `url`, or none when no URL is configured
///
/// Accepted schemes are `memory` and `http`/`https`.
pub fn store_from_config(config: &StoreConfig) -> anyhow::Result<Option<Arc<dyn RateStore>>> {
    let Some(raw) = config.url.as_deref() else {
        return Ok(None);
    };
    let url = Url::parse(raw).map_err(|e| anyhow::anyhow!("Invalid rate store URL {raw:?}: {e}"))?;

    let store: Arc<dyn RateStore> = match url.scheme() {
        "memory" => Arc::new(LocalStore::spawn(
            config.capacity,
            Duration::from_secs(config.cleanup_interval),
            config.buffer_size,
        )),
        "http" | "https" => Arc::new(RemoteStore::new(url, config.timeout)?),
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported rate store scheme: {other}. Valid options are: memory://, http://, https://"
            ));
        }
    };

    Ok(Some(store))
}

/// Axis along which a limit is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    ClientIp,
    User,
}

impl Dimension {
    /// Prefix of the response headers reporting this dimension's counters
    pub fn header_prefix(&self) -> &'static str {
        match self {
            Dimension::ClientIp => "X-ClientIPRateLimit",
            Dimension::User => "X-UserRateLimit",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ClientIp => "client_ip",
            Dimension::User => "user",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route's limits could not be built
#[derive(Debug, Error)]
pub enum LimitBuildError {
    #[error("invalid {dimension} rate rule {rule:?}: {source}")]
    Rule {
        dimension: Dimension,
        rule: String,
        source: RuleError,
    },
    #[error("{0} rate limits declared but no rate store is configured")]
    NoStore(Dimension),
}

/// Result of evaluating a dimension's rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: i64,
}

/// The rules of one dimension of one route
pub struct RouteLimiter {
    dimension: Dimension,
    path: String,
    rules: Vec<RateRule>,
    store: Arc<dyn RateStore>,
}

impl fmt::Debug for RouteLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteLimiter")
            .field("dimension", &self.dimension)
            .field("path", &self.path)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl RouteLimiter {
    /// Parse `specs` into a limiter for the route mounted at `path`
    ///
    /// Returns `Ok(None)` when no rule is declared. Any unparsable rule, or
    /// rules without a store, fail the whole dimension.
    pub fn build(
        dimension: Dimension,
        path: &str,
        specs: &[String],
        store: Option<&Arc<dyn RateStore>>,
    ) -> Result<Option<Self>, LimitBuildError> {
        if specs.is_empty() {
            return Ok(None);
        }

        let rules = specs
            .iter()
            .map(|spec| {
                RateRule::parse(spec).map_err(|source| LimitBuildError::Rule {
                    dimension,
                    rule: spec.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let store = store.ok_or(LimitBuildError::NoStore(dimension))?;

        Ok(Some(RouteLimiter {
            dimension,
            path: path.to_string(),
            rules,
            store: Arc::clone(store),
        }))
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn rules(&self) -> &[RateRule] {
        &self.rules
    }

    /// Counter key of `rule` for caller `value`
    pub fn key(&self, rule: &RateRule, value: &str) -> String {
        format!("{}-{}-{}", self.path, rule.formatted(), value)
    }

    /// Evaluate the rules in declared order for caller `value`
    ///
    /// The first rule that reports its limit reached refuses the request with
    /// that rule's counters. When every rule passes, the first rule's counters
    /// are reported.
    pub async fn evaluate(&self, value: &str) -> Result<Outcome, StoreError> {
        let mut first: Option<RateDecision> = None;

        for rule in &self.rules {
            let decision = self.store.acquire(&self.key(rule, value), rule).await?;
            if decision.reached {
                return Ok(Outcome {
                    allowed: false,
                    limit: decision.limit,
                    remaining: decision.remaining,
                    reset_at: decision.reset_at,
                });
            }
            first.get_or_insert(decision);
        }

        // Rules are never empty once built
        let reported = first.unwrap_or(RateDecision {
            reached: false,
            limit: 0,
            remaining: 0,
            reset_at: 0,
        });
        Ok(Outcome {
            allowed: true,
            limit: reported.limit,
            remaining: reported.remaining,
            reset_at: reported.reset_at,
        })
    }
}

/// Limiters bound to a registered route
#[derive(Debug, Default)]
pub struct RouteLimits {
    pub client_ip: Option<RouteLimiter>,
    /// Only built for routes that require authentication
    pub user: Option<RouteLimiter>,
}

impl RouteLimits {
    pub fn build(
        route: &RouteDescriptor,
        store: Option<&Arc<dyn RateStore>>,
    ) -> Result<Self, LimitBuildError> {
        let path = route.mounted_path();
        let client_ip = RouteLimiter::build(
            Dimension::ClientIp,
            &path,
            &route.client_ip_rate_limits,
            store,
        )?;

        let user = if route.auth_required {
            RouteLimiter::build(Dimension::User, &path, &route.user_rate_limits, store)?
        } else {
            if !route.user_rate_limits.is_empty() {
                tracing::debug!(
                    path = %path,
                    method = %route.method,
                    "Ignoring user rate limits on a route without authentication"
                );
            }
            None
        };

        Ok(RouteLimits { client_ip, user })
    }
}
