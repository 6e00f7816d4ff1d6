//! Rate limiting building blocks
//!
//! This module contains the pieces the gateway uses to enforce per-route limits:
//! - [`rate`]: Parsing of formatted rate rules (`"100-M"`)
//! - [`rate_limiter`]: The GCRA rate limiter evaluating a rule against a key
//! - [`store`]: Storage backends for rate limit state

pub mod rate;
pub mod rate_limiter;
pub mod store;
#[cfg(test)]
mod tests;

pub use rate::{RateRule, RuleError};
pub use rate_limiter::{Decision, RateLimiter};
pub use store::{PeriodicStore, PeriodicStoreBuilder, Store};

use std::error::Error;
use std::fmt;

/// Errors that can occur while evaluating a rate rule
///
/// These are infrastructure failures, never "limit reached": a refused request
/// is reported through [`Decision::allowed`].
///
/// # Example
///
/// ```
/// use routecrab::{LimitError, PeriodicStore, RateLimiter, RateRule};
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let mut limiter = RateLimiter::new(PeriodicStore::new());
/// let rule = RateRule::per_second(10);
///
/// // Timestamps before the epoch cannot be evaluated
/// let before_epoch = UNIX_EPOCH.checked_sub(Duration::from_secs(1)).unwrap();
/// match limiter.check("key", &rule, before_epoch) {
///     Err(LimitError::Clock(_)) => {}
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Debug)]
pub enum LimitError {
    /// The store could not be read or written
    Store(String),
    /// The timestamp could not be converted to a point after the epoch
    Clock(String),
    /// Concurrent updates kept invalidating the read value
    Contention,
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitError::Store(msg) => write!(f, "store error: {msg}"),
            LimitError::Clock(msg) => write!(f, "clock error: {msg}"),
            LimitError::Contention => write!(f, "max retries exceeded"),
        }
    }
}

impl Error for LimitError {}
