//! GCRA (Generic Cell Rate Algorithm) rate limiter
//!
//! A rule `N-P` is enforced with a burst of `N` and `N` tokens replenished per
//! period `P`: at most `N` requests are accepted back to back, and capacity
//! returns smoothly over the period.

use super::{LimitError, RateRule, store::Store};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_RETRIES: u32 = 10;

/// Outcome of evaluating one rule against one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request fits under the rule
    pub allowed: bool,
    /// The rule's limit (maximum burst)
    pub limit: i64,
    /// Requests still available after this one
    pub remaining: i64,
    /// Time until the key is back at full capacity
    pub reset_after: Duration,
    /// Time to wait before the next request can pass (zero when allowed)
    pub retry_after: Duration,
}

/// GCRA rate limiter over a [`Store`]
///
/// # Example
///
/// ```
/// use routecrab::{PeriodicStore, RateLimiter, RateRule};
/// use std::time::SystemTime;
///
/// let mut limiter = RateLimiter::new(PeriodicStore::new());
/// let rule = RateRule::per_minute(100);
///
/// let decision = limiter.check("/health-100-M-10.0.0.1", &rule, SystemTime::now()).unwrap();
/// assert!(decision.allowed);
/// assert_eq!(decision.limit, 100);
/// assert_eq!(decision.remaining, 99);
/// ```
pub struct RateLimiter<S: Store> {
    store: S,
}

impl<S: Store> RateLimiter<S> {
    /// Create a new rate limiter with the specified store
    pub fn new(store: S) -> Self {
        RateLimiter { store }
    }

    /// Count one request for `key` against `rule` at time `now`
    ///
    /// # Errors
    ///
    /// - [`LimitError::Store`]: the store failed
    /// - [`LimitError::Clock`]: `now` is before the Unix epoch
    /// - [`LimitError::Contention`]: the compare-and-swap kept failing
    pub fn check(
        &mut self,
        key: &str,
        rule: &RateRule,
        now: SystemTime,
    ) -> Result<Decision, LimitError> {
        let limit = rule.limit() as i64;
        let emission_interval_ns = rule.emission_interval().as_nanos() as i64;
        let tolerance_ns = emission_interval_ns.saturating_mul(limit);

        let now_ns = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| LimitError::Clock(e.to_string()))?
            .as_nanos() as i64;

        let mut retries = 0;

        loop {
            let stored = self.store.get(key, now).map_err(LimitError::Store)?;

            // A TAT in the past carries no debt
            let tat = stored.unwrap_or(now_ns).max(now_ns);
            let new_tat = tat.saturating_add(emission_interval_ns);
            let allow_at = new_tat.saturating_sub(tolerance_ns);
            let allowed = now_ns >= allow_at;

            if allowed {
                let ttl = Duration::from_nanos(new_tat.saturating_sub(now_ns).max(0) as u64);

                let swapped = match stored {
                    Some(old_tat) => self
                        .store
                        .compare_and_swap_with_ttl(key, old_tat, new_tat, ttl, now)
                        .map_err(LimitError::Store)?,
                    None => self
                        .store
                        .set_if_not_exists_with_ttl(key, new_tat, ttl, now)
                        .map_err(LimitError::Store)?,
                };

                if !swapped {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(LimitError::Contention);
                    }
                    continue;
                }
            }

            let (remaining, reset_after, retry_after) = if allowed {
                (
                    now_ns.saturating_sub(allow_at) / emission_interval_ns,
                    Duration::from_nanos(new_tat.saturating_sub(now_ns) as u64),
                    Duration::ZERO,
                )
            } else {
                (
                    0,
                    Duration::from_nanos(tat.saturating_sub(now_ns) as u64),
                    Duration::from_nanos(allow_at.saturating_sub(now_ns) as u64),
                )
            };

            return Ok(Decision {
                allowed,
                limit,
                remaining,
                reset_after,
                retry_after,
            });
        }
    }
}
