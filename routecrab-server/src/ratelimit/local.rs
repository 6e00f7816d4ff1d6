use super::{RateDecision, RateStore, StoreError};
use crate::actor::{RateLimiterActor, RateLimiterHandle};
use async_trait::async_trait;
use routecrab::{PeriodicStore, RateRule};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// In-process counters owned by a rate limiter actor
#[derive(Clone)]
pub struct LocalStore {
    handle: RateLimiterHandle,
}

impl LocalStore {
    pub fn new(handle: RateLimiterHandle) -> Self {
        LocalStore { handle }
    }

    /// Spawn the actor on the current runtime
    pub fn spawn(capacity: usize, cleanup_interval: Duration, buffer_size: usize) -> Self {
        let store = PeriodicStore::builder()
            .capacity(capacity)
            .cleanup_interval(cleanup_interval)
            .build();
        Self::new(RateLimiterActor::spawn(buffer_size, store))
    }
}

#[async_trait]
impl RateStore for LocalStore {
    async fn acquire(&self, key: &str, rule: &RateRule) -> Result<RateDecision, StoreError> {
        let now = SystemTime::now();
        let decision = self.handle.acquire(key, rule, now).await?;
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .as_secs() as i64;

        Ok(RateDecision {
            reached: !decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: now_secs + decision.reset_after.as_secs_f64().ceil() as i64,
        })
    }
}
