use crate::ratelimit::StoreError;
use routecrab::{Decision, LimitError, PeriodicStore, RateLimiter, RateRule};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};

type Reply = oneshot::Sender<Result<Decision, LimitError>>;

/// Requests understood by the limiter task
pub enum ActorMessage {
    /// Count one request for `key` at `at`
    Acquire {
        key: String,
        rule: RateRule,
        at: SystemTime,
        reply: Reply,
    },
}

/// Cloneable sender side of a [`RateLimiterActor`]
#[derive(Clone)]
pub struct RateLimiterHandle {
    tx: mpsc::Sender<ActorMessage>,
}

impl RateLimiterHandle {
    /// Count one request for `key` against `rule`
    pub async fn acquire(&self, key: &str, rule: &RateRule, at: SystemTime) -> Result<Decision, StoreError> {
        let (reply, answer) = oneshot::channel();
        let message = ActorMessage::Acquire {
            key: key.to_string(),
            rule: rule.clone(),
            at,
            reply,
        };

        if self.tx.send(message).await.is_err() {
            return Err(StoreError::Unavailable("limiter task has stopped".into()));
        }
        match answer.await {
            Ok(result) => result.map_err(|e| StoreError::Backend(e.to_string())),
            Err(_) => Err(StoreError::Unavailable("limiter task dropped the request".into())),
        }
    }
}

/// Task owning the gateway's in-process counters
///
/// Only this task touches the store, so requests against one limiter key are
/// counted in the order they were queued.
pub struct RateLimiterActor;

impl RateLimiterActor {
    pub fn spawn(buffer_size: usize, store: PeriodicStore) -> RateLimiterHandle {
        let (tx, rx) = mpsc::channel(buffer_size);
        tokio::spawn(run(rx, RateLimiter::new(store)));
        RateLimiterHandle { tx }
    }
}

async fn run(mut rx: mpsc::Receiver<ActorMessage>, mut limiter: RateLimiter<PeriodicStore>) {
    while let Some(ActorMessage::Acquire { key, rule, at, reply }) = rx.recv().await {
        let result = limiter.check(&key, &rule, at);
        if let Err(e) = &result {
            tracing::error!(key = %key, rule = %rule, error = %e, "Limiter store failed");
        }
        // The caller may have given up waiting
        let _ = reply.send(result);
    }

    tracing::info!("Limiter task stopped, all handles dropped");
}
