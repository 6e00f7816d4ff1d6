use super::{RateDecision, RateStore, StoreError};
use crate::types::{ThrottleRequest, ThrottleResponse};
use async_trait::async_trait;
use routecrab::RateRule;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Counters kept by a shared rate limiting service
///
/// Each check is a `POST {base}/throttle` with a JSON [`ThrottleRequest`].
/// Gateways pointed at the same service share their budgets.
#[derive(Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    endpoint: Url,
}

impl RemoteStore {
    pub fn new(base: Url, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = base.join("throttle")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(RemoteStore { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RateStore for RemoteStore {
    async fn acquire(&self, key: &str, rule: &RateRule) -> Result<RateDecision, StoreError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&ThrottleRequest::new(key, rule))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Backend(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }

        let body: ThrottleResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("invalid response: {e}")))?;

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .as_secs() as i64;

        Ok(RateDecision {
            reached: !body.allowed,
            limit: body.limit,
            remaining: body.remaining,
            reset_at: now_secs + body.reset_after,
        })
    }
}
