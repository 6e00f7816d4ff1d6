//! Internal RPC between the gateway and its backends
//!
//! - [`protocol`]: framing and message types
//! - [`client`]: the gateway side, a pooled [`MsgPackTransport`]
//! - [`server`]: the backend side, a [`BackendServer`] with a dispatch table
//!   keyed by endpoint name

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, MsgPackTransport};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use server::{BackendRequest, BackendServer};

use crate::discovery::BackendRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Endpoint every backend serves with its route manifest
pub const MANIFEST_ENDPOINT: &str = "Router.Routes";

/// Metadata travelling with a call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub metadata: BTreeMap<String, String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    /// The backend answered with an error
    #[error("backend error: {0}")]
    Remote(RpcError),
    #[error("backend call timed out")]
    Timeout,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Calls an endpoint on a backend
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send `body` (a JSON document) and return the backend's JSON reply unchanged
    async fn call(
        &self,
        backend: &BackendRef,
        endpoint: &str,
        body: String,
        context: &CallContext,
    ) -> Result<String, CallError>;
}
