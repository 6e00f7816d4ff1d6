//! Per-request proxying
//!
//! [`dispatch`] is the axum fallback handler. For every request it:
//!
//! 1. looks the route up in the registry (404 when nothing matches)
//! 2. applies the route's client-IP limits
//! 3. collects the declared parameters from the query string and path
//! 4. binds the body for POST, PUT and PATCH (415 without a content type)
//! 5. merges the parameters over the body
//! 6. resolves the caller (401 when the route requires it and none resolves)
//! 7. applies the route's user limits
//! 8. calls the backend endpoint with the merged object
//! 9. passes the backend's reply through, or translates its error

mod body;
pub mod response;

pub use response::{ApiError, ErrorEnvelope, ErrorItem};

use crate::GatewayRegistry;
use crate::auth::{AuthForwarder, Identity, NotAuthenticated};
use crate::discovery::BackendDirectory;
use crate::metrics::{Metrics, Outcome};
use crate::ratelimit::RouteLimiter;
use crate::rpc::BackendTransport;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`
    pub trust_proxy_headers: bool,
    /// Maximum accepted request body, in bytes
    pub body_limit: usize,
    /// Path segment holding the gateway's own endpoints; never proxied
    pub router_base: String,
}

impl DispatchOptions {
    /// Prefix of the gateway's own endpoints, e.g. `/router`
    pub fn reserved_prefix(&self) -> String {
        format!("/{}", self.router_base.trim_matches('/'))
    }

    /// Whether `path` falls under the gateway's own endpoints
    pub fn is_reserved(&self, path: &str) -> bool {
        let prefix = self.reserved_prefix();
        path.strip_prefix(&prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            trust_proxy_headers: false,
            body_limit: 2 * 1024 * 1024,
            router_base: "router".to_string(),
        }
    }
}

/// State shared by the dispatcher and the discovery poller
pub struct Gateway {
    pub registry: GatewayRegistry,
    pub directory: BackendDirectory,
    pub auth: AuthForwarder,
    pub transport: Arc<dyn BackendTransport>,
    pub metrics: Metrics,
    pub options: DispatchOptions,
}

impl Gateway {
    pub fn new(auth: AuthForwarder, transport: Arc<dyn BackendTransport>) -> Self {
        Gateway {
            registry: GatewayRegistry::new(),
            directory: BackendDirectory::new(),
            auth,
            transport,
            metrics: Metrics::new(),
            options: DispatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    async fn proxy(&self, request: Request) -> Result<Response, ApiError> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let route = self
            .registry
            .lookup(method.as_str(), &path)
            .ok_or_else(|| ApiError::not_found(method.as_str(), &path))?;
        let descriptor = route.descriptor();
        let limits = route.binding();

        let client_ip = self.client_ip(&request);
        let mut rate_headers = HeaderMap::new();

        if let Some(limiter) = &limits.client_ip {
            check_limit(limiter, &client_ip, &mut rate_headers).await?;
        }

        let params = body::extract_params(&route, request.uri());
        let headers = request.headers().clone();

        let mut payload = if body::carries_body(&method) {
            body::materialize(request)
                .await
                .map_err(|e| e.with_headers(rate_headers.clone()))?
        } else {
            serde_json::Map::new()
        };
        payload.extend(params);

        let identity = match self.auth.inspect(&headers).await {
            Ok(identity) => Some(identity),
            Err(NotAuthenticated) if descriptor.auth_required => {
                return Err(ApiError::unauthorized().with_headers(rate_headers));
            }
            Err(NotAuthenticated) => None,
        };

        let forwarded = identity.clone().unwrap_or_else(Identity::anonymous);
        let context = self
            .auth
            .outbound_context(&forwarded, &headers, &client_ip)
            .map_err(|e| {
                tracing::error!(route = %descriptor.key(), "Failed to build call context: {}", e);
                ApiError::internal("failed to build call context").with_headers(rate_headers.clone())
            })?;

        if let (Some(identity), Some(limiter)) = (&identity, &limits.user) {
            check_limit(limiter, &identity.id, &mut rate_headers).await?;
        }

        let backend = self
            .directory
            .resolve(&descriptor.backend_name)
            .ok_or_else(|| {
                tracing::error!(backend = %descriptor.backend_name, "No address known for backend");
                ApiError::bad_gateway("backend unavailable").with_headers(rate_headers.clone())
            })?;

        let body = serde_json::to_string(&Value::Object(payload))
            .map_err(|e| ApiError::internal(&e.to_string()))?;

        let reply = self
            .transport
            .call(&backend, &descriptor.endpoint_name, body, &context)
            .await
            .map_err(|e| {
                tracing::warn!(
                    backend = %backend.name,
                    endpoint = %descriptor.endpoint_name,
                    error = %e,
                    "Backend call failed"
                );
                ApiError::from_call_error(e).with_headers(rate_headers.clone())
            })?;

        let mut response = (StatusCode::OK, reply).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.headers_mut().extend(rate_headers);
        Ok(response)
    }

    fn client_ip(&self, request: &Request) -> String {
        if self.options.trust_proxy_headers {
            if let Some(ip) = forwarded_ip(request.headers()) {
                return ip;
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// First address of `X-Forwarded-For`, else `X-Real-IP`
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    first("x-forwarded-for").or_else(|| first("x-real-ip"))
}

async fn check_limit(
    limiter: &RouteLimiter,
    value: &str,
    headers: &mut HeaderMap,
) -> Result<(), ApiError> {
    let dimension = limiter.dimension();
    let outcome = limiter.evaluate(value).await.map_err(|e| {
        tracing::error!(dimension = %dimension, "Rate limit check failed: {}", e);
        ApiError::internal("rate limit check failed").with_headers(headers.clone())
    })?;

    response::insert_rate_headers(headers, dimension, &outcome);
    if !outcome.allowed {
        tracing::debug!(dimension = %dimension, value = %value, "Rate limit reached");
        return Err(ApiError::too_many_requests(dimension).with_headers(headers.clone()));
    }
    Ok(())
}

/// Fallback handler proxying every request not served by the gateway itself
pub async fn dispatch(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let started = Instant::now();
    let (outcome, response) = match gateway.proxy(request).await {
        Ok(response) => (Outcome::Proxied, response),
        Err(error) => (error.outcome(), error.into_response()),
    };
    gateway.metrics.record_request(outcome, started.elapsed());
    response
}
