//! HTTP transport
//!
//! The gateway's own endpoints live under `/{router_base}` (default
//! `/router`). Discovery refuses backend routes below that prefix, so every
//! other path belongs to the backends.
//!
//! # Endpoints
//!
//! ## GET /{router_base}/health
//!
//! Returns "OK" with 200 status.
//!
//! ## GET /{router_base}/metrics
//!
//! Gateway metrics in Prometheus text format.
//!
//! ## GET /{router_base}/routes
//!
//! Every registered route, sorted by path then method:
//!
//! ```json
//! [
//!   {
//!     "method": "GET",
//!     "path": "/billing/invoices/:id",
//!     "backend": "billing",
//!     "endpoint": "Invoices.Get",
//!     "params": ["id"],
//!     "auth_required": true,
//!     "ratelimit_client_ip": ["100-M"],
//!     "ratelimit_user": []
//!   }
//! ]
//! ```
//!
//! ## Everything else
//!
//! Proxied to the owning backend by [`dispatch`].

use super::Transport;
use crate::dispatch::{Gateway, dispatch};
use crate::types::RouteInfo;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;
        Ok(Self { addr })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, gateway: Arc<Gateway>, shutdown: CancellationToken) -> Result<()> {
        let app = router(gateway);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("HTTP server listening on {}", self.addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        Ok(())
    }
}

/// The gateway's axum application
pub fn router(gateway: Arc<Gateway>) -> Router {
    let body_limit = gateway.options.body_limit;
    let base = gateway.options.reserved_prefix();

    Router::new()
        .route(&format!("{base}/health"), get(|| async { "OK" }))
        .route(&format!("{base}/metrics"), get(handle_metrics))
        .route(&format!("{base}/routes"), get(handle_routes))
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(gateway)
}

async fn handle_metrics(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        gateway.metrics.export_prometheus(),
    )
}

async fn handle_routes(State(gateway): State<Arc<Gateway>>) -> Json<Vec<RouteInfo>> {
    Json(gateway.registry.all().iter().map(RouteInfo::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthForwarder, DenyAllInspector};
    use crate::dispatch::DispatchOptions;
    use crate::rpc::{ClientConfig, MsgPackTransport};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use routecrab::RouteDescriptor;
    use tower::ServiceExt;

    fn gateway() -> Arc<Gateway> {
        gateway_under("router")
    }

    fn gateway_under(router_base: &str) -> Arc<Gateway> {
        Arc::new(
            Gateway::new(
                AuthForwarder::new(Arc::new(DenyAllInspector), "routecrab"),
                Arc::new(MsgPackTransport::new(ClientConfig::default())),
            )
            .with_options(DispatchOptions {
                router_base: router_base.to_string(),
                ..DispatchOptions::default()
            }),
        )
    }

    async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_text(router(gateway()), "/router/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        // The root is left to the backends
        let (status, _) = get_text(router(gateway()), "/health").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_routes_under_custom_base() {
        let gateway = gateway_under("/admin/");
        gateway.registry.merge(
            RouteDescriptor::new("users", "GET", "/users/:id")
                .mount_prefix("users")
                .endpoint("Users.Get"),
            Default::default(),
        );

        let (status, body) = get_text(router(Arc::clone(&gateway)), "/admin/routes").await;
        assert_eq!(status, StatusCode::OK);
        let routes: Vec<RouteInfo> = serde_json::from_str(&body).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path, "/users/users/:id");
        assert_eq!(routes[0].backend, "users");

        let (status, _) = get_text(router(gateway), "/router/routes").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_count_unmatched_requests() {
        let gateway = gateway();
        let (status, _) = get_text(router(Arc::clone(&gateway)), "/nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, metrics) = get_text(router(gateway), "/router/metrics").await;
        assert!(metrics.contains("routecrab_requests_by_outcome{outcome=\"not_found\"} 1"));
    }

    #[test]
    fn test_invalid_listen_address() {
        assert!(HttpTransport::new("not an address", 8080).is_err());
        assert!(HttpTransport::new("127.0.0.1", 8080).is_ok());
    }
}
