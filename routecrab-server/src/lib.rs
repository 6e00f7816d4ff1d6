//! # RouteCrab Server
//!
//! An HTTP edge gateway that learns its routes from the backends behind it.
//!
//! ## Purpose
//!
//! Backends describe the HTTP routes they want exposed in a manifest. The
//! gateway polls every known backend for its manifest, mounts the routes it
//! has not seen before, and proxies matching HTTP requests to the owning
//! backend over a MessagePack RPC transport. Along the way it applies
//! per-route authentication and rate limiting, so backends only receive calls
//! that passed both.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! routecrab --help
//!
//! # Two backends, in-process rate limiting
//! routecrab --backend billing=127.0.0.1:9000,users=127.0.0.1:9001 --rate-store memory://
//!
//! # Shared rate limiting across several gateways, HS256 bearer tokens
//! routecrab --backend billing=10.0.0.5:9000 \
//!   --rate-store http://ratelimiter.internal:8080 \
//!   --jwt-secret "$SECRET"
//!
//! # List all available environment variables
//! routecrab --list-env-vars
//! ```
//!
//! ## Writing a Backend
//!
//! ```no_run
//! use routecrab_server::rpc::{BackendServer, RpcError};
//! use routecrab_server::types::RouteEntry;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> std::io::Result<()> {
//! let server = BackendServer::new("users", "users")
//!     .route(RouteEntry {
//!         params: vec!["id".into()],
//!         auth_required: true,
//!         ratelimit_client_ip: vec!["100-M".into()],
//!         ..RouteEntry::new("GET", "/:id", "Users.Get")
//!     })
//!     .handle("Users.Get", |req| async move {
//!         match req.identity() {
//!             Some(caller) => Ok(json!({ "id": req.body["id"], "viewer": caller.id })),
//!             None => Err(RpcError::forbidden("no identity")),
//!         }
//!     });
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9001").await?;
//! server.serve(listener, CancellationToken::new()).await
//! # }
//! ```
//!
//! `GET /users/42` on the gateway now reaches `Users.Get` with the body
//! `{"id":"42"}`.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐        ┌─────────────┐
//!  HTTP ─────────►│  Dispatcher  │───────►│   Backend   │
//!                 └──┬────┬───┬──┘  RPC   │   servers   │
//!                    │    │   │           └──────▲──────┘
//!        ┌───────────┘    │   └─────────┐        │ manifests
//!  ┌─────▼─────┐   ┌──────▼─────┐  ┌────▼────┐  ┌┴─────────┐
//!  │ Registry  │◄──│   Poller   │  │  Auth   │  │Discovery │
//!  └─────┬─────┘   └────────────┘  └─────────┘  └──────────┘
//!        │ limiters
//!  ┌─────▼─────┐
//!  │Rate store │  memory:// actor or shared http:// service
//!  └───────────┘
//! ```

pub mod actor;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod metrics;
pub mod ratelimit;
pub mod rpc;
pub mod transport;
pub mod types;

/// Route table of the gateway; each route carries its rate limiters
pub type GatewayRegistry = routecrab::RouteRegistry<ratelimit::RouteLimits>;
