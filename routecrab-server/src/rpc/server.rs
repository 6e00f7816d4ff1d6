use super::protocol::{RpcError, RpcRequest, RpcResponse, read_frame, write_frame};
use super::{CallContext, MANIFEST_ENDPOINT};
use crate::auth::{Identity, SERVICE_ROLE};
use crate::types::{Manifest, RouteEntry};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// A call as seen by a backend handler
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub endpoint: String,
    pub body: Value,
    pub context: CallContext,
}

impl BackendRequest {
    /// Caller identity forwarded by the gateway
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_context(&self.context)
    }
}

type Handler = Arc<dyn Fn(BackendRequest) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Backend side of the RPC transport
///
/// Serves a dispatch table from endpoint name to handler, plus the manifest
/// endpoint listing the routes this backend wants the gateway to expose.
///
/// ```no_run
/// use routecrab_server::rpc::{BackendServer, RpcError};
/// use routecrab_server::types::RouteEntry;
/// use serde_json::json;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> std::io::Result<()> {
/// let server = BackendServer::new("billing", "billing")
///     .route(RouteEntry {
///         params: vec!["id".into()],
///         ..RouteEntry::new("GET", "/invoices/:id", "Invoices.Get")
///     })
///     .handle("Invoices.Get", |req| async move {
///         match req.body.get("id") {
///             Some(id) => Ok(json!({ "id": id, "total": 100 })),
///             None => Err(RpcError::bad_request("missing id")),
///         }
///     });
///
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
/// server.serve(listener, CancellationToken::new()).await
/// # }
/// ```
pub struct BackendServer {
    name: String,
    manifest: Manifest,
    handlers: HashMap<String, Handler>,
}

impl BackendServer {
    pub fn new(name: &str, mount_prefix: &str) -> Self {
        BackendServer {
            name: name.to_string(),
            manifest: Manifest {
                mount_prefix: mount_prefix.to_string(),
                routes: Vec::new(),
            },
            handlers: HashMap::new(),
        }
    }

    /// Advertise a route in the manifest
    pub fn route(mut self, entry: RouteEntry) -> Self {
        self.manifest.routes.push(entry);
        self
    }

    /// Register the handler for an endpoint
    pub fn handle<F, Fut>(mut self, endpoint: &str, handler: F) -> Self
    where
        F: Fn(BackendRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |request: BackendRequest| handler(request).boxed());
        self.handlers.insert(endpoint.to_string(), handler);
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let server = Arc::new(self);
        tracing::info!(
            backend = %server.name,
            addr = ?listener.local_addr().ok(),
            "Backend listening"
        );

        loop {
            let (socket, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            let server = Arc::clone(&server);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    result = server.handle_connection(socket) => {
                        if let Err(e) = result {
                            tracing::error!("Connection error from {}: {}", peer_addr, e);
                        }
                    }
                }
                tracing::debug!("Connection closed from {}", peer_addr);
            });
        }

        Ok(())
    }

    async fn handle_connection(&self, mut socket: TcpStream) -> std::io::Result<()> {
        socket.set_nodelay(true)?;

        while let Some(request) = read_frame::<_, RpcRequest>(&mut socket).await? {
            let response = self.respond(request).await;
            write_frame(&mut socket, &response).await?;
        }

        Ok(())
    }

    /// Answer one request
    pub async fn respond(&self, request: RpcRequest) -> RpcResponse {
        let context = CallContext {
            metadata: request.metadata,
        };

        if request.endpoint == MANIFEST_ENDPOINT {
            return self.respond_manifest(&context);
        }

        let Some(handler) = self.handlers.get(&request.endpoint) else {
            tracing::debug!(endpoint = %request.endpoint, "Unknown endpoint");
            return RpcResponse::error(RpcError::not_found(&format!(
                "{}: unknown endpoint {}",
                self.name, request.endpoint
            )));
        };

        let body = match serde_json::from_str::<Value>(&request.body) {
            Ok(body) => body,
            Err(e) => return RpcResponse::error(RpcError::bad_request(&e.to_string())),
        };

        let result = handler(BackendRequest {
            endpoint: request.endpoint,
            body,
            context,
        })
        .await;

        match result.and_then(|value| {
            serde_json::to_string(&value).map_err(|e| RpcError::internal(&e.to_string()))
        }) {
            Ok(body) => RpcResponse::ok(body),
            Err(error) => RpcResponse::error(error),
        }
    }

    fn respond_manifest(&self, context: &CallContext) -> RpcResponse {
        let caller = Identity::from_context(context);
        if !caller.as_ref().is_some_and(|id| id.has_role(SERVICE_ROLE)) {
            tracing::warn!(
                backend = %self.name,
                caller = ?caller.map(|id| id.id),
                "Manifest requested without service identity"
            );
            return RpcResponse::error(RpcError::forbidden("manifest requires a service identity"));
        }

        match serde_json::to_string(&self.manifest) {
            Ok(body) => RpcResponse::ok(body),
            Err(e) => RpcResponse::error(RpcError::internal(&e.to_string())),
        }
    }
}
