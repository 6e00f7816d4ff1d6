use super::protocol::{RpcRequest, RpcResponse, read_frame, write_frame};
use super::{BackendTransport, CallContext, CallError};
use crate::discovery::BackendRef;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Idle connections kept per backend address
    pub max_idle_per_backend: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_backend: 16,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct Connection {
    stream: TcpStream,
    last_used: Instant,
    reused: bool,
}

impl Connection {
    async fn round_trip(&mut self, request: &RpcRequest) -> io::Result<RpcResponse> {
        write_frame(&mut self.stream, request).await?;
        let response = read_frame(&mut self.stream).await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before reply")
        })?;
        self.last_used = Instant::now();
        Ok(response)
    }
}

/// Gateway-side client with a small idle-connection pool per backend
pub struct MsgPackTransport {
    config: ClientConfig,
    idle: Mutex<HashMap<String, Vec<Connection>>>,
}

impl MsgPackTransport {
    pub fn new(config: ClientConfig) -> Self {
        MsgPackTransport {
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Idle connections currently pooled for `address`
    pub fn idle_connections(&self, address: &str) -> usize {
        self.idle.lock().get(address).map_or(0, Vec::len)
    }

    async fn checkout(&self, address: &str) -> Result<Connection, CallError> {
        let now = Instant::now();
        let pooled = {
            let mut idle = self.idle.lock();
            let conns = idle.entry(address.to_string()).or_default();
            conns.retain(|c| now.duration_since(c.last_used) < self.config.idle_timeout);
            conns.pop()
        };

        if let Some(mut conn) = pooled {
            conn.reused = true;
            return Ok(conn);
        }

        self.connect(address).await
    }

    async fn connect(&self, address: &str) -> Result<Connection, CallError> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| CallError::Unavailable(format!("connect to {address} timed out")))?
            .map_err(|e| CallError::Unavailable(format!("connect to {address}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CallError::Unavailable(e.to_string()))?;

        Ok(Connection {
            stream,
            last_used: Instant::now(),
            reused: false,
        })
    }

    fn checkin(&self, address: &str, conn: Connection) {
        let mut idle = self.idle.lock();
        let conns = idle.entry(address.to_string()).or_default();
        if conns.len() < self.config.max_idle_per_backend {
            conns.push(conn);
        }
    }

    async fn send(&self, address: &str, request: &RpcRequest) -> Result<RpcResponse, CallError> {
        let mut conn = self.checkout(address).await?;

        let mut result = timeout(self.config.request_timeout, conn.round_trip(request)).await;

        // A pooled connection may have been closed by the backend while idle
        if conn.reused && matches!(&result, Ok(Err(e)) if is_stale(e)) {
            tracing::debug!(address = %address, "Pooled connection was stale, reconnecting");
            conn = self.connect(address).await?;
            result = timeout(self.config.request_timeout, conn.round_trip(request)).await;
        }

        match result {
            Ok(Ok(response)) => {
                self.checkin(address, conn);
                Ok(response)
            }
            // Don't reuse a connection after an error or a timeout
            Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Err(CallError::Protocol(e.to_string()))
            }
            Ok(Err(e)) => Err(CallError::Unavailable(e.to_string())),
            Err(_) => Err(CallError::Timeout),
        }
    }
}

fn is_stale(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

#[async_trait]
impl BackendTransport for MsgPackTransport {
    async fn call(
        &self,
        backend: &BackendRef,
        endpoint: &str,
        body: String,
        context: &CallContext,
    ) -> Result<String, CallError> {
        let request = RpcRequest {
            service: backend.name.clone(),
            endpoint: endpoint.to_string(),
            metadata: context.metadata.clone(),
            body,
        };

        let response = self.send(&backend.address, &request).await?;
        match response.error {
            Some(error) => Err(CallError::Remote(error)),
            None => Ok(response.body.unwrap_or_default()),
        }
    }
}
