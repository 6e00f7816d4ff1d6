//! MessagePack framing for gateway to backend calls
//!
//! Every frame is a 4-byte big-endian length followed by a MessagePack
//! document. A connection carries any number of request/response pairs, one
//! at a time.

use bytes::BytesMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (4MB)
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Name of the backend the call is meant for
    pub service: String,
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
    /// JSON document
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub body: Option<String>,
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(body: String) -> Self {
        RpcResponse {
            body: Some(body),
            error: None,
        }
    }

    pub fn error(error: RpcError) -> Self {
        RpcResponse {
            body: None,
            error: Some(error),
        }
    }
}

/// Error reported by a backend
///
/// `code` is an HTTP status; 0 means the backend did not pick one.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{id} ({code}): {detail}")]
pub struct RpcError {
    pub id: String,
    pub code: i32,
    pub detail: String,
}

impl RpcError {
    pub fn new(id: &str, code: i32, detail: &str) -> Self {
        RpcError {
            id: id.to_string(),
            code,
            detail: detail.to_string(),
        }
    }

    pub fn bad_request(detail: &str) -> Self {
        Self::new("BAD_REQUEST", 400, detail)
    }

    pub fn forbidden(detail: &str) -> Self {
        Self::new("FORBIDDEN", 403, detail)
    }

    pub fn not_found(detail: &str) -> Self {
        Self::new("NOT_FOUND", 404, detail)
    }

    pub fn internal(detail: &str) -> Self {
        Self::new("INTERNAL_SERVER_ERROR", 500, detail)
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = rmp_serde::to_vec_named(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }

    let mut buffer = BytesMut::with_capacity(4 + payload.len());
    buffer.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&payload);

    // Send the entire frame in one write
    writer.write_all(&buffer).await?;
    writer.flush().await
}

/// Read one frame, or `None` if the peer closed the connection between frames
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let mut buffer = BytesMut::zeroed(len);
    reader.read_exact(&mut buffer).await?;

    rmp_serde::from_slice(&buffer)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_share_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = RpcRequest {
            service: "billing".to_string(),
            endpoint: "Invoices.Get".to_string(),
            metadata: BTreeMap::from([("Remote-Addr".to_string(), "10.0.0.1".to_string())]),
            body: r#"{"id":"42"}"#.to_string(),
        };
        write_frame(&mut client, &request).await.unwrap();
        write_frame(&mut client, &request).await.unwrap();
        drop(client);

        let first: RpcRequest = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(first, request);
        let second: Option<RpcRequest> = read_frame(&mut server).await.unwrap();
        assert!(second.is_some());
        let end: Option<RpcRequest> = read_frame(&mut server).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        let result: io::Result<Option<RpcResponse>> = read_frame(&mut server).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_error_display() {
        let error = RpcError::not_found("invoice 42 not found");
        assert_eq!(error.to_string(), "NOT_FOUND (404): invoice 42 not found");
    }
}
