//! Caller identity resolution and forwarding
//!
//! The gateway does not authorize requests beyond the per-route
//! `auth_required` flag. It resolves who the caller is, then forwards that
//! identity to the backend in the call context so the backend can make its
//! own decisions.
//!
//! # Call context
//!
//! | Key | Value |
//! |-----|-------|
//! | `Identity` | base64 of the JSON-encoded [`Identity`] |
//! | `PROXY <Header-Name>` | each inbound HTTP header, values comma-joined |
//! | `Remote-Addr` | the caller's IP address |

use crate::rpc::CallContext;
use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub const IDENTITY_KEY: &str = "Identity";
pub const PROXY_HEADER_PREFIX: &str = "PROXY ";
pub const REMOTE_ADDR_KEY: &str = "Remote-Addr";

/// Role carried by gateway-to-backend infrastructure traffic
pub const SERVICE_ROLE: &str = "service";

const ANONYMOUS_ID: &str = "anonymous";

/// A resolved caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(id: &str) -> Self {
        Identity {
            id: id.to_string(),
            roles: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sentinel for callers without a resolved identity
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_ID)
    }

    /// Identity of infrastructure traffic issued by `name`
    pub fn service(name: &str) -> Self {
        Identity {
            roles: vec![SERVICE_ROLE.to_string()],
            ..Self::new(name)
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID && self.roles.is_empty()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// base64(JSON) form used in call contexts
    pub fn encode(&self) -> Result<String, ContextError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Identity forwarded in `context`, if any
    pub fn from_context(context: &CallContext) -> Option<Self> {
        context.get(IDENTITY_KEY).and_then(Self::decode)
    }
}

/// Why an inspector could not resolve an identity
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("no credentials presented")]
    Missing,
    #[error("invalid credentials: {0}")]
    Invalid(String),
}

/// Identity verification
#[async_trait]
pub trait Inspector: Send + Sync {
    async fn inspect(&self, headers: &HeaderMap) -> Result<Identity, InspectError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
}

/// Verifies `Authorization: Bearer <jwt>` tokens
///
/// `sub` becomes the identity id and the optional `roles` claim its roles.
pub struct JwtInspector {
    key: DecodingKey,
    validation: Validation,
}

impl JwtInspector {
    /// Tokens signed with a shared HS256 secret
    pub fn hs256(secret: &[u8], issuer: Option<&str>) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256, issuer)
    }

    /// Tokens signed with RS256, verified with the PEM-encoded public key
    pub fn rs256_pem(public_key: &[u8], issuer: Option<&str>) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self::with_key(
            DecodingKey::from_rsa_pem(public_key)?,
            Algorithm::RS256,
            issuer,
        ))
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        JwtInspector { key, validation }
    }
}

#[async_trait]
impl Inspector for JwtInspector {
    async fn inspect(&self, headers: &HeaderMap) -> Result<Identity, InspectError> {
        let value = headers.get(AUTHORIZATION).ok_or(InspectError::Missing)?;
        let value = value
            .to_str()
            .map_err(|_| InspectError::Invalid("authorization header is not valid text".into()))?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .ok_or_else(|| InspectError::Invalid("expected a bearer token".into()))?;

        let data = decode::<Claims>(token.trim(), &self.key, &self.validation)
            .map_err(|e| InspectError::Invalid(e.to_string()))?;

        Ok(Identity {
            roles: data.claims.roles,
            ..Identity::new(&data.claims.sub)
        })
    }
}

/// Inspector used when no verifier is configured: every caller is anonymous
pub struct DenyAllInspector;

#[async_trait]
impl Inspector for DenyAllInspector {
    async fn inspect(&self, _headers: &HeaderMap) -> Result<Identity, InspectError> {
        Err(InspectError::Missing)
    }
}

#[derive(Debug, Error)]
#[error("not authenticated")]
pub struct NotAuthenticated;

/// The outbound call context could not be built
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to encode identity: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Resolves callers and builds the context of backend calls
pub struct AuthForwarder {
    inspector: Arc<dyn Inspector>,
    service_name: String,
}

impl AuthForwarder {
    pub fn new(inspector: Arc<dyn Inspector>, service_name: &str) -> Self {
        AuthForwarder {
            inspector,
            service_name: service_name.to_string(),
        }
    }

    /// Resolve the caller
    ///
    /// Missing and malformed credentials both come back as
    /// [`NotAuthenticated`]; the difference only shows in the logs.
    pub async fn inspect(&self, headers: &HeaderMap) -> Result<Identity, NotAuthenticated> {
        match self.inspector.inspect(headers).await {
            Ok(identity) => Ok(identity),
            Err(InspectError::Missing) => {
                tracing::debug!("Request carries no credentials");
                Err(NotAuthenticated)
            }
            Err(InspectError::Invalid(reason)) => {
                tracing::warn!(reason = %reason, "Rejected malformed credentials");
                Err(NotAuthenticated)
            }
        }
    }

    /// Context for a backend call made on behalf of `identity`
    pub fn outbound_context(
        &self,
        identity: &Identity,
        headers: &HeaderMap,
        client_ip: &str,
    ) -> Result<CallContext, ContextError> {
        let mut context = CallContext::new();
        context.insert(IDENTITY_KEY, identity.encode()?);

        for name in headers.keys() {
            let values: Vec<_> = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            context.insert(
                format!("{PROXY_HEADER_PREFIX}{}", canonical_header_name(name.as_str())),
                values.join(","),
            );
        }

        context.insert(REMOTE_ADDR_KEY, client_ip);
        Ok(context)
    }

    /// Context for the gateway's own calls, such as manifest fetches
    pub fn service_context(&self) -> Result<CallContext, ContextError> {
        let mut context = CallContext::new();
        context.insert(IDENTITY_KEY, Identity::service(&self.service_name).encode()?);
        Ok(context)
    }
}

/// `x-request-id` -> `X-Request-Id`
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
