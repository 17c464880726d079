//! Signed calls to the authorization server's UMA endpoints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::metadata::{AuthServerMetadata, Endpoint};
use super::{REGISTRATION_SCOPES, READ_SCOPE};
use crate::signing::{OutboundRequest, RequestSigner};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct PermissionRequest<'a> {
    resource_id: &'a str,
    resource_scopes: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct IntrospectionRequest<'a> {
    token_type_hint: &'static str,
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct ResourceDescription<'a> {
    resource_scopes: &'a [&'a str],
}

/// Result of a token introspection.
#[derive(Debug, Clone, Deserialize)]
pub struct Introspection {
    /// Raw `active` member; only a JSON `true` counts as active
    #[serde(default)]
    active: Value,
    /// Remaining claims
    #[serde(flatten)]
    pub claims: serde_json::Map<String, Value>,
}

impl Introspection {
    /// Whether the authorization server reported the token as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active == Value::Bool(true)
    }
}

/// Client for the permission, introspection and registration endpoints.
#[derive(Debug)]
pub struct UmaClient {
    metadata: Arc<AuthServerMetadata>,
    signer: Arc<RequestSigner>,
}

impl UmaClient {
    /// Client using `metadata` for endpoint discovery and `signer` for transport.
    pub fn new(metadata: Arc<AuthServerMetadata>, signer: Arc<RequestSigner>) -> Self {
        Self { metadata, signer }
    }

    /// Authorization server base URI.
    #[must_use]
    pub fn as_uri(&self) -> &str {
        self.metadata.as_uri()
    }

    /// Request a permission ticket for reading `resource_id`.
    #[instrument(skip(self))]
    pub async fn request_ticket(&self, resource_id: &str) -> Result<String> {
        let url = self.metadata.get().await?.endpoint(Endpoint::Permission)?;
        let endpoint = url.to_string();
        let body = [PermissionRequest {
            resource_id,
            resource_scopes: &[READ_SCOPE],
        }];

        let response = self
            .signer
            .signed_fetch(OutboundRequest::post(url).json(&body)?)
            .await?;
        if !response.status.is_success() {
            return Err(Error::unavailable(endpoint, format!("HTTP {}", response.status)));
        }

        let json: Value = response
            .json()
            .map_err(|e| Error::unavailable(&endpoint, format!("Invalid ticket response: {e}")))?;
        let ticket = json
            .get("ticket")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::unavailable(&endpoint, "Response has no ticket"))?;

        debug!(resource_id, "Obtained permission ticket");
        Ok(ticket.to_string())
    }

    /// Introspect `token` at the authorization server.
    #[instrument(skip_all)]
    pub async fn introspect(&self, token: &str) -> Result<Introspection> {
        let url = self.metadata.get().await?.endpoint(Endpoint::Introspection)?;
        let endpoint = url.to_string();
        let form = IntrospectionRequest {
            token_type_hint: "access_token",
            token,
        };

        let response = self
            .signer
            .signed_fetch(OutboundRequest::post(url).form(&form)?)
            .await?;
        if !response.status.is_success() {
            return Err(Error::unavailable(endpoint, format!("HTTP {}", response.status)));
        }

        let introspection: Introspection = response.json().map_err(|e| {
            Error::unavailable(&endpoint, format!("Invalid introspection response: {e}"))
        })?;
        debug!(active = introspection.is_active(), "Token introspected");
        Ok(introspection)
    }

    /// Register a resource with the full scope set and return its `_id`.
    #[instrument(skip(self))]
    pub async fn register_resource(&self) -> Result<String> {
        let url = self
            .metadata
            .get()
            .await?
            .endpoint(Endpoint::ResourceRegistration)?;
        let body = ResourceDescription {
            resource_scopes: &REGISTRATION_SCOPES,
        };

        let response = self
            .signer
            .signed_fetch(OutboundRequest::post(url).json(&body)?)
            .await?;
        if response.status != reqwest::StatusCode::CREATED {
            return Err(Error::Registration(format!(
                "expected 201 Created, got {}",
                response.status
            )));
        }

        let json: Value = response
            .json()
            .map_err(|e| Error::Registration(format!("Invalid registration response: {e}")))?;
        json.get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Registration("Response has no string _id".to_string()))
    }
}
