//! Authorization server metadata discovery (`/.well-known/uma2-configuration`)

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::signing::{HttpFetch, OutboundRequest};
use crate::{Error, Result};

/// Endpoints the resource server calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Permission (ticket) endpoint
    Permission,
    /// Token introspection endpoint
    Introspection,
    /// Resource registration endpoint
    ResourceRegistration,
}

impl Endpoint {
    /// Metadata member naming this endpoint.
    #[must_use]
    pub const fn metadata_key(self) -> &'static str {
        match self {
            Self::Permission => "permission_endpoint",
            Self::Introspection => "introspection_endpoint",
            Self::ResourceRegistration => "resource_registration_endpoint",
        }
    }
}

/// UMA 2.0 authorization server metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmaConfiguration {
    /// Issuer identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Permission endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_endpoint: Option<String>,
    /// Token introspection endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    /// Resource registration endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_registration_endpoint: Option<String>,
    /// Authorization server key set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

impl UmaConfiguration {
    /// Well-known metadata URL for the authorization server at `as_uri`.
    pub fn well_known_url(as_uri: &str) -> Result<Url> {
        let url = format!(
            "{}/.well-known/uma2-configuration",
            as_uri.trim_end_matches('/')
        );
        Url::parse(&url).map_err(|e| Error::Config(format!("Invalid auth_server URI {as_uri}: {e}")))
    }

    /// Fetch the metadata document. The request is not signed.
    pub async fn discover(fetch: &dyn HttpFetch, as_uri: &str) -> Result<Self> {
        let url = Self::well_known_url(as_uri)?;
        let endpoint = url.to_string();
        debug!(url = %endpoint, "Fetching UMA configuration");

        let response = fetch.fetch(OutboundRequest::get(url)).await?;
        if !response.status.is_success() {
            return Err(Error::unavailable(
                endpoint,
                format!("HTTP {}", response.status),
            ));
        }
        response
            .json()
            .map_err(|e| Error::unavailable(endpoint, format!("Invalid metadata: {e}")))
    }

    /// URL of `endpoint`, failing if the server does not advertise it.
    pub fn endpoint(&self, endpoint: Endpoint) -> Result<Url> {
        let value = match endpoint {
            Endpoint::Permission => self.permission_endpoint.as_deref(),
            Endpoint::Introspection => self.introspection_endpoint.as_deref(),
            Endpoint::ResourceRegistration => self.resource_registration_endpoint.as_deref(),
        };
        let key = endpoint.metadata_key();
        let value = value.ok_or_else(|| Error::unavailable(key, "not advertised in metadata"))?;
        Url::parse(value).map_err(|e| Error::unavailable(key, format!("invalid URL {value}: {e}")))
    }
}

/// Lazily discovered, process-wide metadata.
///
/// Concurrent callers share one discovery. A failed discovery is not cached,
/// so the next caller tries again.
pub struct AuthServerMetadata {
    as_uri: String,
    fetch: Arc<dyn HttpFetch>,
    cell: OnceCell<Arc<UmaConfiguration>>,
}

impl AuthServerMetadata {
    /// Metadata for the authorization server at `as_uri`.
    pub fn new(as_uri: impl Into<String>, fetch: Arc<dyn HttpFetch>) -> Self {
        Self {
            as_uri: as_uri.into(),
            fetch,
            cell: OnceCell::new(),
        }
    }

    /// Authorization server base URI.
    #[must_use]
    pub fn as_uri(&self) -> &str {
        &self.as_uri
    }

    /// Discovered metadata, fetching it on first use.
    pub async fn get(&self) -> Result<Arc<UmaConfiguration>> {
        self.cell
            .get_or_try_init(|| async {
                let config = UmaConfiguration::discover(self.fetch.as_ref(), &self.as_uri).await?;
                info!(as_uri = %self.as_uri, issuer = ?config.issuer, "Discovered authorization server");
                Ok(Arc::new(config))
            })
            .await
            .cloned()
    }

    /// Start discovery in the background so the first request does not pay for it.
    pub fn prefetch(self: &Arc<Self>) {
        let metadata = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = metadata.get().await {
                warn!(as_uri = %metadata.as_uri, error = %e, "Authorization server discovery failed; retrying on first request");
            }
        });
    }
}

impl std::fmt::Debug for AuthServerMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServerMetadata")
            .field("as_uri", &self.as_uri)
            .field("discovered", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::signing::ReqwestFetch;

    fn fetch() -> Arc<dyn HttpFetch> {
        Arc::new(ReqwestFetch::new(Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn well_known_url_ignores_trailing_slash() {
        assert_eq!(
            UmaConfiguration::well_known_url("https://as.example/uma/")
                .unwrap()
                .as_str(),
            "https://as.example/uma/.well-known/uma2-configuration"
        );
    }

    #[test]
    fn missing_endpoint_names_metadata_key() {
        let config = UmaConfiguration::default();
        let err = config.endpoint(Endpoint::Introspection).unwrap_err();
        assert!(matches!(
            err,
            Error::AuthorizationServerUnavailable { ref endpoint, .. } if endpoint == "introspection_endpoint"
        ));
    }

    #[tokio::test]
    async fn discovery_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uma/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://as.example",
                "permission_endpoint": "https://as.example/ticket",
                "introspection_endpoint": "https://as.example/introspect",
                "resource_registration_endpoint": "https://as.example/resources"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = AuthServerMetadata::new(format!("{}/uma", server.uri()), fetch());
        let (a, b) = tokio::join!(metadata.get(), metadata.get());
        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(
            a.endpoint(Endpoint::Permission).unwrap().as_str(),
            "https://as.example/ticket"
        );
        metadata.get().await.unwrap();
    }

    #[tokio::test]
    async fn failed_discovery_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "permission_endpoint": "https://as.example/ticket"
            })))
            .mount(&server)
            .await;

        let metadata = AuthServerMetadata::new(server.uri(), fetch());
        assert!(matches!(
            metadata.get().await,
            Err(Error::AuthorizationServerUnavailable { .. })
        ));
        assert!(metadata.get().await.is_ok());
    }

    #[tokio::test]
    async fn non_json_metadata_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = UmaConfiguration::discover(fetch().as_ref(), &server.uri())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid metadata"));
    }
}
