//! Per-resource read and write contract.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::store::KeyValueStore;
use crate::uma::{UmaClient, challenge};
use crate::{Error, Result};

/// Buffered registration outcomes per subscriber.
const REGISTRATION_CHANNEL_CAPACITY: usize = 64;

/// Result of an authorized read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Stored content
    Found(String),
    /// The token is valid but nothing is stored under the URI
    NotFound,
}

/// Completion of a background resource registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The authorization server accepted the resource
    Registered {
        /// Resource URI
        resource: String,
        /// Identifier assigned by the authorization server
        id: String,
    },
    /// Registration failed; the stored content is kept
    Failed {
        /// Resource URI
        resource: String,
        /// Failure description
        reason: String,
    },
}

/// Challenge, introspection and registration around the resource store.
///
/// Reads without a bearer token fail with [`Error::Unauthenticated`]
/// carrying a fresh ticket. Reads with a token are gated on introspection.
/// Writes are create-once and trigger a registration that runs in the
/// background; its outcome is logged and published to
/// [`subscribe_registrations`](Self::subscribe_registrations) receivers.
pub struct AuthorizationFlow {
    resources: Arc<dyn KeyValueStore>,
    uma: Arc<UmaClient>,
    realm: String,
    registrations: broadcast::Sender<RegistrationOutcome>,
}

impl AuthorizationFlow {
    /// Flow over `resources`, talking to the authorization server through `uma`.
    pub fn new(resources: Arc<dyn KeyValueStore>, uma: Arc<UmaClient>, realm: impl Into<String>) -> Self {
        let (registrations, _) = broadcast::channel(REGISTRATION_CHANNEL_CAPACITY);
        Self {
            resources,
            uma,
            realm: realm.into(),
            registrations,
        }
    }

    /// Receive outcomes of registrations started after this call.
    pub fn subscribe_registrations(&self) -> broadcast::Receiver<RegistrationOutcome> {
        self.registrations.subscribe()
    }

    /// Read `resource_uri` on behalf of a client presenting `authorization`.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthenticated`] when no bearer token is present
    /// - [`Error::TokenInvalid`] when introspection reports the token inactive
    /// - [`Error::AuthorizationServerUnavailable`] when the ticket or
    ///   introspection call fails
    #[instrument(skip(self, authorization), fields(bearer = authorization.and_then(bearer_token).is_some()))]
    pub async fn handle_read(
        &self,
        resource_uri: &str,
        authorization: Option<&str>,
    ) -> Result<ReadOutcome> {
        let Some(token) = authorization.and_then(bearer_token) else {
            let ticket = self.uma.request_ticket(resource_uri).await?;
            debug!("Issuing UMA challenge");
            return Err(Error::Unauthenticated {
                challenge: challenge(&self.realm, self.uma.as_uri(), &ticket),
            });
        };

        if !self.uma.introspect(token).await?.is_active() {
            return Err(Error::TokenInvalid);
        }

        Ok(match self.resources.get(resource_uri).await? {
            Some(content) => ReadOutcome::Found(content),
            None => ReadOutcome::NotFound,
        })
    }

    /// Store `content` under `resource_uri` unless something is already there.
    ///
    /// Returns once the content is stored; registration continues in the
    /// background and never affects the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the URI was written before.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn handle_write(&self, resource_uri: &str, content: String) -> Result<()> {
        if !self.resources.set_if_absent(resource_uri, content).await? {
            return Err(Error::AlreadyExists(resource_uri.to_string()));
        }
        info!("Stored resource");

        self.spawn_registration(resource_uri.to_string());
        Ok(())
    }

    fn spawn_registration(&self, resource: String) {
        let uma = Arc::clone(&self.uma);
        let outcomes = self.registrations.clone();
        let span = info_span!("registration", resource = %resource);

        tokio::spawn(
            async move {
                let outcome = match uma.register_resource().await {
                    Ok(id) => {
                        info!(id = %id, "Registered resource");
                        RegistrationOutcome::Registered { resource, id }
                    }
                    Err(e) => {
                        warn!(error = %e, "Resource registration failed");
                        RegistrationOutcome::Failed {
                            resource,
                            reason: e.to_string(),
                        }
                    }
                };
                // No subscribers is fine
                let _ = outcomes.send(outcome);
            }
            .instrument(span),
        );
    }
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow")
            .field("realm", &self.realm)
            .field("as_uri", &self.uma.as_uri())
            .finish_non_exhaustive()
    }
}

/// Token of an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
