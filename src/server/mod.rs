//! Resource server: wiring and lifecycle

mod flow;
mod router;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub use flow::{AuthorizationFlow, ReadOutcome, RegistrationOutcome, bearer_token};
pub use router::{AppState, create_router};

use crate::config::Config;
use crate::keys::KeyMaterialManager;
use crate::signing::{HttpFetch, ReqwestFetch, RequestSigner};
use crate::store::{self, KeyValueStore};
use crate::uma::{AuthServerMetadata, UmaClient};
use crate::{Error, Result};

/// The UMA resource server
pub struct ResourceServer {
    config: Config,
    state: Arc<AppState>,
    metadata: Arc<AuthServerMetadata>,
}

impl ResourceServer {
    /// Build the server from configuration, using `reqwest` for outbound calls.
    ///
    /// # Errors
    ///
    /// Returns an error if a store or the HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let fetch: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new(config.uma.timeout)?);
        let key_store = store::from_config(&config.keys.store)?;
        let resource_store = store::from_config(&config.resources.store)?;
        Ok(Self::with_components(config, fetch, key_store, resource_store))
    }

    /// Build the server around explicit collaborators.
    pub fn with_components(
        config: Config,
        fetch: Arc<dyn HttpFetch>,
        key_store: Arc<dyn KeyValueStore>,
        resource_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let base_url = config.server.public_base_url();
        let keys = Arc::new(KeyMaterialManager::new(
            key_store,
            config.keys.storage_key.clone(),
            config.keys.algorithm,
        ));
        let signer = Arc::new(RequestSigner::new(
            Arc::clone(&keys),
            Arc::clone(&fetch),
            base_url.clone(),
        ));
        let metadata = Arc::new(AuthServerMetadata::new(config.uma.auth_server.clone(), fetch));
        let uma = Arc::new(UmaClient::new(Arc::clone(&metadata), signer));
        let flow = Arc::new(AuthorizationFlow::new(
            resource_store,
            uma,
            config.uma.realm.clone(),
        ));

        let state = Arc::new(AppState {
            flow,
            keys,
            base_url,
        });

        Self {
            config,
            state,
            metadata,
        }
    }

    /// Router serving the resource and JWKS endpoints.
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Signing key manager.
    pub fn keys(&self) -> Arc<KeyMaterialManager> {
        Arc::clone(&self.state.keys)
    }

    /// Read/write flow, e.g. to observe registrations.
    pub fn flow(&self) -> Arc<AuthorizationFlow> {
        Arc::clone(&self.state.flow)
    }

    /// Bind and serve until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn run(self) -> Result<()> {
        // Discovery and key loading happen off the request path
        self.metadata.prefetch();
        let keys = self.keys();
        tokio::spawn(async move {
            if let Err(e) = keys.public_key().await {
                warn!(error = %e, "Signing key is not available yet");
            }
        });

        let listener = TcpListener::bind((self.config.server.host.as_str(), self.config.server.port))
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "Cannot listen on {}:{}: {e}",
                    self.config.server.host, self.config.server.port
                ))
            })?;

        info!("============================================================");
        info!("UMA RESOURCE SERVER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(base_url = %self.state.base_url, "Public base URL");
        info!(as_uri = %self.config.uma.auth_server, realm = %self.config.uma.realm, "Authorization server");
        info!(alg = %self.config.keys.algorithm, storage_key = %self.config.keys.storage_key, "Signing key");
        info!("============================================================");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
