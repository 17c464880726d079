//! Lazily initialised, persisted signing key.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::jwk::StoredKey;
use super::{JwkSet, PrivateJwk, PublicJwk, SigningAlgorithm, material};
use crate::store::KeyValueStore;
use crate::{Error, Result};

/// Owns the server's signing key pair.
///
/// The first caller of [`private_key`](Self::private_key) loads the key from
/// the store or generates one; concurrent callers wait on the same
/// initialisation. A generated key is persisted with
/// [`KeyValueStore::set_if_absent`], so managers sharing a store converge on
/// whichever key landed first.
pub struct KeyMaterialManager {
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    algorithm: SigningAlgorithm,
    private: OnceCell<Arc<PrivateJwk>>,
    public: OnceCell<Arc<PublicJwk>>,
    generated: AtomicUsize,
}

impl KeyMaterialManager {
    /// Create a manager for the key stored under `storage_key`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        storage_key: impl Into<String>,
        algorithm: SigningAlgorithm,
    ) -> Self {
        Self {
            store,
            storage_key: storage_key.into(),
            algorithm,
            private: OnceCell::new(),
            public: OnceCell::new(),
            generated: AtomicUsize::new(0),
        }
    }

    /// Algorithm used when a key has to be generated.
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// The private key, loading or generating it on first use.
    pub async fn private_key(&self) -> Result<Arc<PrivateJwk>> {
        self.private
            .get_or_try_init(|| self.load_or_generate())
            .await
            .cloned()
    }

    /// The public key derived from [`private_key`](Self::private_key).
    pub async fn public_key(&self) -> Result<Arc<PublicJwk>> {
        self.public
            .get_or_try_init(|| async {
                let private = self.private_key().await?;
                material::public_key(&private).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Key set published at `/.well-known/jwks.json`.
    pub async fn jwks(&self) -> Result<JwkSet> {
        let public = self.public_key().await?;
        Ok(JwkSet::single(public.as_ref().clone()))
    }

    /// Number of keys this manager generated and persisted.
    pub fn generated_keys(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    async fn load_or_generate(&self) -> Result<Arc<PrivateJwk>> {
        if let Some(raw) = self.store.get(&self.storage_key).await? {
            let key = self.parse_stored(&raw)?;
            info!(kid = %key.kid(), alg = %key.alg, "Loaded signing key");
            return Ok(Arc::new(key));
        }

        let algorithm = self.algorithm;
        let generated = tokio::task::spawn_blocking(move || material::generate(algorithm))
            .await
            .map_err(|e| Error::Internal(format!("Key generation task failed: {e}")))??;
        let serialized = serde_json::to_string(&generated)?;

        if self
            .store
            .set_if_absent(&self.storage_key, serialized)
            .await?
        {
            self.generated.fetch_add(1, Ordering::Relaxed);
            info!(kid = %generated.kid(), alg = %generated.alg, "Generated signing key");
            return Ok(Arc::new(generated));
        }

        // Another writer persisted a key between our read and write
        debug!(storage_key = %self.storage_key, "Discarding generated key, adopting stored one");
        let raw = self.store.get(&self.storage_key).await?.ok_or_else(|| {
            Error::KeyStore(format!("Key '{}' vanished after a write race", self.storage_key))
        })?;
        Ok(Arc::new(self.parse_stored(&raw)?))
    }

    fn parse_stored(&self, raw: &str) -> Result<PrivateJwk> {
        let stored: StoredKey = serde_json::from_str(raw).map_err(|e| {
            Error::KeyStore(format!("Stored key '{}' is not a JWK: {e}", self.storage_key))
        })?;
        let mut key = stored.into_private().ok_or_else(|| {
            Error::KeyStore(format!("Stored key set '{}' is empty", self.storage_key))
        })?;

        if key.alg != self.algorithm {
            warn!(
                stored = %key.alg,
                configured = %self.algorithm,
                "Stored signing key uses a different algorithm than configured; keeping the stored key"
            );
        }

        // Older entries may lack a kid or carry a non-thumbprint one
        let public = material::public_key(&key)?;
        key.kid = Some(public.kid);
        Ok(key)
    }
}

impl std::fmt::Debug for KeyMaterialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterialManager")
            .field("storage_key", &self.storage_key)
            .field("algorithm", &self.algorithm)
            .field("initialised", &self.private.initialized())
            .finish_non_exhaustive()
    }
}
