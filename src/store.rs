//! Key-value storage shared by the key manager and the resource handler.
//!
//! Write-once resources and single-generation signing keys are both built on
//! [`KeyValueStore::set_if_absent`], which must be atomic per key.
//!
//! - [`MemoryStore`]: a `DashMap`, contents live for the process lifetime.
//! - [`FileStore`]: one JSON file per key. Entries are written to a temp
//!   file and hard-linked into place, so the check-and-set holds across
//!   processes sharing the directory and readers never see a partial entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::{Error, Result};

/// Storage capability used for key material and resource content.
///
/// Implementations must be `Send + Sync` because the store is shared
/// across request tasks.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically store `value` unless `key` already holds a value.
    ///
    /// Returns `true` if this call created the entry.
    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool>;
}

/// Build the store selected in the configuration.
///
/// # Errors
///
/// Returns an error if a file store directory cannot be created.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::File { path } => Arc::new(FileStore::new(path.clone())?),
    })
}

/// In-memory store backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool> {
        use dashmap::mapref::entry::Entry;
        // The entry guard holds the shard lock across check and insert
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(value);
                Ok(true)
            }
        }
    }
}

/// On-disk envelope so the original key survives hashing of the file name.
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    value: String,
}

/// File-backed store: one JSON document per key below a base directory.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a file store rooted at `base_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            std::fs::create_dir_all(&base_dir)
                .map_err(|e| Error::KeyStore(format!("Failed to create store dir: {e}")))?;
        }
        Ok(Self { base_dir })
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn entry_path(&self, key: &str) -> PathBuf {
        let hash = Sha256::digest(key.as_bytes());
        let name = format!("{hash:x}");
        self.base_dir.join(format!("{}.json", &name[..32]))
    }

    fn scratch_path(&self, suffix: &str) -> PathBuf {
        self.base_dir.join(format!(".{}.{suffix}", Uuid::new_v4()))
    }

    fn encode(key: &str, value: String) -> Result<Vec<u8>> {
        let entry = FileEntry {
            key: key.to_string(),
            value,
        };
        Ok(serde_json::to_vec_pretty(&entry)?)
    }

    async fn restrict_permissions(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = tokio::fs::set_permissions(path, perms).await;
        }
        #[cfg(not(unix))]
        let _ = path;
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => {
                debug!(path = %path.display(), "Ignoring empty store entry");
                Ok(None)
            }
            Ok(bytes) => {
                let entry: FileEntry = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::KeyStore(format!("Corrupt store entry {}: {e}", path.display()))
                })?;
                if entry.key != key {
                    return Err(Error::KeyStore(format!(
                        "Store entry {} belongs to a different key",
                        path.display()
                    )));
                }
                Ok(Some(entry.value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::KeyStore(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set_if_absent(&self, key: &str, value: String) -> Result<bool> {
        let path = self.entry_path(key);
        let tmp = self.write_temp(&Self::encode(key, value)?).await?;

        let created = self.link_entry(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        if matches!(created, Ok(true)) {
            debug!(path = %path.display(), "Created entry");
        }
        created
    }
}

impl FileStore {
    /// Write `contents` to a fresh temp file and flush it to disk.
    async fn write_temp(&self, contents: &[u8]) -> Result<PathBuf> {
        let tmp = self.scratch_path("tmp");
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .await?;
            file.write_all(contents).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::KeyStore(format!(
                "Failed to write {}: {e}",
                tmp.display()
            )));
        }
        Self::restrict_permissions(&tmp).await;
        Ok(tmp)
    }

    /// Publish `tmp` as `path` unless a complete entry is already there.
    async fn link_entry(&self, tmp: &Path, path: &Path) -> Result<bool> {
        for _ in 0..3 {
            match tokio::fs::hard_link(tmp, path).await {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !self.reclaim_empty(path).await? {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    return Err(Error::KeyStore(format!(
                        "Failed to create {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(false)
    }

    /// Remove an empty entry left behind by an interrupted write.
    ///
    /// Returns `true` if `path` is free again.
    async fn reclaim_empty(&self, path: &Path) -> Result<bool> {
        let io_err = |e: std::io::Error| Error::KeyStore(format!("Failed to inspect {}: {e}", path.display()));

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() == 0 => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(io_err(e)),
        }

        // Move it aside first so a complete entry linked in the meantime is not lost
        let aside = self.scratch_path("stale");
        match tokio::fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(io_err(e)),
        }

        let len = tokio::fs::metadata(&aside).await.map_err(io_err)?.len();
        if len == 0 {
            warn!(path = %path.display(), "Discarding empty store entry");
            let _ = tokio::fs::remove_file(&aside).await;
            return Ok(true);
        }

        let restored = tokio::fs::hard_link(&aside, path).await;
        let _ = tokio::fs::remove_file(&aside).await;
        match restored {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }
}
