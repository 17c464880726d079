//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::keys::SigningAlgorithm;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authorization server configuration
    pub uma: UmaConfig,
    /// Signing key configuration
    pub keys: KeysConfig,
    /// Resource storage configuration
    pub resources: ResourcesConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (UMA_RS_ prefix)
        figment = figment.merge(Env::prefixed("UMA_RS_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract configuration from an already assembled figment
    ///
    /// # Errors
    ///
    /// Returns an error if the merged sources do not form a valid configuration.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} expansion can see their values
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL-valued settings
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.uma.auth_server = Self::expand_string(&re, &self.uma.auth_server);
        if let Some(base_url) = self.server.base_url.as_mut() {
            *base_url = Self::expand_string(&re, base_url);
        }
        for store in [&mut self.keys.store, &mut self.resources.store] {
            if let StoreConfig::File { path } = store {
                *path = PathBuf::from(Self::expand_string(&re, &path.to_string_lossy()));
            }
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of this server. Resource URIs and the signing
    /// identity (`HttpSig cred`) are derived from it.
    /// Defaults to `http://{host}:{port}`.
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_url: None,
        }
    }
}

impl ServerConfig {
    /// Resolved public base URL, without a trailing slash
    #[must_use]
    pub fn public_base_url(&self) -> String {
        self.base_url.as_deref().map_or_else(
            || format!("http://{}:{}", self.host, self.port),
            |url| url.trim_end_matches('/').to_string(),
        )
    }
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UmaConfig {
    /// Authorization server base URI (the `as_uri` of the challenge)
    pub auth_server: String,
    /// Realm advertised in the `WWW-Authenticate` challenge
    pub realm: String,
    /// Timeout for every outbound call to the authorization server
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UmaConfig {
    fn default() -> Self {
        Self {
            auth_server: "http://localhost:4000/uma".to_string(),
            realm: "solid".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Algorithm of the generated key pair
    pub algorithm: SigningAlgorithm,
    /// Store entry the private key is persisted under
    pub storage_key: String,
    /// Backing store for the key
    pub store: StoreConfig,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::Es256,
            storage_key: "uma-rs-signing-key".to_string(),
            store: StoreConfig::Memory,
        }
    }
}

/// Resource storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Backing store for resource content
    pub store: StoreConfig,
}

/// Key-value store selection
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map
    #[default]
    Memory,
    /// One JSON file per entry below `path`
    File {
        /// Directory holding the entries
        path: PathBuf,
    },
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
