//! UMA Resource Server Library
//!
//! A resource server for User-Managed Access: clients without a token get a
//! `WWW-Authenticate: UMA` challenge carrying a permission ticket, and clients
//! presenting a bearer token are admitted once the authorization server's
//! introspection endpoint reports it active.
//!
//! # Features
//!
//! - **Challenge flow**: ticket request, 401 challenge, token introspection
//! - **Resource registration**: background registration of written resources
//! - **Signed requests**: RFC 9421 HTTP Message Signatures on every call to
//!   the authorization server, identified by `HttpSig cred="<base url>"`
//! - **Key management**: lazily generated, persisted key pair published at
//!   `/.well-known/jwks.json`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod server;
pub mod signing;
pub mod store;
pub mod uma;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
