//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// UMA resource server - ticket challenges, token introspection and signed
/// requests to the authorization server
#[derive(Parser, Debug)]
#[command(name = "uma-resource-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "UMA_RS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "UMA_RS_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "UMA_RS_HOST")]
    pub host: Option<String>,

    /// Public base URL of this server
    #[arg(long, env = "UMA_RS_BASE_URL")]
    pub base_url: Option<String>,

    /// Authorization server URI
    #[arg(long, env = "UMA_RS_AUTH_SERVER", global = true)]
    pub auth_server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "UMA_RS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "UMA_RS_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(base_url) = &self.base_url {
            config.server.base_url = Some(base_url.clone());
        }
        if let Some(auth_server) = &self.auth_server {
            config.uma.auth_server.clone_from(auth_server);
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the resource server (default)
    Serve,

    /// Print the public key set, generating the key if the store has none
    Jwks,
}
