//! UMA Resource Server

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use uma_resource_server::{
    cli::{Cli, Command},
    config::Config,
    keys::KeyMaterialManager,
    server::ResourceServer,
    setup_tracing, store,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut config);

    match cli.command {
        Some(Command::Jwks) => print_jwks(&config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Run the resource server
async fn run_server(config: Config) -> ExitCode {
    let server = match ResourceServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => {
            info!("Resource server shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print the JWKS for the configured key store
async fn print_jwks(config: &Config) -> ExitCode {
    let key_store = match store::from_config(&config.keys.store) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open key store: {e}");
            return ExitCode::FAILURE;
        }
    };
    let keys = KeyMaterialManager::new(key_store, config.keys.storage_key.clone(), config.keys.algorithm);

    let jwks = match keys.jwks().await {
        Ok(jwks) => jwks,
        Err(e) => {
            error!("Failed to load signing key: {e}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&jwks) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize JWKS: {e}");
            ExitCode::FAILURE
        }
    }
}
