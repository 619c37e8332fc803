//! Parlor Lobby Server
//!
//! Entry point: wires the auth gate and registry together and runs the
//! WebSocket accept loop until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parlor::network::auth::{AuthConfig, AuthGate, JwtTokenService, MemoryDirectory};
use parlor::network::server::{LobbyServer, ServerConfig};
use parlor::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Parlor Server v{}", VERSION);

    let auth_config = AuthConfig::from_env();
    let secret = match auth_config.secret {
        Some(secret) => secret,
        None => {
            warn!("AUTH_SECRET not set; using an ephemeral secret, tokens will not survive restarts");
            uuid::Uuid::new_v4().to_string()
        }
    };

    let directory = Arc::new(MemoryDirectory::new());
    let tokens = Arc::new(JwtTokenService::new(secret));
    let gate = AuthGate::new(directory.clone(), tokens, directory);

    let config = ServerConfig::from_env();
    let server = Arc::new(LobbyServer::new(config, gate));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown_server.shutdown();
        }
    });

    server.run().await.context("lobby server terminated")?;

    info!("goodbye");
    Ok(())
}
