//! metadrop: TCP file upload server
//!
//! Accepts framed uploads (metadata header, payload, digest), writes each
//! payload to the storage directory and replies with a SHAKE-128 digest of
//! what was received.
//!
//! Configuration via CLI arguments or TOML file.

use metadrop::config::Config;
use metadrop::server::Server;
use metadrop::storage::DirectoryStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        storage_dir = %config.storage_dir.display(),
        max_frames = ?config.max_frames,
        accept_timeout_ms = config.accept_timeout.as_millis() as u64,
        read_timeout_ms = config.read_timeout.as_millis() as u64,
        "Initializing metadrop server"
    );

    let store = Arc::new(DirectoryStore::new(&config.storage_dir)?);
    let mut server = Server::new(config, store);

    server.start()?;
    server.run()?;
    Ok(())
}
