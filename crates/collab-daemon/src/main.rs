//! collab-daemon: Serves shared documents over WebSockets.
//!
//! Clients JOIN a document by name, then push ephemeral edits or commits;
//! every change is broadcast to the document's other subscribers and commits
//! are stored under the storage directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use collab_core::{DocumentRegistry, RevisionStore};
use collab_daemon::{Args, CollabServer, NativeFs, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,collab_daemon=debug,collab_core=debug"
    } else {
        "info,collab_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from(&args);

    info!("Starting collab-daemon");
    info!("Storage root: {:?}", config.storage_root);
    info!("Listen address: {}", config.listen_addr());

    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .with_context(|| format!("Failed to create storage root {:?}", config.storage_root))?;

    let fs = NativeFs::new(config.storage_root.clone());
    let registry = Arc::new(DocumentRegistry::new(RevisionStore::new(Arc::new(fs))));
    let server = CollabServer::new(registry);
    let listener = CollabServer::bind(&config.listen_addr()).await?;

    info!("Server running. Press Ctrl+C to stop.");

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down");
    Ok(())
}
