//! WebSocket server accepting client connections.
//!
//! Every accepted connection gets its own task that upgrades the stream and
//! runs a session against the shared document registry.

use crate::connection::serve_connection;
use anyhow::Result;
use collab_core::{ConnectionId, DocumentRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

pub struct CollabServer {
    registry: Arc<DocumentRegistry>,
    /// Counter for generating connection IDs
    next_conn_id: AtomicU64,
}

impl CollabServer {
    pub fn new(registry: Arc<DocumentRegistry>) -> Self {
        Self {
            registry,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.accept_connection(stream, addr),
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    /// Hand a new TCP connection to its own task.
    ///
    /// The WebSocket upgrade happens on that task so a slow handshake never
    /// holds up the accept loop.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let id = ConnectionId::new(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    // Health checks (like `nc -z`) connect and immediately close
                    // without completing the WebSocket handshake.
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
            };

            info!("New connection from {} ({})", addr, id);
            serve_connection(id, ws_stream, registry).await;
        });
    }
}
