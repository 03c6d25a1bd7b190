//! Individual client connection management.
//!
//! Each connection wraps a WebSocket stream split into halves: the write half
//! is shared with documents as a [`Subscriber`], the read half drives the
//! connection's [`ConnectionSession`] on its own task.

use async_trait::async_trait;
use collab_core::{ConnectionId, ConnectionSession, DeliveryError, DocumentRegistry, Subscriber};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Write half of a client WebSocket, usable as a document subscriber.
pub struct ClientConnection {
    id: ConnectionId,
    write: Mutex<WsSink>,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, write: WsSink) -> Self {
        Self {
            id,
            write: Mutex::new(write),
        }
    }

    /// Send a close frame. Errors are ignored; the peer may already be gone.
    pub async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl Subscriber for ClientConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => DeliveryError::Closed(self.id),
                other => DeliveryError::Transport {
                    id: self.id,
                    reason: other.to_string(),
                },
            })
    }
}

/// Run one client connection until it closes.
///
/// Messages are handled in arrival order. The session is always closed on
/// the way out, which unsubscribes it from its document.
pub async fn serve_connection(
    id: ConnectionId,
    ws_stream: WebSocketStream<TcpStream>,
    registry: Arc<DocumentRegistry>,
) {
    let (write, read) = ws_stream.split();
    let connection = Arc::new(ClientConnection::new(id, write));
    let mut session = ConnectionSession::new(connection.clone(), registry);

    read_loop(id, read, &mut session).await;

    session.close().await;
    connection.close().await;
    info!("Connection {} closed", id);
}

async fn read_loop(id: ConnectionId, mut read: WsSource, session: &mut ConnectionSession) {
    loop {
        let data = match read.next().await {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame from {}", id);
                break;
            }
            Some(Err(e)) => {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!("Connection {} closed", id);
                    }
                    _ => {
                        error!("WebSocket error on {}: {}", id, e);
                    }
                }
                break;
            }
            None => {
                debug!("Connection {} stream ended", id);
                break;
            }
        };

        if let Err(e) = session.handle_message(&data).await {
            warn!("Rejected message from {}: {}", id, e);
        }
    }
}
