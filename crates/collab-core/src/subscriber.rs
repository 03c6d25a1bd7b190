//! Outbound side of a live connection.
//!
//! A document only knows its subscribers through this trait, so the engine
//! runs the same over WebSockets (collab-daemon) and over in-process channels
//! (tests).

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifies one connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Failure to hand one event to one subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Timed out sending to {0}")]
    TimedOut(ConnectionId),

    #[error("Failed to send to {id}: {reason}")]
    Transport { id: ConnectionId, reason: String },
}

/// A live endpoint that receives serialized server events.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Deliver one serialized event. Returns once the transport accepted it.
    async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError>;
}

/// Subscriber backed by an unbounded channel.
///
/// Used by tests and in-process clients; sending fails once the receiver is
/// dropped.
pub struct ChannelSubscriber {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(id: ConnectionId) -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { id, tx }), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        self.tx
            .send(payload)
            .map_err(|_| DeliveryError::Closed(self.id))
    }
}
