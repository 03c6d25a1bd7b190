//! Per-connection protocol state machine.
//!
//! ```text
//! CONNECTED --JOIN--> SUBSCRIBED --(requests)--> SUBSCRIBED
//!     |                   |
//!     +------close--------+-----> CLOSED
//! ```
//!
//! A session is bound to at most one document for its whole lifetime. Bad
//! requests are reported back to the sender as `error` events and never end
//! the session.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::document::{Document, DocumentError};
use crate::protocol::{ClientRequest, ProtocolError, ServerEvent};
use crate::registry::DocumentRegistry;
use crate::store::{validate_document_name, StoreError};
use crate::subscriber::{ConnectionId, Subscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Subscribed,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Session is closed")]
    Closed,
}

pub struct ConnectionSession {
    connection: Arc<dyn Subscriber>,
    registry: Arc<DocumentRegistry>,
    document: Option<Arc<Document>>,
    closed: bool,
}

impl ConnectionSession {
    pub fn new(connection: Arc<dyn Subscriber>, registry: Arc<DocumentRegistry>) -> Self {
        Self {
            connection,
            registry,
            document: None,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.document.is_some() {
            SessionState::Subscribed
        } else {
            SessionState::Connected
        }
    }

    /// The document this session joined, if any.
    pub fn document(&self) -> Option<&Arc<Document>> {
        self.document.as_ref()
    }

    /// Handle one inbound message.
    ///
    /// On error the sender has already been notified; the caller only needs
    /// to log it.
    pub async fn handle_message(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let result = match ClientRequest::from_json(data) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            self.report(e).await;
        }
        result
    }

    async fn dispatch(&mut self, request: ClientRequest) -> Result<(), SessionError> {
        let kind = request.kind();
        let Some(document) = self.document.clone() else {
            return match request {
                ClientRequest::Join { document } => self.join(&document).await,
                _ => Err(ProtocolError::NotJoined(kind).into()),
            };
        };

        debug!("{} {} on {}", self.id(), kind, document.name());
        match request {
            ClientRequest::Join { .. } => {
                Err(ProtocolError::AlreadyJoined(document.name().to_string()).into())
            }
            ClientRequest::SetState { text } => {
                document.apply_update(text, false).await?;
                Ok(())
            }
            ClientRequest::Commit { text } => {
                document.apply_update(text, true).await?;
                Ok(())
            }
            ClientRequest::ListRevisions => {
                document.send_revisions(self.id()).await?;
                Ok(())
            }
        }
    }

    async fn join(&mut self, name: &str) -> Result<(), SessionError> {
        validate_document_name(name).map_err(|e| match e {
            StoreError::InvalidDocumentName { reason, .. } => {
                ProtocolError::InvalidDocument(reason.to_string())
            }
            other => ProtocolError::InvalidDocument(other.to_string()),
        })?;

        let document = self
            .registry
            .join(name, Arc::clone(&self.connection))
            .await?;
        info!("{} subscribed to {}", self.id(), name);
        self.document = Some(document);
        Ok(())
    }

    async fn report(&self, error: &SessionError) {
        let event = ServerEvent::Error {
            message: error.to_string(),
        };
        if let Err(e) = self.connection.send(event.to_json()).await {
            debug!("Could not report error to {}: {}", self.id(), e);
        }
    }

    /// End the session, leaving the joined document. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let Some(document) = self.document.take() else {
            debug!("{} closed before joining", self.id());
            return;
        };

        let remaining = document.unsubscribe(self.id()).await;
        // A subscriber may join between unsubscribe and evict; evict re-checks.
        if remaining == 0 && !self.registry.evict(document.name()).await {
            debug!("{} was re-joined before eviction", document.name());
        }
    }
}
