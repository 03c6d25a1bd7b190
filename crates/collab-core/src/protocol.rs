//! Wire protocol: one JSON object per WebSocket message.
//!
//! Client requests:
//! - `{"type":"JOIN","document":"notes"}` (must come first)
//! - `{"type":"SET_STATE","text":"..."}` (ephemeral)
//! - `{"type":"COMMIT","text":"..."}` (persisted as a revision)
//! - `{"type":"LIST_REVISIONS"}`
//!
//! Older clients send `START_CONN`, `SET_TEXT`, `ADD_COMMIT` and `GET_COMMITS`
//! with the payload in `value`; those decode to the same requests.
//!
//! Server events:
//! - `{"type":"subscribers","count":3}`
//! - `{"type":"state","text":"..."}`
//! - `{"type":"revisions","ids":["..."]}`
//! - `{"type":"error","message":"..."}` (sent to the offending client only)

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::fingerprint::RevisionId;

/// Maximum inbound message size (16MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message exceeds max size ({size} > {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("{0} received before JOIN")]
    NotJoined(&'static str),

    #[error("Session already joined {0}")]
    AlreadyJoined(String),

    #[error("Invalid document name: {0}")]
    InvalidDocument(String),
}

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    #[serde(alias = "START_CONN")]
    Join {
        #[serde(alias = "value")]
        document: String,
    },
    #[serde(alias = "SET_TEXT")]
    SetState {
        #[serde(alias = "value")]
        text: String,
    },
    #[serde(alias = "ADD_COMMIT")]
    Commit {
        #[serde(alias = "value")]
        text: String,
    },
    #[serde(alias = "GET_COMMITS")]
    ListRevisions,
}

impl ClientRequest {
    /// Parse a request from raw message bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Wire name of the request, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::Join { .. } => "JOIN",
            ClientRequest::SetState { .. } => "SET_STATE",
            ClientRequest::Commit { .. } => "COMMIT",
            ClientRequest::ListRevisions => "LIST_REVISIONS",
        }
    }
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Subscribers { count: usize },
    State { text: String },
    Revisions { ids: Vec<String> },
    Error { message: String },
}

impl ServerEvent {
    pub fn revisions(ids: &[RevisionId]) -> Self {
        ServerEvent::Revisions {
            ids: ids.iter().map(|id| id.as_str().to_string()).collect(),
        }
    }

    /// Serialize once so the same payload can be shared by every subscriber.
    pub fn to_json(&self) -> Arc<str> {
        serde_json::to_string(self)
            .expect("ServerEvent serialization should not fail")
            .into()
    }

    /// Try to parse an event from JSON.
    pub fn from_json(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}
