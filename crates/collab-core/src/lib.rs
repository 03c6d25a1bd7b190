//! collab-core: Shared-document synchronization engine.
//!
//! This crate provides:
//! - A content-addressed revision store over a `FileSystem` abstraction
//! - Live documents with subscriber fan-out (last write wins)
//! - A registry that creates, hydrates and evicts documents by name
//! - The JSON wire protocol and the per-connection session state machine
//!
//! It is transport-agnostic: connections are reached through the
//! [`Subscriber`] trait.

pub mod document;
pub mod fingerprint;
pub mod fs;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod subscriber;

pub use document::{Document, DocumentError};
pub use fingerprint::RevisionId;
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use protocol::{ClientRequest, ProtocolError, ServerEvent, MAX_MESSAGE_SIZE};
pub use registry::DocumentRegistry;
pub use session::{ConnectionSession, SessionError, SessionState};
pub use store::{RevisionStore, StoreError};
pub use subscriber::{ChannelSubscriber, ConnectionId, DeliveryError, Subscriber};
