//! collab-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod native_fs;
pub mod server;

pub use config::{Args, ServerConfig};
pub use connection::ClientConnection;
pub use native_fs::NativeFs;
pub use server::CollabServer;
