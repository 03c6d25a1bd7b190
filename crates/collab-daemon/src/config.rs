//! Command-line configuration.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "collab-daemon")]
#[command(about = "Collaborative document server")]
pub struct Args {
    /// Host to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 7600)]
    pub port: u16,

    /// Directory holding committed revisions
    #[arg(short, long, default_value = "commits")]
    pub storage: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Settings the server needs from its launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub storage_root: PathBuf,
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_host: args.host.clone(),
            listen_port: args.port,
            storage_root: args.storage.clone(),
        }
    }
}
