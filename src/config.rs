//! Server configuration
//!
//! Parsed once from the command line at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::connection::ConnectionOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "chat_relay")]
#[command(about = "Minimal TCP chat relay speaking newline-delimited JSON", long_about = None)]
pub struct ServerConfig {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = 7070)]
    pub port: u16,

    /// Chat log file
    #[arg(short = 's', long, default_value = "storage.json")]
    pub storage: PathBuf,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum size of one incoming frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Per-write timeout in seconds, 0 disables it
    #[arg(long, default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_frame_size: self.max_frame_size,
            write_timeout: (self.write_timeout_secs > 0)
                .then(|| Duration::from_secs(self.write_timeout_secs)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::parse_from(["chat_relay"])
    }
}
