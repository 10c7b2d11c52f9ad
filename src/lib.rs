//! Minimal TCP Chat Relay Library
//!
//! Clients connect over TCP, log in with a unique username and exchange
//! short text messages. Every message is appended to a JSON file log and
//! fanned out to all connected members.
//!
//! # Protocol
//! One JSON object per line:
//! - `{"type":"login","username":"alice"}` → `{"type":"login","username":"alice","status":"ok"}`
//!   followed by the full history as `{"type":"send","content":[...]}`
//! - `{"type":"send","username":"alice","content":"hi"}` → broadcast of
//!   `{"type":"send","content":[{"member":"alice","message":"hi","timestamp":"Monday 14:05"}]}`
//!   to every member, sender included
//! - `{"type":"logout","username":"alice"}`
//!
//! # Architecture
//! - `Listener` accepts sockets and spawns one session task per connection
//! - each session runs the login → message loop → logout state machine
//! - `ChatServer` is an actor owning the member registry and the chat log;
//!   sessions talk to it over an `mpsc` channel, which serializes every
//!   registration and every append+broadcast
//!
//! # Example
//! ```ignore
//! use chat_relay::{JsonFileLog, Listener, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let log = JsonFileLog::load(&config.storage).unwrap();
//!     let listener = Listener::start(&config, Box::new(log)).await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     listener.stop().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod handler;
pub mod listener;
pub mod logger;
pub mod message;
pub mod registry;
pub mod server;
pub mod storage;

// Re-export main types for convenience
pub use client::ChatClient;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionOptions};
pub use error::AppError;
pub use handler::{handle_connection, SessionState};
pub use listener::Listener;
pub use message::{ChatEntry, Content, LoginStatus, Message, MessageType};
pub use registry::{BroadcastReport, MemberRegistry};
pub use server::{ChatServer, LoginOutcome, ServerCommand, ServerHandle, ServerSnapshot};
pub use storage::{ChatLog, JsonFileLog};
