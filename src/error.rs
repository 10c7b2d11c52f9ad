//! Error types for the chat relay
//!
//! A single application error enum covers transport, protocol and storage
//! failures. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
///
/// Transport and protocol errors end one session only. Storage errors are
/// fatal at startup (`StorageUnavailable`) or reported and survived at
/// runtime (`StorageWriteError`).
#[derive(Debug, Error)]
pub enum AppError {
    /// Peer went away, the socket failed, or the connection was closed locally
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame bytes are not a valid message object
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame is valid JSON but carries a `type` we do not speak
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// More than `limit` bytes buffered without a frame delimiter
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Chat log could not be loaded at startup
    #[error("storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// Chat log could not be rewritten after an append
    #[error("storage write failed at {path}: {reason}")]
    StorageWriteError { path: PathBuf, reason: String },

    /// IO error outside a session (bind, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The chat hub task has stopped and no longer accepts commands
    #[error("Channel send error")]
    ChannelSend,
}

impl AppError {
    /// True for errors that come from the peer violating the protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AppError::MalformedFrame(_)
                | AppError::UnknownMessageType(_)
                | AppError::FrameTooLarge { .. }
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedFrame(err.to_string())
    }
}
