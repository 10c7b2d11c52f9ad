//! Newline-delimited JSON framing
//!
//! Each frame is one compact JSON object followed by a single `\n`. JSON
//! string escaping guarantees the delimiter never occurs inside a payload.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::AppError;
use crate::message::{Message, MessageType};

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Default cap on buffered bytes for a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Serialize a message into one frame, delimiter included
pub fn encode(message: &Message) -> Result<Vec<u8>, AppError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(DELIMITER);
    Ok(bytes)
}

/// Parse the bytes of one frame, delimiter excluded
///
/// The `type` field is checked before the full decode so that a well-formed
/// object with an unsupported type is reported as `UnknownMessageType`
/// rather than `MalformedFrame`.
pub fn decode(frame: &[u8]) -> Result<Message, AppError> {
    let value: Value = serde_json::from_slice(frame)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::MalformedFrame("missing \"type\" field".to_string()))?;

    if MessageType::from_wire(kind).is_none() {
        return Err(AppError::UnknownMessageType(kind.to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Reads frames from a byte stream, accumulating partial reads
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
            max_frame_size,
        }
    }

    /// Wait for the next complete frame and decode it
    ///
    /// End of stream before a delimiter, or any read error, is
    /// `ConnectionClosed`.
    pub async fn read_frame(&mut self) -> Result<Message, AppError> {
        self.buf.clear();

        loop {
            let (done, used) = {
                let available = self
                    .inner
                    .fill_buf()
                    .await
                    .map_err(|_| AppError::ConnectionClosed)?;

                if available.is_empty() {
                    return Err(AppError::ConnectionClosed);
                }

                match available.iter().position(|&b| b == DELIMITER) {
                    Some(pos) => {
                        self.buf.extend_from_slice(&available[..pos]);
                        (true, pos + 1)
                    }
                    None => {
                        self.buf.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            };
            self.inner.consume(used);

            if self.buf.len() > self.max_frame_size {
                return Err(AppError::FrameTooLarge {
                    limit: self.max_frame_size,
                });
            }
            if done {
                return decode(&self.buf);
            }
        }
    }
}
