//! Chat client
//!
//! Thin TCP client for the relay protocol, used by the terminal client and
//! by the end-to-end tests.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::codec::{self, FrameReader};
use crate::error::AppError;
use crate::message::{ChatEntry, LoginStatus, Message, MessageType};

/// Connected client
#[derive(Debug)]
pub struct ChatClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    username: Option<String>,
}

impl ChatClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, AppError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(reader),
            writer,
            username: None,
        })
    }

    /// Username after a successful login
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Send a login request and wait for the response
    ///
    /// Returns true when the server accepted the username. The chat history
    /// frame that follows an accepted login is left for `recv`.
    pub async fn login(&mut self, username: &str) -> Result<bool, AppError> {
        self.write(&Message::login(username)).await?;

        loop {
            let reply = self.recv().await?;
            if reply.kind != MessageType::Login {
                continue;
            }
            let accepted = reply.status() == Some(LoginStatus::Ok.as_str());
            if accepted {
                self.username = Some(username.to_string());
            }
            return Ok(accepted);
        }
    }

    /// Send one chat message
    pub async fn send(&mut self, text: &str) -> Result<(), AppError> {
        let username = self.username.clone().unwrap_or_default();
        self.write(&Message::send(username, text)).await
    }

    pub async fn logout(&mut self) -> Result<(), AppError> {
        let username = self.username.take().unwrap_or_default();
        self.write(&Message::logout(username)).await
    }

    /// Wait for the next frame from the server
    pub async fn recv(&mut self) -> Result<Message, AppError> {
        self.reader.read_frame().await
    }

    /// Write a raw message; used to exercise protocol edge cases
    pub async fn write(&mut self, message: &Message) -> Result<(), AppError> {
        let frame = codec::encode(message)?;
        self.write_raw(&frame).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|_| AppError::ConnectionClosed)
    }

    /// Split into independent receive and send halves
    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, ClientSender) {
        (
            self.reader,
            ClientSender {
                writer: self.writer,
                username: self.username.unwrap_or_default(),
            },
        )
    }
}

/// Sending half of a split client
#[derive(Debug)]
pub struct ClientSender {
    writer: OwnedWriteHalf,
    username: String,
}

impl ClientSender {
    pub async fn send(&mut self, text: &str) -> Result<(), AppError> {
        self.write(&Message::send(self.username.clone(), text)).await
    }

    pub async fn logout(&mut self) -> Result<(), AppError> {
        self.write(&Message::logout(self.username.clone())).await
    }

    async fn write(&mut self, message: &Message) -> Result<(), AppError> {
        let frame = codec::encode(message)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|_| AppError::ConnectionClosed)
    }
}

/// Render an entry the way the terminal client prints it
pub fn format_entry(entry: &ChatEntry) -> String {
    format!("({}) {}: {}", entry.timestamp, entry.member, entry.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_entry() {
        let entry = ChatEntry::with_timestamp("alice", "hi", "Monday 09:15");
        assert_eq!(format_entry(&entry), "(Monday 09:15) alice: hi");
    }
}
