//! ChatServer actor implementation
//!
//! The chat hub owns the member registry and the chat log. Sessions talk to
//! it through `ServerHandle`; commands are handled one at a time, which makes
//! every register, unregister and append+broadcast step atomic with respect
//! to the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::AppError;
use crate::message::{ChatEntry, LoginStatus, Message};
use crate::registry::MemberRegistry;
use crate::storage::ChatLog;

/// Channel buffer size for server commands
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Result of a login command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Registered; the reply and history were already written
    Accepted,
    /// Username in use; the rejection reply was already written
    Taken,
    /// Server is shutting down; nothing was written
    Unavailable,
}

/// Point-in-time view of the hub state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSnapshot {
    /// Sorted usernames of current members
    pub members: Vec<String>,
    /// Full chat history in append order
    pub history: Vec<ChatEntry>,
}

/// Commands sent from sessions to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Authenticate a connection under a username
    Login {
        connection: Arc<Connection>,
        username: String,
        reply: oneshot::Sender<LoginOutcome>,
    },
    /// Member left, explicitly or by disconnect
    Logout { connection_id: ConnectionId },
    /// Member sent a chat message
    Send {
        connection_id: ConnectionId,
        content: String,
    },
    /// Read the current members and history
    Snapshot {
        reply: oneshot::Sender<ServerSnapshot>,
    },
    /// Close the log and every member connection
    Shutdown { reply: oneshot::Sender<()> },
}

/// Log shared with the blocking pool for the duration of one append
type SharedLog = Arc<Mutex<Box<dyn ChatLog>>>;

/// The main ChatServer actor
pub struct ChatServer {
    registry: MemberRegistry,
    log: SharedLog,
    receiver: mpsc::Receiver<ServerCommand>,
    shut_down: bool,
}

/// Cloneable sending side of the ChatServer command channel
#[derive(Debug, Clone)]
pub struct ServerHandle {
    sender: mpsc::Sender<ServerCommand>,
}

impl ChatServer {
    /// Create a ChatServer over `log` together with its handle
    pub fn new(log: Box<dyn ChatLog>) -> (Self, ServerHandle) {
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let server = Self {
            registry: MemberRegistry::new(),
            log: Arc::new(Mutex::new(log)),
            receiver,
            shut_down: false,
        };
        (server, ServerHandle { sender })
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        self.close_log();
        info!("ChatServer shutting down");
    }

    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Login {
                connection,
                username,
                reply,
            } => {
                let outcome = self.handle_login(connection, username).await;
                let _ = reply.send(outcome);
            }
            ServerCommand::Logout { connection_id } => {
                self.handle_logout(connection_id);
            }
            ServerCommand::Send {
                connection_id,
                content,
            } => {
                self.handle_send(connection_id, content).await;
            }
            ServerCommand::Snapshot { reply } => {
                let _ = reply.send(ServerSnapshot {
                    members: self.registry.usernames(),
                    history: self.history(),
                });
            }
            ServerCommand::Shutdown { reply } => {
                self.handle_shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    /// Register, reply, and replay history in one step so no live
    /// broadcast can reach the new member before its history does
    async fn handle_login(&mut self, connection: Arc<Connection>, username: String) -> LoginOutcome {
        if self.shut_down {
            return LoginOutcome::Unavailable;
        }

        if !self.registry.try_register(connection.clone(), &username) {
            info!(
                "Login as '{}' from {} rejected: username taken",
                username,
                connection.peer_addr()
            );
            let reply = Message::login_response(&username, LoginStatus::Taken);
            if let Err(e) = connection.write_message(&reply).await {
                debug!("Could not deliver rejection to {}: {}", connection.id(), e);
            }
            return LoginOutcome::Taken;
        }

        connection.set_username(&username);
        info!(
            "Connected client {} as '{}'",
            connection.peer_addr(),
            username
        );

        let reply = Message::login_response(&username, LoginStatus::Ok);
        let history = Message::entries(self.history());
        let delivered = match connection.write_message(&reply).await {
            Ok(()) => connection.write_message(&history).await,
            Err(e) => Err(e),
        };
        if let Err(e) = delivered {
            warn!("Failed to greet '{}': {}", username, e);
            connection.close().await;
        }

        debug!("Total members: {}", self.registry.len());
        LoginOutcome::Accepted
    }

    fn handle_logout(&mut self, connection_id: ConnectionId) {
        if let Some(connection) = self.registry.unregister(connection_id) {
            info!(
                "Disconnected client {} ('{}')",
                connection.peer_addr(),
                connection.username().unwrap_or_default()
            );
            debug!("Total members: {}", self.registry.len());
        }
    }

    /// Append then broadcast, both inside this command
    ///
    /// A storage failure is reported and the message is delivered anyway.
    async fn handle_send(&mut self, connection_id: ConnectionId, content: String) {
        if self.shut_down {
            debug!("Dropping message from {}: server shutting down", connection_id);
            return;
        }

        let Some(username) = self.registry.username_of(connection_id) else {
            debug!("Dropping message from unregistered {}", connection_id);
            return;
        };

        let entry = ChatEntry::now(username, content);
        if let Err(e) = self.append(entry.clone()).await {
            warn!("Chat entry kept in memory only: {}", e);
        }

        let message = Message::entries(vec![entry]);
        let report = match self.registry.broadcast(&message, None).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Broadcast failed: {}", e);
                return;
            }
        };

        for (connection, e) in report.failed {
            warn!(
                "Delivery to {} failed, closing: {}",
                connection.peer_addr(),
                e
            );
            connection.close().await;
        }
        debug!("Message delivered to {} members", report.delivered);
    }

    async fn handle_shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Closing chat log and {} member connections", self.registry.len());

        self.close_log();
        for connection in self.registry.connections() {
            connection.close().await;
        }
    }

    fn history(&self) -> Vec<ChatEntry> {
        lock_log(&self.log).all().to_vec()
    }

    /// Persist one entry on the blocking pool
    ///
    /// The hub awaits the write before taking the next command, so entries
    /// still land in command order, but the runtime thread stays free for
    /// session reads and writes while the file is rewritten.
    async fn append(&self, entry: ChatEntry) -> Result<(), AppError> {
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || lock_log(&log).append(entry))
            .await
            .map_err(|e| AppError::Io(std::io::Error::other(e)))?
    }

    fn close_log(&mut self) {
        if let Err(e) = lock_log(&self.log).close() {
            warn!("Failed to close chat log: {}", e);
        }
    }
}

fn lock_log(log: &Mutex<Box<dyn ChatLog>>) -> MutexGuard<'_, Box<dyn ChatLog>> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServerHandle {
    async fn request(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.sender.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }

    /// Try to authenticate `connection` as `username`
    pub async fn login(
        &self,
        connection: Arc<Connection>,
        username: impl Into<String>,
    ) -> Result<LoginOutcome, AppError> {
        let (reply, outcome) = oneshot::channel();
        self.request(ServerCommand::Login {
            connection,
            username: username.into(),
            reply,
        })
        .await?;
        outcome.await.map_err(|_| AppError::ChannelSend)
    }

    pub async fn logout(&self, connection_id: ConnectionId) -> Result<(), AppError> {
        self.request(ServerCommand::Logout { connection_id }).await
    }

    pub async fn send(
        &self,
        connection_id: ConnectionId,
        content: impl Into<String>,
    ) -> Result<(), AppError> {
        self.request(ServerCommand::Send {
            connection_id,
            content: content.into(),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<ServerSnapshot, AppError> {
        let (reply, snapshot) = oneshot::channel();
        self.request(ServerCommand::Snapshot { reply }).await?;
        snapshot.await.map_err(|_| AppError::ChannelSend)
    }

    /// Close the log and member connections; waits until done
    pub async fn shutdown(&self) -> Result<(), AppError> {
        let (reply, done) = oneshot::channel();
        self.request(ServerCommand::Shutdown { reply }).await?;
        done.await.map_err(|_| AppError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{pipe, Peer};
    use crate::message::MessageType;
    use crate::storage::JsonFileLog;
    use tempfile::{tempdir, TempDir};

    fn start() -> (ServerHandle, TempDir) {
        let dir = tempdir().unwrap();
        let log = JsonFileLog::load(dir.path().join("storage.json")).unwrap();
        let (server, handle) = ChatServer::new(Box::new(log));
        tokio::spawn(server.run());
        (handle, dir)
    }

    async fn login(handle: &ServerHandle, name: &str) -> (Arc<Connection>, Peer) {
        let (conn, mut peer) = pipe();
        let outcome = handle.login(conn.clone(), name).await.unwrap();
        assert_eq!(outcome, LoginOutcome::Accepted);
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.status(), Some("ok"));
        let history = peer.recv().await.unwrap();
        assert_eq!(history.kind, MessageType::Send);
        (conn, peer)
    }

    #[tokio::test]
    async fn test_login_sends_reply_then_history() {
        let (handle, _dir) = start();
        let (alice, _alice_peer) = login(&handle, "alice").await;
        assert_eq!(alice.username(), Some("alice"));

        handle.send(alice.id(), "hi").await.unwrap();

        let (conn, mut peer) = pipe();
        handle.login(conn, "bob").await.unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply, Message::login_response("bob", LoginStatus::Ok));
        let history = peer.recv().await.unwrap();
        let entries = history.chat_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].member, "alice");
        assert_eq!(entries[0].message, "hi");
    }

    #[tokio::test]
    async fn test_taken_username_gets_rejection() {
        let (handle, _dir) = start();
        let _carol = login(&handle, "carol").await;

        let (conn, mut peer) = pipe();
        let outcome = handle.login(conn.clone(), "carol").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Taken);
        assert_eq!(
            peer.recv().await.unwrap().status(),
            Some("this username is already taken")
        );
        assert!(conn.username().is_none());
        assert_eq!(handle.snapshot().await.unwrap().members, vec!["carol"]);
    }

    #[tokio::test]
    async fn test_send_appends_and_echoes_to_sender() {
        let (handle, _dir) = start();
        let (alice, mut alice_peer) = login(&handle, "alice").await;
        let (_bob, mut bob_peer) = login(&handle, "bob").await;

        handle.send(alice.id(), "hello").await.unwrap();

        for peer in [&mut alice_peer, &mut bob_peer] {
            let frame = peer.recv().await.unwrap();
            let entries = frame.chat_entries().unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].member, "alice");
            assert_eq!(entries[0].message, "hello");
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn test_send_from_unregistered_is_dropped() {
        let (handle, _dir) = start();
        let (stranger, _peer) = pipe();

        handle.send(stranger.id(), "sneaky").await.unwrap();
        assert!(handle.snapshot().await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_still_broadcasts() {
        let dir = tempdir().unwrap();
        let log = JsonFileLog::load(dir.path().join("no-such-dir").join("storage.json")).unwrap();
        let (server, handle) = ChatServer::new(Box::new(log));
        tokio::spawn(server.run());

        let (alice, mut alice_peer) = login(&handle, "alice").await;
        handle.send(alice.id(), "still here").await.unwrap();

        let frame = alice_peer.recv().await.unwrap();
        assert_eq!(frame.chat_entries().unwrap()[0].message, "still here");
        assert_eq!(handle.snapshot().await.unwrap().history.len(), 1);
    }

    /// Log that records which thread ran each append
    struct ThreadRecordingLog {
        entries: Vec<ChatEntry>,
        append_threads: Arc<Mutex<Vec<std::thread::ThreadId>>>,
    }

    impl ChatLog for ThreadRecordingLog {
        fn all(&self) -> &[ChatEntry] {
            &self.entries
        }

        fn append(&mut self, entry: ChatEntry) -> Result<(), AppError> {
            self.append_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            self.entries.push(entry);
            Ok(())
        }

        fn close(&mut self) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_appends_run_off_the_runtime_thread() {
        let append_threads = Arc::new(Mutex::new(Vec::new()));
        let log = ThreadRecordingLog {
            entries: Vec::new(),
            append_threads: append_threads.clone(),
        };
        let (server, handle) = ChatServer::new(Box::new(log));
        tokio::spawn(server.run());

        let (alice, mut alice_peer) = login(&handle, "alice").await;
        handle.send(alice.id(), "one").await.unwrap();
        handle.send(alice.id(), "two").await.unwrap();

        for expected in ["one", "two"] {
            let frame = alice_peer.recv().await.unwrap();
            assert_eq!(frame.chat_entries().unwrap()[0].message, expected);
        }
        let history = handle.snapshot().await.unwrap().history;
        assert_eq!(history[0].message, "one");
        assert_eq!(history[1].message, "two");

        let runtime_thread = std::thread::current().id();
        let append_threads = append_threads.lock().unwrap();
        assert_eq!(append_threads.len(), 2);
        assert!(append_threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_logout_frees_username() {
        let (handle, _dir) = start();
        let (alice, _peer) = login(&handle, "alice").await;

        handle.logout(alice.id()).await.unwrap();
        handle.logout(alice.id()).await.unwrap();
        assert!(handle.snapshot().await.unwrap().members.is_empty());

        let _again = login(&handle, "alice").await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_members_and_is_idempotent() {
        let (handle, _dir) = start();
        let (alice, _peer) = login(&handle, "alice").await;

        handle.shutdown().await.unwrap();
        handle.shutdown().await.unwrap();
        assert!(alice.is_closed());

        let (late, _late_peer) = pipe();
        assert_eq!(
            handle.login(late, "late").await.unwrap(),
            LoginOutcome::Unavailable
        );
    }
}
