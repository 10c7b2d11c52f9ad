//! TCP listener and session scheduling
//!
//! Accepts connections on a dedicated task and spawns one session task per
//! connection. Owns the chat hub task and drives shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::server::{ChatServer, ServerHandle, ServerSnapshot};
use crate::storage::ChatLog;

type Sessions = Arc<AsyncMutex<JoinSet<()>>>;

/// A running chat relay
pub struct Listener {
    local_addr: SocketAddr,
    server: ServerHandle,
    /// Stops the accept loop
    accepting: CancellationToken,
    /// Parent of every connection's close token
    connections: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    sessions: Sessions,
    /// Set once a graceful stop has drained every session
    stopped: OnceCell<()>,
    aborted: AtomicBool,
}

impl Listener {
    /// Bind `config.host:config.port` and start accepting
    ///
    /// `config.max_connections` is the concurrency hint: when set, at most
    /// that many sessions run at once and further clients wait in the
    /// backlog until a slot frees up.
    pub async fn start(config: &ServerConfig, log: Box<dyn ChatLog>) -> Result<Self, AppError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        info!("Chat relay listening on {}", local_addr);

        let (server, handle) = ChatServer::new(log);
        tokio::spawn(server.run());

        let accepting = CancellationToken::new();
        let connections = CancellationToken::new();
        let sessions: Sessions = Arc::new(AsyncMutex::new(JoinSet::new()));
        let limit = config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        let accept_task = tokio::spawn(accept_loop(AcceptLoop {
            listener,
            server: handle.clone(),
            accepting: accepting.clone(),
            connections: connections.clone(),
            sessions: sessions.clone(),
            limit,
            options: config.connection_options(),
        }));

        Ok(Self {
            local_addr,
            server: handle,
            accepting,
            connections,
            accept_task: Mutex::new(Some(accept_task)),
            sessions,
            stopped: OnceCell::new(),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current members and chat history
    pub async fn snapshot(&self) -> Result<ServerSnapshot, AppError> {
        self.server.snapshot().await
    }

    /// True once `stop` has finished or `abort` was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.initialized() || self.aborted.load(Ordering::SeqCst)
    }

    /// Graceful shutdown
    ///
    /// Stops accepting, closes the log and every connection, then waits for
    /// all sessions to finish their disconnect path. Every caller, including
    /// concurrent ones, returns only after the drain is complete. If a
    /// caller is dropped midway, the next call picks the drain back up.
    /// After `abort` this returns immediately.
    pub async fn stop(&self) {
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        self.stopped.get_or_init(|| self.drain()).await;
    }

    async fn drain(&self) {
        info!("Stopping chat relay");

        self.accepting.cancel();
        if let Some(task) = self.take_accept_task() {
            let _ = task.await;
        }

        // Wake the hub first: it may be parked writing to a peer that
        // stopped reading, and the shutdown command queues behind that write.
        self.connections.cancel();
        if let Err(e) = self.server.shutdown().await {
            warn!("Chat hub unavailable during shutdown: {}", e);
        }

        let mut sessions = self.sessions.lock().await;
        while let Some(result) = sessions.join_next().await {
            if let Err(e) = result {
                warn!("Session task failed: {}", e);
            }
        }
        info!("Chat relay stopped");
    }

    /// Immediate best-effort shutdown
    ///
    /// Cancels everything and aborts session tasks without waiting for them.
    /// The hub is told to close the log and member sockets from a detached
    /// task, so a full command queue delays that step instead of losing it.
    pub fn abort(&self) {
        if self.stopped.initialized() || self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Aborting chat relay");

        self.accepting.cancel();
        self.connections.cancel();
        if let Some(task) = self.take_accept_task() {
            task.abort();
        }
        // A running stop holds the set; its sessions are already cancelled
        if let Ok(mut sessions) = self.sessions.try_lock() {
            sessions.abort_all();
        }

        let server = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.shutdown().await {
                warn!("Chat hub did not take shutdown request: {}", e);
            }
        });
    }

    fn take_accept_task(&self) -> Option<JoinHandle<()>> {
        self.accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accepting.cancel();
        self.connections.cancel();
    }
}

struct AcceptLoop {
    listener: TcpListener,
    server: ServerHandle,
    accepting: CancellationToken,
    connections: CancellationToken,
    sessions: Sessions,
    limit: Option<Arc<Semaphore>>,
    options: ConnectionOptions,
}

async fn accept_loop(ctx: AcceptLoop) {
    loop {
        let permit = match &ctx.limit {
            Some(limit) => tokio::select! {
                _ = ctx.accepting.cancelled() => break,
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let accepted = tokio::select! {
            _ = ctx.accepting.cancelled() => break,
            accepted = ctx.listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);
                let connection = Arc::new(Connection::from_tcp(
                    stream,
                    peer_addr,
                    ctx.options,
                    ctx.connections.child_token(),
                ));
                let server = ctx.server.clone();

                let mut sessions = ctx.sessions.lock().await;
                if ctx.accepting.is_cancelled() {
                    connection.close().await;
                    break;
                }
                while sessions.try_join_next().is_some() {}
                sessions.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = handle_connection(connection, server).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }

    debug!("Accept loop stopped");
}
