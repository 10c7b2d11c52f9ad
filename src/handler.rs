//! Session protocol
//!
//! Drives one connection through login, the message loop and logout. The
//! session state is an explicit enum; only `Authenticated` dispatches chat
//! traffic to the hub.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::AppError;
use crate::message::{Message, MessageType};
use crate::server::{LoginOutcome, ServerHandle};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for a login
    Unauthenticated,
    /// Logged in and registered under `username`
    Authenticated { username: String },
    /// Finished; the connection is closed
    Terminated,
}

/// Run the session protocol for one connection until it terminates
///
/// The connection is always closed on return, and an authenticated member
/// is always unregistered, whichever way the session ends.
pub async fn handle_connection(
    connection: Arc<Connection>,
    server: ServerHandle,
) -> Result<(), AppError> {
    debug!("Session started for {}", connection.peer_addr());

    let result = run_session(&connection, &server).await;
    connection.close().await;

    debug!("Session ended for {}", connection.peer_addr());
    result
}

async fn run_session(connection: &Arc<Connection>, server: &ServerHandle) -> Result<(), AppError> {
    let mut state = SessionState::Unauthenticated;

    loop {
        state = match state {
            SessionState::Unauthenticated => unauthenticated(connection, server).await?,
            SessionState::Authenticated { username } => {
                match authenticated(connection, server, username).await {
                    Ok(next) => next,
                    Err(e) => {
                        // The hub is gone; still try to leave the registry.
                        let _ = server.logout(connection.id()).await;
                        return Err(e);
                    }
                }
            }
            SessionState::Terminated => return Ok(()),
        };
    }
}

async fn unauthenticated(
    connection: &Arc<Connection>,
    server: &ServerHandle,
) -> Result<SessionState, AppError> {
    let message = match connection.read_message().await {
        Ok(message) => message,
        Err(AppError::UnknownMessageType(kind)) => {
            debug!(
                "Ignoring '{}' from unauthenticated {}",
                kind,
                connection.peer_addr()
            );
            return Ok(SessionState::Unauthenticated);
        }
        Err(e) => {
            debug!(
                "Unauthenticated {} dropped: {}",
                connection.peer_addr(),
                e
            );
            return Ok(SessionState::Terminated);
        }
    };

    if message.kind != MessageType::Login {
        debug!(
            "Ignoring {:?} from unauthenticated {}",
            message.kind,
            connection.peer_addr()
        );
        return Ok(SessionState::Unauthenticated);
    }

    let Some(username) = message.username() else {
        warn!(
            "Login without username from {}, disconnecting",
            connection.peer_addr()
        );
        return Ok(SessionState::Terminated);
    };

    match server.login(connection.clone(), username).await? {
        LoginOutcome::Accepted => Ok(SessionState::Authenticated {
            username: username.to_string(),
        }),
        LoginOutcome::Taken | LoginOutcome::Unavailable => Ok(SessionState::Terminated),
    }
}

async fn authenticated(
    connection: &Arc<Connection>,
    server: &ServerHandle,
    username: String,
) -> Result<SessionState, AppError> {
    let message = match connection.read_message().await {
        Ok(message) => message,
        Err(e) => return disconnect(connection, server, &username, e).await,
    };

    match message.kind {
        MessageType::Send => match message.text() {
            Some(text) => {
                server.send(connection.id(), text).await?;
                Ok(SessionState::Authenticated { username })
            }
            None => {
                let e = AppError::MalformedFrame("send without text content".to_string());
                disconnect(connection, server, &username, e).await
            }
        },
        MessageType::Logout => {
            info!("'{}' logged out", username);
            server.logout(connection.id()).await?;
            Ok(SessionState::Terminated)
        }
        MessageType::Login => {
            debug!("Ignoring repeated login from '{}'", username);
            Ok(SessionState::Authenticated { username })
        }
    }
}

/// Abnormal end of an authenticated session: same registry cleanup as a
/// logout, without any reply to the peer
async fn disconnect(
    connection: &Arc<Connection>,
    server: &ServerHandle,
    username: &str,
    reason: AppError,
) -> Result<SessionState, AppError> {
    if reason.is_protocol_violation() {
        warn!(
            "Protocol violation from '{}' ({}): {}",
            username,
            connection.peer_addr(),
            reason
        );
    } else {
        warn!(
            "Forcibly disconnected '{}' ({})",
            username,
            connection.peer_addr()
        );
    }

    server.logout(connection.id()).await?;
    Ok(SessionState::Terminated)
}
