//! Member registry
//!
//! Maps authenticated connections to their usernames. Mutating methods take
//! `&mut self`; the chat hub owns the registry, so concurrent logins are
//! serialized before they reach `try_register`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::codec;
use crate::connection::{Connection, ConnectionId};
use crate::error::AppError;
use crate::message::Message;

#[derive(Debug)]
struct Member {
    username: String,
    connection: Arc<Connection>,
}

/// Outcome of one broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Number of members that received the frame
    pub delivered: usize,
    /// Members whose write failed
    pub failed: Vec<(Arc<Connection>, AppError)>,
}

/// Registry of logged-in members, keyed by connection
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: HashMap<ConnectionId, Member>,
}

impl MemberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `username` unless the name is held
    ///
    /// A connection that is already registered cannot register again.
    pub fn try_register(&mut self, connection: Arc<Connection>, username: &str) -> bool {
        if self.members.contains_key(&connection.id()) || self.is_taken(username) {
            return false;
        }

        self.members.insert(
            connection.id(),
            Member {
                username: username.to_string(),
                connection,
            },
        );
        true
    }

    /// Remove a member, returning its connection if it was registered
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.members.remove(&id).map(|member| member.connection)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn username_of(&self, id: ConnectionId) -> Option<&str> {
        self.members.get(&id).map(|member| member.username.as_str())
    }

    pub fn is_taken(&self, username: &str) -> bool {
        self.members.values().any(|member| member.username == username)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Usernames of all members, sorted
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .values()
            .map(|member| member.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of member connections
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.members
            .values()
            .map(|member| member.connection.clone())
            .collect()
    }

    /// Deliver `message` to every member, optionally skipping one
    ///
    /// Writes run concurrently. A failed write is recorded in the report
    /// and does not affect delivery to anyone else.
    pub async fn broadcast(
        &self,
        message: &Message,
        excluding: Option<ConnectionId>,
    ) -> Result<BroadcastReport, AppError> {
        let frame = codec::encode(message)?;

        let targets: Vec<Arc<Connection>> = self
            .members
            .iter()
            .filter(|(id, _)| Some(**id) != excluding)
            .map(|(_, member)| member.connection.clone())
            .collect();

        let results = join_all(targets.iter().map(|conn| conn.write_frame(&frame))).await;

        let mut report = BroadcastReport::default();
        for (connection, result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failed.push((connection, e)),
            }
        }
        Ok(report)
    }
}
