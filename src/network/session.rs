//! Session types
//!
//! A session is the server-side record of one connected client: its identity
//! once authenticated, its transport handle, and its lifecycle phase.
//! Identity (`PlayerId`) and physical connection (`ConnId`) are distinct so
//! that a reconnecting client can take over its identity from a stale socket
//! while cleanup of the stale socket stays a guaranteed no-op.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::network::protocol::ServerMessage;

/// Stable player identifier, assigned at registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one physical connection.
///
/// Assigned at accept time, before any identity is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub Uuid);

impl ConnId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport is up, no identity yet.
    Unauthenticated,
    /// Identity established; the session is in the registry.
    Authenticated,
    /// Terminal. A closed session is never present in the registry.
    Closed,
}

/// Registry-side handle to an authenticated session.
///
/// Cloning is cheap; the sender and close signal are shared. The `mpsc`
/// sender is the only path to the peer, which keeps a single connection's
/// outbound writes strictly ordered through its writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Identity bound to this connection.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// The physical connection this identity currently rides on.
    pub conn_id: ConnId,
    /// Outbound message channel to the writer task.
    pub sender: mpsc::Sender<ServerMessage>,
    /// Signal that tells the reader loop to shut this connection down,
    /// used when a reconnect supersedes it.
    pub close: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle for a freshly authenticated connection.
    pub fn new(
        player_id: PlayerId,
        name: String,
        conn_id: ConnId,
        sender: mpsc::Sender<ServerMessage>,
        close: Arc<Notify>,
    ) -> Self {
        Self { player_id, name, conn_id, sender, close }
    }
}
