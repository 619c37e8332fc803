//! Lobby Registry
//!
//! Authoritative in-memory state: every lobby and every authenticated
//! session. All mutation happens under a single `RwLock` critical section;
//! each operation runs to completion before the lock is released, so
//! observers never see a lobby roster inconsistent with the session map.
//!
//! Operations never perform transport I/O. Instead they return a batch of
//! [`Delivery`] items whose payloads were snapshotted under the lock; the
//! [`Broadcaster`](crate::network::broadcast::Broadcaster) sends them after
//! the lock is dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::network::auth::Identity;
use crate::network::broadcast::Delivery;
use crate::network::protocol::{LobbySnapshot, PlayerSummary, ServerMessage};
use crate::network::session::{ConnId, PlayerId, SessionHandle};

/// Unique lobby identifier, generated at creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LobbyId(pub Uuid);

impl LobbyId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named, capacity-bounded group of sessions waiting to start a game.
#[derive(Debug)]
struct Lobby {
    id: LobbyId,
    name: String,
    max_players: usize,
    is_private: bool,
    /// Compared verbatim on join; empty means no password. Never leaves
    /// the registry boundary.
    password: String,
    /// Members in join order, unique by player id.
    members: Vec<PlayerId>,
    /// Members that have signaled start. Always a subset of `members`.
    ready: BTreeSet<PlayerId>,
}

/// Join failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    /// No lobby with that id.
    #[error("lobby not found")]
    NotFound,

    /// Every seat is taken.
    #[error("lobby is full")]
    Full,

    /// The supplied password did not match.
    #[error("incorrect password")]
    WrongPassword,
}

/// The acting session is not in the registry. Can only happen when a
/// request races with that session's own disconnect or supersession.
#[derive(Debug, Clone, Copy, Error)]
#[error("session not registered")]
pub struct UnknownSession;

/// Outcome of binding an authenticated identity to the registry.
#[derive(Debug)]
pub struct AttachOutcome {
    /// Directory snapshot for the welcome envelope.
    pub directory: Vec<LobbySnapshot>,
    /// Stale session superseded by this attach, if any. The caller signals
    /// it to close; its lobby membership carries over to the new transport.
    pub superseded: Option<SessionHandle>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    lobbies: BTreeMap<LobbyId, Lobby>,
    sessions: BTreeMap<PlayerId, SessionHandle>,
    /// Which lobby each player occupies. A player appears here iff they
    /// appear in exactly one lobby's member list.
    member_of: BTreeMap<PlayerId, LobbyId>,
}

/// Process-wide authoritative store of lobbies and sessions.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an authenticated identity to the registry.
    ///
    /// If a session already exists for this player id (a stale socket from
    /// a previous connection), the new transport takes over the identity:
    /// the old handle is returned for closing and any lobby membership is
    /// retained.
    pub async fn attach_session(&self, handle: SessionHandle) -> AttachOutcome {
        let mut inner = self.inner.write().await;
        let superseded = inner.sessions.insert(handle.player_id, handle);
        AttachOutcome {
            directory: directory_snapshot(&inner),
            superseded,
        }
    }

    /// Create a new lobby with the owner as its sole member.
    ///
    /// `max_players` is clamped to at least 1. If the owner is currently a
    /// member of another lobby they implicitly leave it first, inside the
    /// same critical section, so the at-most-one-lobby invariant holds.
    pub async fn create_lobby(
        &self,
        owner: &Identity,
        name: String,
        max_players: usize,
        is_private: bool,
        password: String,
    ) -> Result<(LobbySnapshot, Vec<Delivery>), UnknownSession> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&owner.player_id) {
            return Err(UnknownSession);
        }

        let mut deliveries = remove_membership(&mut inner, owner.player_id);

        let lobby = Lobby {
            id: LobbyId::generate(),
            name,
            max_players: max_players.max(1),
            is_private,
            password,
            members: vec![owner.player_id],
            ready: BTreeSet::new(),
        };
        let lobby_id = lobby.id;
        debug!(%lobby_id, owner = %owner.player_id, "lobby created");

        let snapshot = lobby_snapshot(&inner, &lobby);
        inner.member_of.insert(owner.player_id, lobby_id);
        inner.lobbies.insert(lobby_id, lobby);

        deliveries.extend(global_lobby_list(&inner));
        Ok((snapshot, deliveries))
    }

    /// Add a player to a lobby.
    ///
    /// A duplicate join by a current member is an idempotent success that
    /// returns the current snapshot and broadcasts nothing. Joining while a
    /// member of a different lobby implicitly leaves that lobby first.
    pub async fn join_lobby(
        &self,
        joiner: &Identity,
        lobby_id: LobbyId,
        password: &str,
    ) -> Result<(LobbySnapshot, Vec<Delivery>), JoinError> {
        let mut inner = self.inner.write().await;

        {
            let lobby = inner.lobbies.get(&lobby_id).ok_or(JoinError::NotFound)?;
            if lobby.members.contains(&joiner.player_id) {
                let snapshot = lobby_snapshot(&inner, lobby);
                return Ok((snapshot, Vec::new()));
            }
            if lobby.members.len() >= lobby.max_players {
                return Err(JoinError::Full);
            }
            if lobby.password != password {
                return Err(JoinError::WrongPassword);
            }
        }

        let mut deliveries = remove_membership(&mut inner, joiner.player_id);

        // Implicit leave above cannot have emptied the target lobby: the
        // joiner was checked not to be a member of it.
        if let Some(lobby) = inner.lobbies.get_mut(&lobby_id) {
            lobby.members.push(joiner.player_id);
        }
        inner.member_of.insert(joiner.player_id, lobby_id);
        debug!(%lobby_id, player = %joiner.player_id, "player joined lobby");

        let lobby = &inner.lobbies[&lobby_id];
        let snapshot = lobby_snapshot(&inner, lobby);
        deliveries.extend(scoped_lobby_update(&inner, lobby));
        deliveries.extend(global_lobby_list(&inner));
        Ok((snapshot, deliveries))
    }

    /// Remove a player from a lobby. No-op if the player is not a member.
    ///
    /// Returns whether a membership was actually removed, so the caller
    /// knows whether to acknowledge.
    pub async fn leave_lobby(
        &self,
        player_id: PlayerId,
        lobby_id: LobbyId,
    ) -> (bool, Vec<Delivery>) {
        let mut inner = self.inner.write().await;
        if inner.member_of.get(&player_id) != Some(&lobby_id) {
            return (false, Vec::new());
        }

        let mut deliveries = remove_membership(&mut inner, player_id);
        deliveries.extend(global_lobby_list(&inner));
        (true, deliveries)
    }

    /// Add or remove a player from a lobby's ready roster.
    ///
    /// No-op when the lobby is absent, the player is not a member, or the
    /// roster already reflects the request. Ready-state changes are scoped
    /// to the lobby's members; public directory metadata is unchanged.
    pub async fn set_ready(
        &self,
        player_id: PlayerId,
        lobby_id: LobbyId,
        ready: bool,
    ) -> Vec<Delivery> {
        let mut inner = self.inner.write().await;
        let changed = match inner.lobbies.get_mut(&lobby_id) {
            Some(lobby) if lobby.members.contains(&player_id) => {
                if ready {
                    lobby.ready.insert(player_id)
                } else {
                    lobby.ready.remove(&player_id)
                }
            }
            _ => false,
        };

        if !changed {
            return Vec::new();
        }
        debug!(%lobby_id, player = %player_id, ready, "ready roster changed");
        let lobby = &inner.lobbies[&lobby_id];
        scoped_lobby_update(&inner, lobby)
    }

    /// Disconnect cleanup: remove the session from its lobby (if any) and
    /// from the session map, then notify all remaining sessions.
    ///
    /// Idempotent per connection: if the session map no longer holds this
    /// `(player_id, conn_id)` pair — already cleaned up, or superseded by a
    /// newer transport — nothing happens.
    pub async fn disconnect(&self, player_id: PlayerId, conn_id: ConnId) -> Vec<Delivery> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get(&player_id) {
            Some(handle) if handle.conn_id == conn_id => {}
            _ => return Vec::new(),
        }

        let mut deliveries = remove_membership(&mut inner, player_id);
        inner.sessions.remove(&player_id);
        debug!(player = %player_id, %conn_id, "session closed");

        deliveries.extend(global_lobby_list(&inner));
        deliveries
    }

    /// Password-stripped snapshot of every lobby.
    pub async fn directory(&self) -> Vec<LobbySnapshot> {
        let inner = self.inner.read().await;
        directory_snapshot(&inner)
    }

    /// Number of authenticated sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// The lobby a player currently occupies, if any.
    pub async fn lobby_of(&self, player_id: PlayerId) -> Option<LobbyId> {
        self.inner.read().await.member_of.get(&player_id).copied()
    }
}

/// Remove a player from whichever lobby they occupy, deleting the lobby if
/// it empties. Returns the scoped update for the survivors (empty when the
/// lobby is gone or the player was in none).
fn remove_membership(inner: &mut RegistryInner, player_id: PlayerId) -> Vec<Delivery> {
    let Some(lobby_id) = inner.member_of.remove(&player_id) else {
        return Vec::new();
    };

    let emptied = match inner.lobbies.get_mut(&lobby_id) {
        Some(lobby) => {
            lobby.members.retain(|id| *id != player_id);
            lobby.ready.remove(&player_id);
            lobby.members.is_empty()
        }
        None => return Vec::new(),
    };

    if emptied {
        inner.lobbies.remove(&lobby_id);
        debug!(%lobby_id, "empty lobby removed");
        return Vec::new();
    }

    let lobby = &inner.lobbies[&lobby_id];
    scoped_lobby_update(inner, lobby)
}

/// Snapshot one lobby. Member names come from the session map; a member
/// without a session cannot exist while the lock is held.
fn lobby_snapshot(inner: &RegistryInner, lobby: &Lobby) -> LobbySnapshot {
    LobbySnapshot {
        id: lobby.id,
        name: lobby.name.clone(),
        max_players: lobby.max_players,
        is_private: lobby.is_private,
        players: lobby
            .members
            .iter()
            .filter_map(|id| {
                inner.sessions.get(id).map(|handle| PlayerSummary {
                    id: *id,
                    name: handle.name.clone(),
                })
            })
            .collect(),
        ready: lobby.ready.iter().copied().collect(),
    }
}

fn directory_snapshot(inner: &RegistryInner) -> Vec<LobbySnapshot> {
    inner
        .lobbies
        .values()
        .map(|lobby| lobby_snapshot(inner, lobby))
        .collect()
}

/// Scoped notification: one `lobby_updated` per current member.
fn scoped_lobby_update(inner: &RegistryInner, lobby: &Lobby) -> Vec<Delivery> {
    let snapshot = lobby_snapshot(inner, lobby);
    lobby
        .members
        .iter()
        .filter_map(|id| inner.sessions.get(id))
        .map(|handle| Delivery {
            target: handle.clone(),
            message: ServerMessage::LobbyUpdated { lobby: snapshot.clone() },
        })
        .collect()
}

/// Global notification: one `lobby_list` per connected session.
fn global_lobby_list(inner: &RegistryInner) -> Vec<Delivery> {
    let lobbies = directory_snapshot(inner);
    inner
        .sessions
        .values()
        .map(|handle| Delivery {
            target: handle.clone(),
            message: ServerMessage::LobbyList { lobbies: lobbies.clone() },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Notify};

    fn session(name: &str) -> (Identity, SessionHandle, mpsc::Receiver<ServerMessage>) {
        let identity = Identity {
            player_id: PlayerId::generate(),
            name: name.to_string(),
        };
        let (tx, rx) = mpsc::channel(32);
        let handle = SessionHandle::new(
            identity.player_id,
            identity.name.clone(),
            ConnId::generate(),
            tx,
            Arc::new(Notify::new()),
        );
        (identity, handle, rx)
    }

    async fn attached(registry: &Registry, name: &str) -> (Identity, mpsc::Receiver<ServerMessage>) {
        let (identity, handle, rx) = session(name);
        registry.attach_session(handle).await;
        (identity, rx)
    }

    #[tokio::test]
    async fn test_create_join_capacity_roundtrip() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;
        let (eve, _rx_e) = attached(&registry, "eve").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 2, false, String::new())
            .await
            .unwrap();
        assert_eq!(snapshot.players.len(), 1);

        let (snapshot, _) = registry
            .join_lobby(&bob, snapshot.id, "")
            .await
            .unwrap();
        let ids: Vec<_> = snapshot.players.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![ada.player_id, bob.player_id], "join order preserved");

        let result = registry.join_lobby(&eve, snapshot.id, "").await;
        assert_eq!(result.unwrap_err(), JoinError::Full);
    }

    #[tokio::test]
    async fn test_password_gate() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Locked".into(), 4, true, "abc".into())
            .await
            .unwrap();

        let result = registry.join_lobby(&bob, snapshot.id, "xyz").await;
        assert_eq!(result.unwrap_err(), JoinError::WrongPassword);

        assert!(registry.join_lobby(&bob, snapshot.id, "abc").await.is_ok());
    }

    #[tokio::test]
    async fn test_join_missing_lobby() {
        let registry = Registry::new();
        let (ada, _rx) = attached(&registry, "ada").await;

        let result = registry.join_lobby(&ada, LobbyId::generate(), "").await;
        assert_eq!(result.unwrap_err(), JoinError::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_join_is_idempotent() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, snapshot.id, "").await.unwrap();

        let (again, deliveries) = registry.join_lobby(&bob, snapshot.id, "").await.unwrap();
        assert_eq!(again.players.len(), 2, "membership not duplicated");
        assert!(deliveries.is_empty(), "duplicate join broadcasts nothing");
    }

    #[tokio::test]
    async fn test_member_of_at_most_one_lobby() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (first, _) = registry
            .create_lobby(&ada, "First".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, first.id, "").await.unwrap();

        // Bob creates his own lobby: implicitly leaves the first one.
        let (second, _) = registry
            .create_lobby(&bob, "Second".into(), 4, false, String::new())
            .await
            .unwrap();

        assert_eq!(registry.lobby_of(bob.player_id).await, Some(second.id));
        let directory = registry.directory().await;
        let first_snapshot = directory.iter().find(|l| l.id == first.id).unwrap();
        assert_eq!(first_snapshot.players.len(), 1);
        assert_eq!(first_snapshot.players[0].id, ada.player_id);

        // And joining the first lobby again removes the now-empty second.
        registry.join_lobby(&bob, first.id, "").await.unwrap();
        let directory = registry.directory().await;
        assert!(!directory.iter().any(|l| l.id == second.id), "empty lobby removed");
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, snapshot.id, "").await.unwrap();

        let (removed, _) = registry.leave_lobby(bob.player_id, snapshot.id).await;
        assert!(removed);

        let (removed, deliveries) = registry.leave_lobby(bob.player_id, snapshot.id).await;
        assert!(!removed, "second leave is a no-op");
        assert!(deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_last_leave_removes_lobby() {
        let registry = Registry::new();
        let (ada, _rx) = attached(&registry, "ada").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();

        registry.leave_lobby(ada.player_id, snapshot.id).await;
        assert!(registry.directory().await.is_empty());
    }

    #[tokio::test]
    async fn test_max_players_clamped() {
        let registry = Registry::new();
        let (ada, _rx) = attached(&registry, "ada").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Solo".into(), 0, false, String::new())
            .await
            .unwrap();
        assert_eq!(snapshot.max_players, 1);
    }

    #[tokio::test]
    async fn test_ready_roster() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, snapshot.id, "").await.unwrap();

        // Two members -> two scoped updates, no global list.
        let deliveries = registry.set_ready(ada.player_id, snapshot.id, true).await;
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries
            .iter()
            .all(|d| matches!(d.message, ServerMessage::LobbyUpdated { .. })));

        // Already ready: no-op.
        let deliveries = registry.set_ready(ada.player_id, snapshot.id, true).await;
        assert!(deliveries.is_empty());

        // Non-member: no-op.
        let deliveries = registry.set_ready(PlayerId::generate(), snapshot.id, true).await;
        assert!(deliveries.is_empty());

        registry.set_ready(ada.player_id, snapshot.id, false).await;
        let directory = registry.directory().await;
        assert!(directory[0].ready.is_empty());
    }

    #[tokio::test]
    async fn test_leave_clears_ready_state() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, snapshot.id, "").await.unwrap();
        registry.set_ready(bob.player_id, snapshot.id, true).await;

        registry.leave_lobby(bob.player_id, snapshot.id).await;
        let directory = registry.directory().await;
        assert!(directory[0].ready.is_empty(), "ready roster stays a subset of members");
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let registry = Registry::new();
        let (ada, handle, _rx) = session("ada");
        let conn_id = handle.conn_id;
        registry.attach_session(handle).await;
        let (bob, _rx_b) = attached(&registry, "bob").await;

        let (snapshot, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();
        registry.join_lobby(&bob, snapshot.id, "").await.unwrap();

        let deliveries = registry.disconnect(ada.player_id, conn_id).await;
        assert!(!deliveries.is_empty());
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.lobby_of(ada.player_id).await, None);

        let directory = registry.directory().await;
        assert_eq!(directory[0].players.len(), 1);

        // Re-entrant close is a no-op.
        let deliveries = registry.disconnect(ada.player_id, conn_id).await;
        assert!(deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_supersede_keeps_membership_and_guards_cleanup() {
        let registry = Registry::new();
        let (ada, old_handle, _old_rx) = session("ada");
        let old_conn = old_handle.conn_id;
        registry.attach_session(old_handle).await;

        let (lobby, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();

        // Same identity reconnects on a new transport.
        let (tx, _new_rx) = mpsc::channel(32);
        let new_handle = SessionHandle::new(
            ada.player_id,
            ada.name.clone(),
            ConnId::generate(),
            tx,
            Arc::new(Notify::new()),
        );
        let outcome = registry.attach_session(new_handle).await;
        assert!(outcome.superseded.is_some());
        assert_eq!(registry.lobby_of(ada.player_id).await, Some(lobby.id));

        // Stale connection's cleanup must not touch the new session.
        let deliveries = registry.disconnect(ada.player_id, old_conn).await;
        assert!(deliveries.is_empty());
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.lobby_of(ada.player_id).await, Some(lobby.id));
    }

    #[tokio::test]
    async fn test_join_emits_scoped_and_global_updates() {
        let registry = Registry::new();
        let (ada, _rx_a) = attached(&registry, "ada").await;
        let (bob, _rx_b) = attached(&registry, "bob").await;
        let (_eve, _rx_e) = attached(&registry, "eve").await;

        let (lobby, _) = registry
            .create_lobby(&ada, "Foo".into(), 4, false, String::new())
            .await
            .unwrap();

        let (_, deliveries) = registry.join_lobby(&bob, lobby.id, "").await.unwrap();
        let updates = deliveries
            .iter()
            .filter(|d| matches!(d.message, ServerMessage::LobbyUpdated { .. }))
            .count();
        let lists = deliveries
            .iter()
            .filter(|d| matches!(d.message, ServerMessage::LobbyList { .. }))
            .count();
        assert_eq!(updates, 2, "scoped update goes to the two members");
        assert_eq!(lists, 3, "directory update goes to every session");
    }
}
