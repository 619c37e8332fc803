//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON envelopes carrying a `type` discriminant.
//!
//! Inbound envelopes are decoded in two phases: the discriminant (and
//! optional bearer token) first, the full payload second. That keeps
//! unknown-type handling uniform and lets the dispatcher apply the
//! authentication gate before committing to a schema.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::registry::LobbyId;
use crate::network::session::PlayerId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with username and password.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },

    /// Create an account and authenticate.
    Register {
        /// Desired account name.
        username: String,
        /// Account password.
        password: String,
    },

    /// Create a new lobby; the caller becomes its first member.
    CreateLobby {
        /// Display name of the lobby.
        name: String,
        /// Seat capacity. Clamped to at least 1 by the registry.
        max_players: u32,
        /// Hide the lobby behind an invite flow on the client.
        #[serde(default)]
        is_private: bool,
        /// Join password. Empty means no password.
        #[serde(default)]
        password: String,
    },

    /// Join an existing lobby.
    JoinLobby {
        /// Target lobby.
        lobby_id: LobbyId,
        /// Join password, if the lobby has one.
        #[serde(default)]
        password: String,
    },

    /// Leave a lobby.
    LeaveLobby {
        /// Target lobby.
        lobby_id: LobbyId,
    },

    /// Signal readiness to start the game.
    StartGame {
        /// Target lobby.
        lobby_id: LobbyId,
    },

    /// Withdraw a previous start signal.
    CancelGame {
        /// Target lobby.
        lobby_id: LobbyId,
    },
}

impl ClientMessage {
    /// Every discriminant string a client may send.
    pub const KINDS: &'static [&'static str] = &[
        "login",
        "register",
        "create_lobby",
        "join_lobby",
        "leave_lobby",
        "start_game",
        "cancel_game",
    ];

    /// The discriminant string of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "login",
            ClientMessage::Register { .. } => "register",
            ClientMessage::CreateLobby { .. } => "create_lobby",
            ClientMessage::JoinLobby { .. } => "join_lobby",
            ClientMessage::LeaveLobby { .. } => "leave_lobby",
            ClientMessage::StartGame { .. } => "start_game",
            ClientMessage::CancelGame { .. } => "cancel_game",
        }
    }
}

/// First-phase view of an inbound envelope: discriminant plus bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeHead {
    /// The `type` discriminant.
    #[serde(rename = "type")]
    pub kind: String,
    /// Bearer token carried by authenticated requests.
    #[serde(default)]
    pub token: Option<String>,
}

/// Errors from the two-phase envelope decode.
///
/// None of these terminate the connection; the dispatcher echoes them back
/// as an `error` envelope and keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a JSON object with a `type` field.
    #[error("invalid message format")]
    Malformed(#[source] serde_json::Error),

    /// The discriminant is not one recognized by the server.
    #[error("unknown message type `{0}`")]
    UnknownType(String),

    /// The discriminant is recognized but the payload does not decode.
    #[error("invalid `{kind}` payload")]
    InvalidPayload {
        /// Discriminant of the offending message.
        kind: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// The offending discriminant, when one was readable.
    pub fn kind(&self) -> Option<&str> {
        match self {
            DecodeError::Malformed(_) => None,
            DecodeError::UnknownType(kind) => Some(kind),
            DecodeError::InvalidPayload { kind, .. } => Some(kind),
        }
    }
}

/// Decode an inbound frame: discriminant first, payload second.
pub fn decode(text: &str) -> Result<(ClientMessage, Option<String>), DecodeError> {
    let head: EnvelopeHead = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

    if !ClientMessage::KINDS.contains(&head.kind.as_str()) {
        return Err(DecodeError::UnknownType(head.kind));
    }

    let message: ClientMessage =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidPayload {
            kind: head.kind,
            source: e,
        })?;

    Ok((message, head.token))
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once a session becomes authenticated.
    Welcome {
        /// The player's stable identifier.
        player_id: PlayerId,
        /// The player's display name.
        name: String,
        /// Current lobby directory.
        lobbies: Vec<LobbySnapshot>,
    },

    /// Login accepted; carries the bearer token for reconnects.
    LoginSuccessful {
        /// Bearer token for subsequent requests.
        token: String,
        /// The player's stable identifier.
        player_id: PlayerId,
        /// The player's display name.
        name: String,
    },

    /// Login rejected.
    LoginFailed {
        /// Human-readable reason.
        message: String,
    },

    /// Registration accepted; carries the bearer token.
    RegisterSuccessful {
        /// Bearer token for subsequent requests.
        token: String,
        /// The player's stable identifier.
        player_id: PlayerId,
        /// The player's display name.
        name: String,
    },

    /// Registration rejected.
    RegisterFailed {
        /// Human-readable reason.
        message: String,
    },

    /// Reply to the creator of a new lobby.
    LobbyCreated {
        /// Snapshot of the freshly created lobby.
        lobby: LobbySnapshot,
    },

    /// Full lobby directory, broadcast to every connected session.
    LobbyList {
        /// Directory snapshot.
        lobbies: Vec<LobbySnapshot>,
    },

    /// Single-lobby update, broadcast to that lobby's members.
    LobbyUpdated {
        /// Snapshot of the changed lobby.
        lobby: LobbySnapshot,
    },

    /// Join accepted.
    JoinLobbySuccessful {
        /// Snapshot of the joined lobby.
        lobby: LobbySnapshot,
    },

    /// Join rejected.
    JoinLobbyFailed {
        /// Why the join was rejected.
        reason: JoinFailReason,
    },

    /// Leave acknowledged.
    LobbyLeft {
        /// The lobby that was left.
        lobby_id: LobbyId,
    },

    /// Recoverable protocol error; the connection stays open.
    Error {
        /// Human-readable diagnostic.
        message: String,
        /// Discriminant of the offending request, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<String>,
    },
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Why a join attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinFailReason {
    /// Every seat is taken.
    Full,
    /// The supplied password did not match.
    WrongPassword,
    /// No lobby with that id.
    NotFound,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// One lobby member as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Stable player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
}

/// Point-in-time view of a lobby, taken under the registry lock.
///
/// Deliberately has no password field: the password never leaves the
/// registry boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySnapshot {
    /// Lobby identifier.
    pub id: LobbyId,
    /// Lobby display name.
    pub name: String,
    /// Seat capacity.
    pub max_players: usize,
    /// Whether the lobby is flagged private.
    pub is_private: bool,
    /// Members in join order.
    pub players: Vec<PlayerSummary>,
    /// Member ids that have signaled start.
    pub ready: Vec<PlayerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join_lobby_with_token() {
        let lobby_id = LobbyId::generate();
        let text = format!(
            r#"{{"type":"join_lobby","token":"abc.def.ghi","lobby_id":"{}","password":"pw"}}"#,
            lobby_id
        );

        let (msg, token) = decode(&text).unwrap();
        assert_eq!(token.as_deref(), Some("abc.def.ghi"));
        match msg {
            ClientMessage::JoinLobby { lobby_id: id, password } => {
                assert_eq!(id, lobby_id);
                assert_eq!(password, "pw");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_defaults_optional_fields() {
        let text = r#"{"type":"create_lobby","name":"Foo","max_players":4}"#;
        let (msg, token) = decode(text).unwrap();
        assert!(token.is_none());
        match msg {
            ClientMessage::CreateLobby { name, max_players, is_private, password } => {
                assert_eq!(name, "Foo");
                assert_eq!(max_players, 4);
                assert!(!is_private);
                assert!(password.is_empty());
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let result = decode(r#"{"type":"launch_missiles"}"#);
        match result {
            Err(DecodeError::UnknownType(kind)) => assert_eq!(kind, "launch_missiles"),
            other => panic!("expected unknown type error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_payload() {
        // Recognized discriminant, missing required field.
        let result = decode(r#"{"type":"join_lobby"}"#);
        match result {
            Err(DecodeError::InvalidPayload { kind, .. }) => assert_eq!(kind, "join_lobby"),
            other => panic!("expected invalid payload error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_frame() {
        assert!(matches!(decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(r#"{"no_type":1}"#), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::JoinLobbyFailed {
            reason: JoinFailReason::WrongPassword,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("join_lobby_failed"));
        assert!(json.contains("wrong_password"));

        let parsed = ServerMessage::from_json(&json).unwrap();
        assert!(matches!(
            parsed,
            ServerMessage::JoinLobbyFailed { reason: JoinFailReason::WrongPassword }
        ));
    }

    #[test]
    fn test_snapshot_never_serializes_password() {
        let snapshot = LobbySnapshot {
            id: LobbyId::generate(),
            name: "Secret Table".into(),
            max_players: 4,
            is_private: true,
            players: vec![PlayerSummary { id: PlayerId::generate(), name: "ada".into() }],
            ready: vec![],
        };

        let update = ServerMessage::LobbyUpdated { lobby: snapshot.clone() };
        let list = ServerMessage::LobbyList { lobbies: vec![snapshot] };

        assert!(!update.to_json().unwrap().contains("password"));
        assert!(!list.to_json().unwrap().contains("password"));
    }

    #[test]
    fn test_kind_matches_wire_discriminant() {
        let msg = ClientMessage::LeaveLobby { lobby_id: LobbyId::generate() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"leave_lobby""#));
        assert_eq!(msg.kind(), "leave_lobby");
        assert!(ClientMessage::KINDS.contains(&msg.kind()));
    }
}
