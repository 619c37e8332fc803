//! # Parlor Lobby Server
//!
//! Real-time lobby service for a multiplayer card game: players register or
//! log in over a WebSocket, create and join lobbies, flag themselves ready,
//! and every relevant change is pushed to them as it happens.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PARLOR SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/          - Lobby service                           │
//! │  ├── protocol.rs   - Wire messages and envelope decoding     │
//! │  ├── auth.rs       - Credential/token gate (JWT HS256)       │
//! │  ├── session.rs    - Session identity and transport handle   │
//! │  ├── registry.rs   - Shared lobby/session state              │
//! │  ├── broadcast.rs  - Fan-out and dead-peer cleanup           │
//! │  └── server.rs     - WebSocket server and dispatcher         │
//! │                                                              │
//! │  game/             - Match data model                        │
//! │  └── mod.rs        - Game, players, figures, cards           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! All lobby and session state lives behind a single `RwLock` in the
//! registry. Mutations compute their notification payloads while holding
//! the lock, then release it before any message is written to a socket —
//! a slow or dead peer can never stall the registry. Failed writes feed
//! back into disconnect cleanup, which is idempotent per connection, so
//! the resulting cascade always terminates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use network::auth::{AuthConfig, AuthGate, Identity, JwtTokenService, MemoryDirectory};
pub use network::protocol::{ClientMessage, LobbySnapshot, ServerMessage};
pub use network::registry::{LobbyId, Registry};
pub use network::server::{LobbyServer, LobbyServerError, ServerConfig};
pub use network::session::{PlayerId, SessionHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
