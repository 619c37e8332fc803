//! Network Layer
//!
//! WebSocket lobby service: wire protocol, authentication gate, the shared
//! lobby registry, and the broadcast engine that fans updates out to
//! connected players.

pub mod auth;
pub mod broadcast;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{
    AuthConfig, AuthGate, CredentialError, CredentialStore, GateError, Identity,
    JwtTokenService, MemoryDirectory, PlayerLookup, TokenError, TokenService,
};
pub use broadcast::{Broadcaster, Delivery};
pub use protocol::{
    ClientMessage, DecodeError, JoinFailReason, LobbySnapshot, PlayerSummary, ServerMessage,
};
pub use registry::{AttachOutcome, JoinError, LobbyId, Registry, UnknownSession};
pub use server::{LobbyServer, LobbyServerError, ServerConfig};
pub use session::{ConnId, PlayerId, SessionHandle, SessionPhase};
