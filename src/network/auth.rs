//! Credential/Token Gate
//!
//! Everything a connection must pass before it may mutate the registry.
//! Credential storage, token issuance, and player lookup are collaborator
//! traits; the gate only sequences them and enforces basic validation.
//! The bundled implementations are a HS256 JWT token service and an
//! in-process player directory for the binary and tests — a production
//! deployment would back the traits with real storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::network::session::PlayerId;

/// Token lifetime: 24 hours.
const TOKEN_TTL_HOURS: i64 = 24;

/// An authenticated player identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Credential store failures.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Unknown username or wrong password. Deliberately indistinguishable.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Registration with a username that is already taken.
    #[error("username already exists")]
    UsernameTaken,

    /// The store itself failed.
    #[error("credential store failure: {0}")]
    Store(String),
}

/// Token service failures.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token was valid once but has expired.
    #[error("token expired")]
    Expired,

    /// Signature, format, or claim failure.
    #[error("invalid token")]
    Invalid,

    /// The service itself failed.
    #[error("token service failure: {0}")]
    Service(String),
}

/// Failures surfaced by the gate. Each maps to a protocol error envelope;
/// none of them terminate the connection.
#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed or missing fields in the request.
    #[error("{0}")]
    Validation(String),

    /// Rejected by the credential store.
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Rejected by the token service.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Token was valid but the player record no longer exists.
    #[error("player not found")]
    UnknownPlayer,
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Verifies and creates player credentials.
///
/// Password hashing and persistence live behind this seam; the lobby core
/// never sees more than the verdict. Implementations must not be called
/// while the registry lock is held.
pub trait CredentialStore: Send + Sync {
    /// Check a username/password pair.
    fn verify(&self, username: &str, password: &str) -> Result<Identity, CredentialError>;

    /// Create a new account.
    fn create(&self, username: &str, password: &str) -> Result<Identity, CredentialError>;
}

/// Issues and verifies bearer tokens.
pub trait TokenService: Send + Sync {
    /// Mint a token for a player.
    fn issue(&self, player_id: PlayerId) -> Result<String, TokenError>;

    /// Verify a token and extract the player it was minted for.
    fn verify(&self, token: &str) -> Result<PlayerId, TokenError>;
}

/// Resolves a player id to its stored identity, for the reconnect path.
pub trait PlayerLookup: Send + Sync {
    /// Fetch the identity behind an id, if it exists.
    fn by_id(&self, player_id: PlayerId) -> Option<Identity>;
}

// =============================================================================
// THE GATE
// =============================================================================

/// Validates login, registration, and token-bearing requests before they
/// reach the registry.
pub struct AuthGate {
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenService>,
    players: Arc<dyn PlayerLookup>,
}

impl AuthGate {
    /// Build a gate over the three collaborators.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenService>,
        players: Arc<dyn PlayerLookup>,
    ) -> Self {
        Self { credentials, tokens, players }
    }

    /// Authenticate with username and password; returns identity plus a
    /// freshly issued token.
    pub fn login(&self, username: &str, password: &str) -> Result<(Identity, String), GateError> {
        validate_credentials(username, password)?;
        let identity = self.credentials.verify(username, password)?;
        let token = self.tokens.issue(identity.player_id)?;
        Ok((identity, token))
    }

    /// Create an account and authenticate in one step.
    pub fn register(&self, username: &str, password: &str) -> Result<(Identity, String), GateError> {
        validate_credentials(username, password)?;
        let identity = self.credentials.create(username, password)?;
        let token = self.tokens.issue(identity.player_id)?;
        Ok((identity, token))
    }

    /// Authenticate a bearer token (the reconnect path).
    pub fn resume(&self, token: &str) -> Result<Identity, GateError> {
        let player_id = self.tokens.verify(token)?;
        self.players.by_id(player_id).ok_or(GateError::UnknownPlayer)
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<(), GateError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(GateError::Validation(
            "username and password required".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// JWT TOKEN SERVICE
// =============================================================================

/// Authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("AUTH_SECRET").ok(),
        }
    }
}

/// Claims carried by issued tokens.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Player id the token was minted for.
    sub: String,
    /// Expiry (Unix seconds).
    exp: i64,
    /// Issued at (Unix seconds).
    iat: i64,
}

/// HS256 JWT implementation of [`TokenService`].
pub struct JwtTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtTokenService {
    /// Build a service from a signing secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, player_id: PlayerId) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: player_id.to_string(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Service(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<PlayerId, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;
        let uuid = Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::Invalid)?;
        Ok(PlayerId(uuid))
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}

// =============================================================================
// IN-MEMORY DIRECTORY
// =============================================================================

#[derive(Debug, Clone)]
struct StoredPlayer {
    id: PlayerId,
    name: String,
    password: String,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    by_name: HashMap<String, StoredPlayer>,
    by_id: HashMap<PlayerId, StoredPlayer>,
}

/// In-process [`CredentialStore`] + [`PlayerLookup`].
///
/// Passwords are kept verbatim; hashing belongs to the real store behind
/// the trait seam, which is outside this crate's scope.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<DirectoryInner>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryDirectory {
    fn verify(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let stored = inner
            .by_name
            .get(username)
            .ok_or(CredentialError::InvalidCredentials)?;
        if stored.password != password {
            return Err(CredentialError::InvalidCredentials);
        }
        Ok(Identity { player_id: stored.id, name: stored.name.clone() })
    }

    fn create(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.by_name.contains_key(username) {
            return Err(CredentialError::UsernameTaken);
        }
        let stored = StoredPlayer {
            id: PlayerId::generate(),
            name: username.to_string(),
            password: password.to_string(),
        };
        inner.by_name.insert(username.to_string(), stored.clone());
        inner.by_id.insert(stored.id, stored.clone());
        Ok(Identity { player_id: stored.id, name: stored.name })
    }
}

impl PlayerLookup for MemoryDirectory {
    fn by_id(&self, player_id: PlayerId) -> Option<Identity> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(&player_id).map(|stored| Identity {
            player_id: stored.id,
            name: stored.name.clone(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
