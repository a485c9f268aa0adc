//! Token resolution against the authentication service
//!
//! The directory never stores credentials. Every mutation resolves the
//! caller's token afresh, because tokens can be revoked at any time.

use async_trait::async_trait;
use parking_lot::RwLock;
use room_gossip_core::{Error, Owner};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown or expired token")]
    Unauthorized,
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),
}

/// The authentication service, as seen by the directory
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to the user it was issued to
    async fn get_owner(&self, token: &str) -> Result<Owner, AuthError>;

    /// Whether the token is currently live
    async fn is_valid(&self, token: &str) -> bool {
        self.get_owner(token).await.is_ok()
    }
}

/// Short, non-reversible tag for a token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(&blake3::hash(token.as_bytes()).as_bytes()[..4])
}

// =============================================================================
// OWNERSHIP GATE
// =============================================================================

/// Resolves tokens to owners before any mutation
#[derive(Clone)]
pub struct OwnershipGate {
    authenticator: Arc<dyn Authenticator>,
}

impl OwnershipGate {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Resolve `token` to an owner. Not cached.
    pub async fn resolve(&self, token: &str) -> Result<Owner, Error> {
        match self.authenticator.get_owner(token).await {
            Ok(owner) => {
                debug!("Token {} resolved to {}", token_fingerprint(token), owner);
                Ok(owner)
            }
            Err(AuthError::Unauthorized) => {
                debug!("Token {} rejected", token_fingerprint(token));
                Err(Error::Unauthorized)
            }
            Err(AuthError::Unavailable(reason)) => {
                warn!("Authentication service unavailable: {}", reason);
                Err(Error::Internal(format!("authentication unavailable: {reason}")))
            }
        }
    }
}

// =============================================================================
// IN-MEMORY TOKENS
// =============================================================================

/// In-memory token -> user table
#[derive(Default)]
pub struct TokenTable {
    tokens: RwLock<HashMap<String, Owner>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `token` to `owner`, replacing any token the owner held
    pub fn issue(&self, owner: impl Into<Owner>, token: impl Into<String>) {
        let owner = owner.into();
        let mut tokens = self.tokens.write();
        tokens.retain(|_, held_by| *held_by != owner);
        tokens.insert(token.into(), owner);
    }

    /// Revoke a token
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn get_owner(&self, token: &str) -> Result<Owner, AuthError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

// =============================================================================
// USERS FILE
// =============================================================================

/// One user record in the authentication service's users file
#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    current_token: Option<String>,
}

/// Reads the authentication service's users file on every lookup.
///
/// The file maps user names to `{password_hash, current_token}`. Only the
/// current token of each user is live; a user whose token was rotated
/// loses the old one immediately.
pub struct UsersFile {
    path: PathBuf,
}

impl UsersFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<HashMap<String, UserRecord>, AuthError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AuthError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::Unavailable(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl Authenticator for UsersFile {
    async fn get_owner(&self, token: &str) -> Result<Owner, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        self.load()
            .await?
            .into_iter()
            .find(|(_, record)| record.current_token.as_deref() == Some(token))
            .map(|(user, _)| Owner(user))
            .ok_or(AuthError::Unauthorized)
    }
}
