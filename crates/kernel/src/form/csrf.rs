//! Session key (sesskey) generation and verification.
//!
//! Every form carries the current session's key in a hidden `sesskey` field.
//! A recognized submission whose key does not match is rejected outright.

use anyhow::Result;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_sessions::Session;

/// Name of the hidden field carrying the session key.
pub const SESSKEY_FIELD: &str = "sesskey";

/// Session key for storing the sesskey.
const SESSKEY_SESSION_KEY: &str = "sesskey";

/// A per-session anti-forgery key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessKey(String);

impl SessKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut random_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        let timestamp = chrono::Utc::now().timestamp();

        let mut hasher = Sha256::new();
        hasher.update(random_bytes);
        hasher.update(timestamp.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a known key (tests, mock submissions).
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare a submitted key in constant time.
    pub fn confirm(&self, submitted: &str) -> bool {
        !submitted.is_empty() && bool::from(self.0.as_bytes().ct_eq(submitted.as_bytes()))
    }
}

impl std::fmt::Debug for SessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessKey").finish()
    }
}

/// Load the session's key, creating and storing one on first use.
pub async fn session_sesskey(session: &Session) -> Result<SessKey> {
    let stored: Option<String> = session.get(SESSKEY_SESSION_KEY).await.unwrap_or(None);
    if let Some(key) = stored {
        return Ok(SessKey(key));
    }

    let key = SessKey::generate();
    session
        .insert(SESSKEY_SESSION_KEY, key.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("failed to store sesskey: {}", e))?;
    Ok(key)
}
