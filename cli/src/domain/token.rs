//! API token records and the artifacts derived from them.
//!
//! Generation takes the random bytes from the caller so everything here
//! stays pure and deterministic under test.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::config::AuthMode;
use crate::domain::error::TokenError;

/// Number of random bytes in a token id (12 hex chars).
pub const TOKEN_ID_BYTES: usize = 6;
/// Number of random bytes in a token value (48 URL-safe chars).
pub const TOKEN_VALUE_BYTES: usize = 36;

/// One issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// `tk_` followed by 12 lowercase hex chars.
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Plaintext secret. Persisted in plaintext mode only.
    #[serde(default)]
    pub value: Option<String>,
    /// SHA-256 hex digest. Persisted in hashed mode only.
    #[serde(default)]
    pub hash: Option<String>,
}

impl TokenRecord {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.revoked
    }

    /// `"active"` or `"REVOKED"`, as shown in listings.
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.revoked { "REVOKED" } else { "active" }
    }

    /// Copy of this record fit for `tokens.json` under `mode`.
    #[must_use]
    pub fn stored_form(&self, mode: AuthMode) -> Self {
        let mut stored = self.clone();
        if mode == AuthMode::Hashed {
            stored.value = None;
        }
        stored
    }
}

/// On-disk shape of `tokens.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokensFile {
    #[serde(default)]
    pub tokens: Vec<TokenRecord>,
}

/// On-disk shape of `token_hashes.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashesFile {
    pub hashes: Vec<String>,
}

/// The file the serving side reads to authorize requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedArtifact {
    /// `api_keys`: active plaintext values, one per line.
    KeyFile(String),
    /// `token_hashes.json`: active digests.
    HashList(HashesFile),
}

impl DerivedArtifact {
    /// File name inside the secrets directory.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::KeyFile(_) => KEY_FILE,
            Self::HashList(_) => HASH_FILE,
        }
    }
}

pub const TOKENS_FILE: &str = "tokens.json";
pub const KEY_FILE: &str = "api_keys";
pub const HASH_FILE: &str = "token_hashes.json";

/// Project the active token set into the artifact for `mode`.
///
/// Revoked records never appear. Records without the field the mode needs
/// (a hashed-mode record has no value) are skipped.
#[must_use]
pub fn project(records: &[TokenRecord], mode: AuthMode) -> DerivedArtifact {
    let active = records.iter().filter(|r| r.is_active());
    match mode {
        AuthMode::Plaintext => {
            let values: Vec<&str> = active.filter_map(|r| r.value.as_deref()).collect();
            let mut body = values.join("\n");
            body.push('\n');
            DerivedArtifact::KeyFile(body)
        }
        AuthMode::Hashed => DerivedArtifact::HashList(HashesFile {
            hashes: active.filter_map(|r| r.hash.clone()).collect(),
        }),
    }
}

/// Encode bytes as lowercase hexadecimal.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}

#[must_use]
pub fn token_id_from(bytes: &[u8; TOKEN_ID_BYTES]) -> String {
    format!("tk_{}", hex_encode(bytes))
}

#[must_use]
pub fn token_value_from(bytes: &[u8; TOKEN_VALUE_BYTES]) -> String {
    format!("sk-{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[must_use]
pub fn hash_token(value: &str) -> String {
    hex_encode(&Sha256::digest(value.as_bytes()))
}

/// Reject empty or whitespace-only token values.
///
/// # Errors
///
/// Returns `TokenError::InvalidInput` for blank values.
pub fn validate_value(value: &str) -> Result<(), TokenError> {
    if value.trim().is_empty() {
        return Err(TokenError::InvalidInput(
            "Token value must not be empty.".to_string(),
        ));
    }
    Ok(())
}

/// Build a new record. The returned record always carries `value` so the
/// caller can display it once; use [`TokenRecord::stored_form`] before
/// persisting.
#[must_use]
pub fn new_record(
    id: String,
    name: &str,
    value: String,
    mode: AuthMode,
    now: DateTime<Utc>,
) -> TokenRecord {
    let hash = (mode == AuthMode::Hashed).then(|| hash_token(&value));
    TokenRecord {
        id,
        name: name.to_string(),
        created_at: now,
        revoked: false,
        revoked_at: None,
        value: Some(value),
        hash,
    }
}
