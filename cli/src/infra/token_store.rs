//! Infrastructure implementation of the `CredentialStore` port.
//!
//! Layout under the secrets directory (0700):
//!
//! - `tokens.json`: every record ever issued; `value` is null in hashed mode
//! - `api_keys`: plaintext mode: active values, one per line (llama-server)
//! - `token_hashes.json`: hashed mode: active digests (auth sidecar)
//!
//! Each mutation stages `tokens.json` and the derived file together and
//! renames both into place, all 0600.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::RngCore as _;
use rand::rngs::OsRng;

use crate::application::ports::CredentialStore;
use crate::domain::config::AuthMode;
use crate::domain::error::TokenError;
use crate::domain::token::{
    self, DerivedArtifact, HASH_FILE, TOKEN_ID_BYTES, TOKEN_VALUE_BYTES, TOKENS_FILE, TokenRecord,
    TokensFile,
};
use crate::infra::fs::{StagedWrites, ensure_dir};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Auth mode implied by what is already in `secrets_dir`.
///
/// `token_hashes.json` means hashed; anything else is plaintext.
#[must_use]
pub fn detect_auth_mode(secrets_dir: &Path) -> AuthMode {
    if secrets_dir.join(HASH_FILE).exists() {
        AuthMode::Hashed
    } else {
        AuthMode::Plaintext
    }
}

/// Mode already on disk when it differs from `requested`.
///
/// A secrets directory without `tokens.json` has no mode yet.
#[must_use]
pub fn conflicting_auth_mode(secrets_dir: &Path, requested: AuthMode) -> Option<AuthMode> {
    if !secrets_dir.join(TOKENS_FILE).exists() {
        return None;
    }
    let existing = detect_auth_mode(secrets_dir);
    (existing != requested).then_some(existing)
}

/// File-backed token store.
pub struct TokenStore {
    dir: PathBuf,
    mode: AuthMode,
}

impl TokenStore {
    #[must_use]
    pub fn new(secrets_dir: impl Into<PathBuf>, mode: AuthMode) -> Self {
        Self {
            dir: secrets_dir.into(),
            mode,
        }
    }

    /// Open a store whose mode is detected from the files present.
    #[must_use]
    pub fn detect(secrets_dir: impl Into<PathBuf>) -> Self {
        let dir = secrets_dir.into();
        let mode = detect_auth_mode(&dir);
        Self { dir, mode }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn tokens_path(&self) -> PathBuf {
        self.dir.join(TOKENS_FILE)
    }

    /// Command that makes a running llama-server pick up keyfile changes.
    ///
    /// Only plaintext mode needs it; the auth sidecar re-reads its hash file
    /// on every request.
    #[must_use]
    pub fn restart_hint(&self) -> String {
        let base = self.dir.parent().unwrap_or(&self.dir);
        format!(
            "docker compose -f {} restart llama",
            base.join("docker-compose.yml").display()
        )
    }

    fn load(&self) -> Result<Vec<TokenRecord>> {
        let path = self.tokens_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        let file: TokensFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing token file {}", path.display()))?;
        Ok(file.tokens)
    }

    fn persist(&self, records: &[TokenRecord]) -> Result<()> {
        ensure_dir(&self.dir, DIR_MODE)?;

        let stored = TokensFile {
            tokens: records.iter().map(|r| r.stored_form(self.mode)).collect(),
        };
        let mut json = serde_json::to_string_pretty(&stored).context("serializing tokens")?;
        json.push('\n');

        let artifact = token::project(records, self.mode);
        let derived = match &artifact {
            DerivedArtifact::KeyFile(body) => body.clone(),
            DerivedArtifact::HashList(hashes) => {
                let mut body =
                    serde_json::to_string_pretty(hashes).context("serializing token hashes")?;
                body.push('\n');
                body
            }
        };

        let mut writes = StagedWrites::new();
        writes.stage(&self.tokens_path(), json.as_bytes(), FILE_MODE)?;
        writes.stage(
            &self.dir.join(artifact.file_name()),
            derived.as_bytes(),
            FILE_MODE,
        )?;
        writes.commit()?;
        tracing::debug!(dir = %self.dir.display(), mode = %self.mode, records = records.len(), "token store synced");
        Ok(())
    }

    fn fresh_id(existing: &HashSet<&str>) -> String {
        loop {
            let mut bytes = [0u8; TOKEN_ID_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let id = token::token_id_from(&bytes);
            if !existing.contains(id.as_str()) {
                return id;
            }
        }
    }

    fn fresh_value() -> String {
        let mut bytes = [0u8; TOKEN_VALUE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        token::token_value_from(&bytes)
    }
}

impl CredentialStore for TokenStore {
    fn auth_mode(&self) -> AuthMode {
        self.mode
    }

    fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        self.load()
    }

    fn show_token(&self, id: &str) -> Result<TokenRecord> {
        let record = self
            .load()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;
        if self.mode == AuthMode::Hashed && record.value.is_none() {
            return Err(TokenError::InvalidState(id.to_string()).into());
        }
        Ok(record)
    }

    fn create_token(&self, name: &str, value: Option<&str>) -> Result<TokenRecord> {
        let raw = match value {
            Some(v) => {
                token::validate_value(v)?;
                v.to_string()
            }
            None => Self::fresh_value(),
        };

        let mut records = self.load()?;
        let id = {
            let existing: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            Self::fresh_id(&existing)
        };
        let record = token::new_record(id, name, raw, self.mode, Utc::now());
        records.push(record.clone());
        self.persist(&records)?;
        tracing::info!(token_id = %record.id, name = %record.name, mode = %self.mode, "token created");
        Ok(record)
    }

    fn revoke_token(&self, id: &str) -> Result<TokenRecord> {
        let mut records = self.load()?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TokenError::NotFound(id.to_string()))?;
        if record.revoked {
            return Err(TokenError::AlreadyRevoked(id.to_string()).into());
        }
        record.revoked = true;
        record.revoked_at = Some(Utc::now());
        let revoked = record.clone();
        self.persist(&records)?;
        tracing::info!(token_id = %id, "token revoked");
        Ok(revoked)
    }
}
