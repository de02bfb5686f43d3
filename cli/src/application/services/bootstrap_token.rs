//! Application service: the token used to validate a deployment.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use anyhow::Result;

use crate::application::ports::{CredentialStore, ProgressReporter};

/// Name given to the throwaway token created on a hashed-mode redeploy.
pub const TEMPORARY_TOKEN_NAME: &str = "__deploy-smoke-test";

/// Plaintext credential available to the validation steps of one run.
#[derive(Clone)]
pub struct BootstrapToken {
    pub value: String,
    /// Id of a token that must be revoked once the run is over.
    pub temporary_id: Option<String>,
    /// A permanent token was issued by this run.
    pub created: bool,
    pub name: String,
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapToken")
            .field("value", &"<REDACTED>")
            .field("temporary_id", &self.temporary_id)
            .field("created", &self.created)
            .field("name", &self.name)
            .finish()
    }
}

/// Pick or issue the token the smoke tests authenticate with.
///
/// - no active token: issue a permanent one named `name`, using `explicit`
///   when given;
/// - first active token still has its plaintext: reuse it;
/// - otherwise (hashed mode redeploy): issue a temporary token that the
///   caller revokes with [`revoke_temporary_token`].
///
/// Never issues a second permanent token.
///
/// # Errors
///
/// Propagates credential store failures, including `InvalidInput` for a
/// blank `explicit` value.
pub fn resolve_bootstrap_token(
    store: &impl CredentialStore,
    name: &str,
    explicit: Option<&str>,
    reporter: &impl ProgressReporter,
) -> Result<BootstrapToken> {
    let active = store.active_tokens()?;

    let Some(existing) = active.first() else {
        let record = store.create_token(name, explicit)?;
        reporter.success(&format!("Created token '{}' ({})", record.name, record.id));
        return Ok(BootstrapToken {
            value: record.value.unwrap_or_default(),
            temporary_id: None,
            created: true,
            name: record.name,
        });
    };

    reporter.success(&format!("Existing token found in store: {}", existing.id));
    if let Some(value) = &existing.value {
        return Ok(BootstrapToken {
            value: value.clone(),
            temporary_id: None,
            created: false,
            name: existing.name.clone(),
        });
    }

    let smoke = store.create_token(TEMPORARY_TOKEN_NAME, None)?;
    reporter.success(&format!(
        "Created temporary smoke-test token ({}) for validation.",
        smoke.id
    ));
    Ok(BootstrapToken {
        value: smoke.value.unwrap_or_default(),
        temporary_id: Some(smoke.id),
        created: false,
        name: smoke.name,
    })
}

/// Revoke the temporary token, if any. Failure is reported, never raised.
///
/// Returns whether a token was revoked.
pub fn revoke_temporary_token(
    store: &impl CredentialStore,
    token: &BootstrapToken,
    reporter: &impl ProgressReporter,
) -> bool {
    let Some(id) = &token.temporary_id else {
        return false;
    };
    match store.revoke_token(id) {
        Ok(_) => {
            tracing::info!(token_id = %id, "revoked temporary smoke-test token");
            reporter.success(&format!("Revoked temporary smoke-test token ({id})."));
            true
        }
        Err(e) => {
            tracing::warn!(token_id = %id, error = %e, "failed to revoke temporary token");
            reporter.warn(&format!(
                "Failed to revoke temporary smoke-test token ({id}): {e}"
            ));
            false
        }
    }
}
