//! JSON output helpers shared by every `--json` code path.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::{ConfigError, DeployError, TokenError};

/// Stable machine-readable code for `err`.
#[must_use]
pub fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<TokenError>() {
        return match e {
            TokenError::InvalidInput(_) => "invalid_input",
            TokenError::NotFound(_) => "not_found",
            TokenError::AlreadyRevoked(_) => "already_revoked",
            TokenError::InvalidState(_) => "invalid_state",
        };
    }
    if let Some(e) = err.downcast_ref::<DeployError>() {
        return match e {
            DeployError::ExternalFailure { .. } => "external_failure",
            DeployError::Timeout { .. } => "timeout",
            DeployError::Interrupted { .. } => "interrupted",
            DeployError::NoFreePort { .. } => "no_free_port",
            DeployError::ModelNotFound { .. } => "model_not_found",
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return "invalid_config";
    }
    "error"
}

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Pretty-print `value` to stdout.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
    println!("{text}");
    Ok(())
}
