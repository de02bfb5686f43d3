//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. Callers that need to branch on a variant use
//! `anyhow::Error::downcast_ref`.

use thiserror::Error;

// ── Credential errors ─────────────────────────────────────────────────────────

/// Failures raised by credential store operations.
///
/// These are local, synchronous failures returned to the immediate caller;
/// the deploy pipeline treats them like any other step failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token value: {0}")]
    InvalidInput(String),

    #[error("Token not found: {0}")]
    NotFound(String),

    #[error("Token {0} is already revoked.")]
    AlreadyRevoked(String),

    #[error(
        "Token '{0}' was created in hashed mode. The plaintext value was never stored on disk and cannot be recovered."
    )]
    InvalidState(String),
}

// ── Deployment errors ─────────────────────────────────────────────────────────

/// Failures of external collaborators invoked by pipeline steps.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Command failed ({status}): {command}")]
    ExternalFailure { command: String, status: String },

    #[error("{what} did not complete within {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Interrupted while running: {command}")]
    Interrupted { command: String },

    #[error("No free port on {host} at or above {preferred}")]
    NoFreePort { host: String, preferred: u16 },

    #[error("No GGUF file matching {patterns:?} for {repo} in {location}")]
    ModelNotFound {
        repo: String,
        location: String,
        patterns: Vec<String>,
    },
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to deploy configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Unknown {kind} '{value}'. Valid values: {valid}")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        valid: &'static str,
    },
}
