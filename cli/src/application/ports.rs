//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::Result;

use crate::domain::error::DeployError;
use crate::domain::{AuthMode, DeployConfig, ModelAliases, ModelSpec, ResolvedModel, TokenRecord};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program to completion, streaming its output to the log.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<ExitStatus>;

    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns `DeployError::Timeout` when `timeout` elapses and
    /// `DeployError::Interrupted` on Ctrl-C. In both cases the child's whole
    /// process group must be terminated (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExitStatus>;

    /// Run a program and return its trimmed stdout.
    async fn capture(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Run a program and fail with `DeployError::ExternalFailure` on a
    /// non-zero exit.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<()> {
        let status = self.run(program, args).await?;
        if status.success() {
            return Ok(());
        }
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        Err(DeployError::ExternalFailure {
            command,
            status: status.to_string(),
        }
        .into())
    }

    /// Run a script under `bash -lc`, failing on a non-zero exit.
    async fn shell(&self, script: &str) -> Result<()> {
        self.run_checked("bash", &["-lc", script]).await
    }
}

// ── Reporting Ports ───────────────────────────────────────────────────────────

/// Abstracts progress reporting so application services can emit messages without
/// depending on the Presentation layer. Sync trait.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

/// Receives pipeline lifecycle events.
///
/// `advance` is called exactly once per step, whether it ran or was skipped.
pub trait StepProgress {
    fn begin(&self, total: usize);
    fn started(&self, label: &str);
    fn skipped(&self, label: &str);
    fn finished(&self, label: &str, elapsed: Duration);
    fn failed(&self, label: &str);
    fn advance(&self);
}

// ── Credential Port ───────────────────────────────────────────────────────────

/// Persistent API token store.
///
/// Every mutation leaves `tokens.json` and the mode's derived artifact
/// consistent with each other.
pub trait CredentialStore {
    fn auth_mode(&self) -> AuthMode;

    /// All records, including revoked ones, in creation order.
    fn list_tokens(&self) -> Result<Vec<TokenRecord>>;

    fn active_tokens(&self) -> Result<Vec<TokenRecord>> {
        Ok(self
            .list_tokens()?
            .into_iter()
            .filter(TokenRecord::is_active)
            .collect())
    }

    /// # Errors
    ///
    /// `TokenError::NotFound` for an unknown id, `TokenError::InvalidState`
    /// when the plaintext was never stored.
    fn show_token(&self, id: &str) -> Result<TokenRecord>;

    /// Issue a token. The returned record carries the plaintext even in
    /// hashed mode; it is the only time the caller sees it.
    ///
    /// # Errors
    ///
    /// `TokenError::InvalidInput` for a blank explicit value.
    fn create_token(&self, name: &str, value: Option<&str>) -> Result<TokenRecord>;

    /// # Errors
    ///
    /// `TokenError::NotFound` or `TokenError::AlreadyRevoked`.
    fn revoke_token(&self, id: &str) -> Result<TokenRecord>;
}

// ── Host Probes ───────────────────────────────────────────────────────────────

pub trait MemoryProbe {
    /// Total physical memory in GiB.
    fn total_memory_gib(&self) -> Result<f64>;
}

pub trait BindProbe {
    /// Whether a TCP listener can currently bind `(host, port)`.
    fn is_bind_port_free(&self, host: &str, port: u16) -> bool;
}

// ── Deployment Collaborators ──────────────────────────────────────────────────

/// Operating-system preparation.
#[allow(async_fn_in_trait)]
pub trait SystemPreparer {
    async fn install_base_packages(&self) -> Result<()>;
    async fn enable_unattended_upgrades(&self) -> Result<()>;
    async fn install_docker(&self) -> Result<()>;
    /// Make sure at least `gib` of swap is active.
    async fn ensure_swap(&self, gib: u32) -> Result<()>;
    async fn configure_firewall(&self, cfg: &DeployConfig) -> Result<()>;
}

/// GGUF artifact acquisition.
#[allow(async_fn_in_trait)]
pub trait ModelResolver {
    /// Pick, download and verify the artifact for `spec` into `dest`.
    async fn resolve_model(
        &self,
        spec: &ModelSpec,
        dest: &Path,
        hf_token: Option<&str>,
    ) -> Result<ResolvedModel>;

    /// Use a matching `.gguf` file already present in `dir`.
    ///
    /// # Errors
    ///
    /// `DeployError::ModelNotFound` when nothing matches.
    async fn locate_existing(&self, spec: &ModelSpec, dir: &Path) -> Result<ResolvedModel>;
}

/// Container service lifecycle.
#[allow(async_fn_in_trait)]
pub trait ServiceManager {
    /// Render and write `models.ini`, `docker-compose.yml` and, in hashed
    /// mode, the auth sidecar script.
    async fn write_service_config(
        &self,
        cfg: &DeployConfig,
        llm: &ResolvedModel,
        emb: &ResolvedModel,
    ) -> Result<()>;
    async fn pull_image(&self, image: &str) -> Result<()>;
    async fn compose_up(&self, compose_file: &Path) -> Result<()>;
}

/// nginx in front of llama-server.
#[allow(async_fn_in_trait)]
pub trait ReverseProxy {
    /// Local auth proxy on the public bind address (hashed mode, no domain).
    async fn ensure_local_proxy(&self, cfg: &DeployConfig) -> Result<()>;
    /// Public site for `cfg.domain` with a Let's Encrypt certificate.
    async fn ensure_tls(&self, cfg: &DeployConfig) -> Result<()>;
}

/// Post-deploy checks.
#[allow(async_fn_in_trait)]
pub trait ServiceValidator {
    /// Poll `url` until it answers 200.
    ///
    /// # Errors
    ///
    /// `DeployError::Timeout` once `timeout` has elapsed.
    async fn wait_live(&self, url: &str, timeout: Duration) -> Result<()>;
    /// Model listing, embedding and chat calls against `base_url`.
    async fn smoke_test(&self, base_url: &str, token: &str, aliases: &ModelAliases)
    -> Result<()>;
    /// Health and model listing from a throwaway container on the compose
    /// network, for deployments that publish no host port.
    async fn internal_smoke_test(&self, cfg: &DeployConfig, token: &str) -> Result<()>;
    /// Read-only diagnostics. Callers log failures and carry on.
    async fn sanity_checks(&self, cfg: &DeployConfig) -> Result<()>;
}

/// Composite trait: everything the deploy pipeline needs from the host.
pub trait HostBackend:
    SystemPreparer + ModelResolver + ServiceManager + ReverseProxy + ServiceValidator
{
}

/// Blanket implementation: any type implementing all five sub-traits is a `HostBackend`.
impl<T> HostBackend for T where
    T: SystemPreparer + ModelResolver + ServiceManager + ReverseProxy + ServiceValidator
{
}
