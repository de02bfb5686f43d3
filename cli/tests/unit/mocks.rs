//! Shared mock infrastructure for unit tests.
//!
//! `FakeHost` records every collaborator call in order and can be told to
//! fail, or hang forever, at one of them. Reporters and probes are recording fakes.

#![allow(clippy::expect_used)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use llama_deploy::application::ports::{
    BindProbe, CredentialStore, MemoryProbe, ModelResolver, ProgressReporter, ReverseProxy,
    ServiceManager, ServiceValidator, StepProgress, SystemPreparer,
};
use llama_deploy::domain::{AuthMode, DeployConfig, ModelAliases, ModelSpec, ResolvedModel, TokenRecord};

// ── Host ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHost {
    pub calls: RefCell<Vec<String>>,
    /// Tokens the validation calls were made with.
    pub tokens_seen: RefCell<Vec<String>>,
    fail_at: Option<&'static str>,
    hang_at: Option<&'static str>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the call named `call` fail.
    pub fn failing_at(call: &'static str) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::default()
        }
    }

    /// Make the call named `call` never return.
    pub fn hanging_at(call: &'static str) -> Self {
        Self {
            hang_at: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == call)
    }

    async fn record(&self, call: &str) -> Result<()> {
        self.calls.borrow_mut().push(call.to_string());
        if self.hang_at == Some(call) {
            std::future::pending::<()>().await;
        }
        if self.fail_at == Some(call) {
            return Err(anyhow!("{call} exploded"));
        }
        Ok(())
    }
}

pub fn resolved(spec: &ModelSpec) -> ResolvedModel {
    let file = format!("{}-Q4_K_M.gguf", spec.effective_alias());
    spec.with_resolved(&file, "0123abcd", 42)
}

impl SystemPreparer for FakeHost {
    async fn install_base_packages(&self) -> Result<()> {
        self.record("install_base_packages").await
    }
    async fn enable_unattended_upgrades(&self) -> Result<()> {
        self.record("enable_unattended_upgrades").await
    }
    async fn install_docker(&self) -> Result<()> {
        self.record("install_docker").await
    }
    async fn ensure_swap(&self, _gib: u32) -> Result<()> {
        self.record("ensure_swap").await
    }
    async fn configure_firewall(&self, _cfg: &DeployConfig) -> Result<()> {
        self.record("configure_firewall").await
    }
}

impl ModelResolver for FakeHost {
    async fn resolve_model(
        &self,
        spec: &ModelSpec,
        _dest: &Path,
        _hf_token: Option<&str>,
    ) -> Result<ResolvedModel> {
        let call = if spec.is_embedding {
            "resolve_emb"
        } else {
            "resolve_llm"
        };
        self.record(call).await?;
        Ok(resolved(spec))
    }

    async fn locate_existing(&self, spec: &ModelSpec, _dir: &Path) -> Result<ResolvedModel> {
        self.record("locate_existing").await?;
        Ok(resolved(spec))
    }
}

impl ServiceManager for FakeHost {
    async fn write_service_config(
        &self,
        _cfg: &DeployConfig,
        _llm: &ResolvedModel,
        _emb: &ResolvedModel,
    ) -> Result<()> {
        self.record("write_service_config").await
    }
    async fn pull_image(&self, _image: &str) -> Result<()> {
        self.record("pull_image").await
    }
    async fn compose_up(&self, _compose_file: &Path) -> Result<()> {
        self.record("compose_up").await
    }
}

impl ReverseProxy for FakeHost {
    async fn ensure_local_proxy(&self, _cfg: &DeployConfig) -> Result<()> {
        self.record("ensure_local_proxy").await
    }
    async fn ensure_tls(&self, _cfg: &DeployConfig) -> Result<()> {
        self.record("ensure_tls").await
    }
}

impl ServiceValidator for FakeHost {
    async fn wait_live(&self, _url: &str, _timeout: Duration) -> Result<()> {
        self.record("wait_live").await
    }
    async fn smoke_test(&self, _base_url: &str, token: &str, _aliases: &ModelAliases) -> Result<()> {
        self.tokens_seen.borrow_mut().push(token.to_string());
        self.record("smoke_test").await
    }
    async fn internal_smoke_test(&self, _cfg: &DeployConfig, token: &str) -> Result<()> {
        self.tokens_seen.borrow_mut().push(token.to_string());
        self.record("internal_smoke_test").await
    }
    async fn sanity_checks(&self, _cfg: &DeployConfig) -> Result<()> {
        self.record("sanity_checks").await
    }
}

// ── Credential store ──────────────────────────────────────────────────────────

/// Delegates to `inner` but refuses every revocation.
pub struct RevokeRefusingStore<S> {
    pub inner: S,
}

impl<S: CredentialStore> CredentialStore for RevokeRefusingStore<S> {
    fn auth_mode(&self) -> AuthMode {
        self.inner.auth_mode()
    }
    fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        self.inner.list_tokens()
    }
    fn show_token(&self, id: &str) -> Result<TokenRecord> {
        self.inner.show_token(id)
    }
    fn create_token(&self, name: &str, value: Option<&str>) -> Result<TokenRecord> {
        self.inner.create_token(name, value)
    }
    fn revoke_token(&self, _id: &str) -> Result<TokenRecord> {
        Err(anyhow!("secrets directory is read-only"))
    }
}

// ── Reporting ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingReporter {
    pub steps: RefCell<Vec<String>>,
    pub successes: RefCell<Vec<String>>,
    pub warnings: RefCell<Vec<String>>,
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.steps.borrow_mut().push(message.to_string());
    }
    fn success(&self, message: &str) {
        self.successes.borrow_mut().push(message.to_string());
    }
    fn warn(&self, message: &str) {
        self.warnings.borrow_mut().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    pub total: Cell<usize>,
    pub advanced: Cell<usize>,
    pub started: RefCell<Vec<String>>,
    pub skipped: RefCell<Vec<String>>,
    pub finished: RefCell<Vec<String>>,
    pub failed: RefCell<Vec<String>>,
}

impl StepProgress for RecordingProgress {
    fn begin(&self, total: usize) {
        self.total.set(total);
    }
    fn started(&self, label: &str) {
        self.started.borrow_mut().push(label.to_string());
    }
    fn skipped(&self, label: &str) {
        self.skipped.borrow_mut().push(label.to_string());
    }
    fn finished(&self, label: &str, _elapsed: Duration) {
        self.finished.borrow_mut().push(label.to_string());
    }
    fn failed(&self, label: &str) {
        self.failed.borrow_mut().push(label.to_string());
    }
    fn advance(&self) {
        self.advanced.set(self.advanced.get() + 1);
    }
}

// ── Probes ────────────────────────────────────────────────────────────────────

pub struct FixedMemory(pub f64);

impl MemoryProbe for FixedMemory {
    fn total_memory_gib(&self) -> Result<f64> {
        Ok(self.0)
    }
}

pub struct NoMemoryInfo;

impl MemoryProbe for NoMemoryInfo {
    fn total_memory_gib(&self) -> Result<f64> {
        Err(anyhow!("MemTotal not found in meminfo"))
    }
}

/// Every port is free except the listed ones.
#[derive(Default)]
pub struct BusyPorts(pub BTreeSet<u16>);

impl BusyPorts {
    pub fn of(ports: &[u16]) -> Self {
        Self(ports.iter().copied().collect())
    }
}

impl BindProbe for BusyPorts {
    fn is_bind_port_free(&self, _host: &str, port: u16) -> bool {
        !self.0.contains(&port)
    }
}
