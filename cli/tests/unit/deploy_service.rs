//! Deploy use-case against a recording fake host and a real token store.

#![allow(clippy::expect_used)]

use llama_deploy::application::ports::CredentialStore;
use llama_deploy::application::services::bootstrap_token::TEMPORARY_TOKEN_NAME;
use std::time::Duration;

use anyhow::Result;
use llama_deploy::application::services::deploy::{DeployOutcome, run_deploy};
use llama_deploy::domain::{AuthMode, DeployConfig, DeployError};
use llama_deploy::infra::token_store::TokenStore;
use tempfile::TempDir;

use crate::mocks::{FakeHost, RecordingProgress, RecordingReporter, RevokeRefusingStore};

fn config(dir: &TempDir, mode: AuthMode) -> DeployConfig {
    DeployConfig {
        base_dir: dir.path().to_path_buf(),
        auth_mode: mode,
        ..DeployConfig::default()
    }
}

fn store_for(cfg: &DeployConfig) -> TokenStore {
    TokenStore::new(cfg.secrets_dir(), cfg.auth_mode)
}

async fn deploy(
    host: &FakeHost,
    store: &impl CredentialStore,
    cfg: &DeployConfig,
    progress: &RecordingProgress,
    reporter: &RecordingReporter,
) -> Result<DeployOutcome> {
    run_deploy(host, store, cfg, progress, reporter, std::future::pending()).await
}

#[tokio::test]
async fn test_plaintext_first_deploy_runs_every_phase_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Plaintext);
    let store = store_for(&cfg);
    let host = FakeHost::new();
    let progress = RecordingProgress::default();
    let reporter = RecordingReporter::default();

    let outcome = deploy(&host, &store, &cfg, &progress, &reporter)
        .await
        .expect("deploy");

    assert_eq!(
        host.calls(),
        vec![
            "install_base_packages",
            "enable_unattended_upgrades",
            "install_docker",
            "ensure_swap",
            "configure_firewall",
            "resolve_llm",
            "resolve_emb",
            "write_service_config",
            "pull_image",
            "compose_up",
            "wait_live",
            "smoke_test",
            "sanity_checks",
        ]
    );
    assert_eq!(progress.advanced.get(), progress.total.get());
    assert_eq!(progress.total.get(), 17);
    assert!(outcome.token.created);
    assert!(!outcome.temporary_revoked);
    assert_eq!(host.tokens_seen.borrow().as_slice(), [outcome.token.value.clone()]);

    let keyfile = std::fs::read_to_string(cfg.secrets_dir().join("api_keys")).expect("api_keys");
    assert_eq!(keyfile, format!("{}\n", outcome.token.value));
}

#[tokio::test]
async fn test_plaintext_explicit_value_yields_exactly_one_active_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir, AuthMode::Plaintext);
    cfg.api_token = Some("sk-explicit-value".to_string());
    let store = store_for(&cfg);
    let reporter = RecordingReporter::default();

    for _ in 0..2 {
        let host = FakeHost::new();
        deploy(&host, &store, &cfg, &RecordingProgress::default(), &reporter)
            .await
            .expect("deploy");
        assert_eq!(host.tokens_seen.borrow().as_slice(), ["sk-explicit-value"]);
    }

    let active = store.active_tokens().expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].value.as_deref(), Some("sk-explicit-value"));
}

#[tokio::test]
async fn test_hashed_first_deploy_fronts_with_local_proxy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Hashed);
    let store = store_for(&cfg);
    let host = FakeHost::new();

    let outcome = deploy(
        &host,
        &store,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("deploy");

    assert!(host.called("ensure_local_proxy"));
    assert!(!host.called("ensure_tls"));
    assert!(outcome.token.created);
    assert!(outcome.token.temporary_id.is_none());

    let on_disk = std::fs::read_to_string(cfg.secrets_dir().join("tokens.json")).expect("tokens");
    assert!(!on_disk.contains(&outcome.token.value));
}

#[tokio::test]
async fn test_hashed_redeploy_uses_and_revokes_temporary_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Hashed);
    let store = store_for(&cfg);

    let first = deploy(
        &FakeHost::new(),
        &store,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("first deploy");

    let host = FakeHost::new();
    let second = deploy(
        &host,
        &store,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("redeploy");

    assert!(!second.token.created);
    assert!(second.temporary_revoked);
    assert_eq!(second.token.name, TEMPORARY_TOKEN_NAME);
    let seen = host.tokens_seen.borrow().clone();
    assert_eq!(seen.len(), 1);
    assert_ne!(seen[0], first.token.value);

    let all = store.list_tokens().expect("list");
    assert_eq!(all.len(), 2);
    let active = store.active_tokens().expect("active");
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].name, TEMPORARY_TOKEN_NAME);
}

#[tokio::test]
async fn test_failed_validation_still_revokes_temporary_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Hashed);
    let store = store_for(&cfg);
    deploy(
        &FakeHost::new(),
        &store,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("first deploy");

    let host = FakeHost::failing_at("smoke_test");
    let progress = RecordingProgress::default();
    let err = deploy(&host, &store, &cfg, &progress, &RecordingReporter::default())
        .await
        .expect_err("smoke test fails");

    assert!(
        err.to_string()
            .contains("step 'Smoke tests (OpenAI-compatible routes)' failed")
    );
    assert_eq!(
        progress.failed.borrow().as_slice(),
        ["Smoke tests (OpenAI-compatible routes)"]
    );
    assert!(!host.called("sanity_checks"));

    let temporary: Vec<_> = store
        .list_tokens()
        .expect("list")
        .into_iter()
        .filter(|t| t.name == TEMPORARY_TOKEN_NAME)
        .collect();
    assert_eq!(temporary.len(), 1);
    assert!(temporary[0].revoked);
    assert_eq!(store.active_tokens().expect("active").len(), 1);
}

#[tokio::test]
async fn test_failure_stops_later_steps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Plaintext);
    let store = store_for(&cfg);
    let host = FakeHost::failing_at("install_docker");
    let progress = RecordingProgress::default();

    deploy(&host, &store, &cfg, &progress, &RecordingReporter::default())
        .await
        .expect_err("docker fails");

    assert_eq!(host.calls().last().map(String::as_str), Some("install_docker"));
    assert_eq!(progress.advanced.get(), 2);
    assert!(store.list_tokens().expect("list").is_empty());
}

#[tokio::test]
async fn test_skip_download_uses_files_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir, AuthMode::Plaintext);
    cfg.skip_download = true;
    let store = store_for(&cfg);
    let host = FakeHost::new();
    let progress = RecordingProgress::default();

    let outcome = deploy(&host, &store, &cfg, &progress, &RecordingReporter::default())
        .await
        .expect("deploy");

    assert!(host.called("locate_existing"));
    assert!(!host.called("resolve_llm"));
    assert!(!host.called("resolve_emb"));
    assert!(
        progress
            .skipped
            .borrow()
            .contains(&"Resolve + download LLM GGUF".to_string())
    );
    assert_eq!(outcome.llm.alias(), "Qwen3-8B");
    assert_eq!(outcome.emb.alias(), "Qwen3-Embedding-0.6B");
}

#[tokio::test]
async fn test_unpublished_plaintext_validates_on_internal_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir, AuthMode::Plaintext);
    cfg.network.publish = false;
    cfg.network.configure_ufw = false;
    let store = store_for(&cfg);
    let host = FakeHost::new();
    let progress = RecordingProgress::default();

    deploy(&host, &store, &cfg, &progress, &RecordingReporter::default())
        .await
        .expect("deploy");

    assert!(host.called("internal_smoke_test"));
    assert!(!host.called("wait_live"));
    assert!(!host.called("configure_firewall"));
    assert!(
        progress
            .skipped
            .borrow()
            .contains(&"Firewall (UFW) hardening".to_string())
    );
}

#[tokio::test]
async fn test_domain_uses_tls_instead_of_local_proxy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir, AuthMode::Hashed);
    cfg.domain = Some("llm.example.com".to_string());
    cfg.certbot_email = Some("ops@example.com".to_string());
    let host = FakeHost::new();

    deploy(
        &host,
        &store_for(&cfg),
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("deploy");

    assert!(host.called("ensure_tls"));
    assert!(!host.called("ensure_local_proxy"));
}

#[tokio::test]
async fn test_sanity_check_failure_only_warns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Plaintext);
    let host = FakeHost::failing_at("sanity_checks");
    let reporter = RecordingReporter::default();

    deploy(
        &host,
        &store_for(&cfg),
        &cfg,
        &RecordingProgress::default(),
        &reporter,
    )
    .await
    .expect("deploy succeeds");

    assert!(
        reporter
            .warnings
            .borrow()
            .iter()
            .any(|w| w.contains("sanity_checks exploded"))
    );
}

#[tokio::test]
async fn test_revocation_failure_is_downgraded_to_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Hashed);
    let inner = store_for(&cfg);
    deploy(
        &FakeHost::new(),
        &inner,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("first deploy");

    let store = RevokeRefusingStore { inner };
    let reporter = RecordingReporter::default();
    let outcome = deploy(
        &FakeHost::new(),
        &store,
        &cfg,
        &RecordingProgress::default(),
        &reporter,
    )
    .await
    .expect("redeploy succeeds");

    assert!(!outcome.temporary_revoked);
    assert!(
        reporter
            .warnings
            .borrow()
            .iter()
            .any(|w| w.contains("read-only"))
    );
    assert_eq!(store.active_tokens().expect("active").len(), 2);
}

#[tokio::test]
async fn test_interrupt_during_validation_revokes_temporary_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(&dir, AuthMode::Hashed);
    let store = store_for(&cfg);
    deploy(
        &FakeHost::new(),
        &store,
        &cfg,
        &RecordingProgress::default(),
        &RecordingReporter::default(),
    )
    .await
    .expect("first deploy");

    let host = FakeHost::hanging_at("smoke_test");
    let progress = RecordingProgress::default();
    let reporter = RecordingReporter::default();
    let err = run_deploy(
        &host,
        &store,
        &cfg,
        &progress,
        &reporter,
        tokio::time::sleep(Duration::from_millis(50)),
    )
    .await
    .expect_err("interrupted");

    assert!(matches!(
        err.downcast_ref::<DeployError>(),
        Some(DeployError::Interrupted { command })
            if command == "Smoke tests (OpenAI-compatible routes)"
    ));
    assert_eq!(
        progress.failed.borrow().as_slice(),
        ["Smoke tests (OpenAI-compatible routes)"]
    );
    assert!(!host.called("sanity_checks"));
    assert!(
        reporter
            .successes
            .borrow()
            .iter()
            .any(|s| s.starts_with("Revoked temporary smoke-test token"))
    );

    let active = store.active_tokens().expect("active");
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].name, TEMPORARY_TOKEN_NAME);
}
