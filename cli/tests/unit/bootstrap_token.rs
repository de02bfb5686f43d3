//! Choosing the credential used to validate a deployment.

#![allow(clippy::expect_used)]

use llama_deploy::application::ports::CredentialStore;
use llama_deploy::application::services::bootstrap_token::{
    BootstrapToken, TEMPORARY_TOKEN_NAME, resolve_bootstrap_token, revoke_temporary_token,
};
use llama_deploy::domain::AuthMode;
use llama_deploy::infra::token_store::TokenStore;

use crate::mocks::{RecordingReporter, RevokeRefusingStore};

fn store(mode: AuthMode) -> (tempfile::TempDir, TokenStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TokenStore::new(dir.path().join("secrets"), mode);
    (dir, store)
}

#[test]
fn test_empty_store_issues_permanent_token() {
    let (_dir, store) = store(AuthMode::Plaintext);
    let reporter = RecordingReporter::default();

    let token = resolve_bootstrap_token(&store, "default", None, &reporter).expect("token");

    assert!(token.created);
    assert!(token.temporary_id.is_none());
    assert_eq!(token.name, "default");
    assert!(!token.value.is_empty());
    assert_eq!(reporter.successes.borrow().len(), 1);
}

#[test]
fn test_plaintext_reuses_existing_value() {
    let (_dir, store) = store(AuthMode::Plaintext);
    let existing = store.create_token("ci", Some("sk-existing")).expect("create");
    let reporter = RecordingReporter::default();

    let token = resolve_bootstrap_token(&store, "default", Some("sk-other"), &reporter)
        .expect("token");

    assert!(!token.created);
    assert_eq!(token.value, "sk-existing");
    assert_eq!(token.name, "ci");
    assert_eq!(store.list_tokens().expect("list").len(), 1);
    assert!(
        reporter.successes.borrow()[0].contains(&existing.id),
        "reports the reused token id"
    );
}

#[test]
fn test_revoked_tokens_are_ignored() {
    let (_dir, store) = store(AuthMode::Plaintext);
    let old = store.create_token("old", None).expect("create");
    store.revoke_token(&old.id).expect("revoke");

    let token = resolve_bootstrap_token(&store, "fresh", None, &RecordingReporter::default())
        .expect("token");

    assert!(token.created);
    assert_eq!(token.name, "fresh");
    assert_eq!(store.active_tokens().expect("active").len(), 1);
}

#[test]
fn test_hashed_redeploy_issues_temporary_token() {
    let (_dir, store) = store(AuthMode::Hashed);
    store.create_token("default", None).expect("create");

    let token = resolve_bootstrap_token(&store, "default", None, &RecordingReporter::default())
        .expect("token");

    assert!(!token.created);
    assert_eq!(token.name, TEMPORARY_TOKEN_NAME);
    let id = token.temporary_id.clone().expect("temporary id");
    assert_eq!(store.active_tokens().expect("active").len(), 2);

    assert!(revoke_temporary_token(&store, &token, &RecordingReporter::default()));
    let record = store
        .list_tokens()
        .expect("list")
        .into_iter()
        .find(|r| r.id == id)
        .expect("temporary record");
    assert!(record.revoked);
}

#[test]
fn test_blank_explicit_value_is_rejected() {
    let (_dir, store) = store(AuthMode::Plaintext);
    let err = resolve_bootstrap_token(&store, "default", Some("   "), &RecordingReporter::default())
        .expect_err("blank value");
    assert!(err.downcast_ref::<llama_deploy::domain::TokenError>().is_some());
    assert!(store.list_tokens().expect("list").is_empty());
}

#[test]
fn test_revoke_without_temporary_id_is_noop() {
    let (_dir, store) = store(AuthMode::Plaintext);
    let token = BootstrapToken {
        value: "sk-x".to_string(),
        temporary_id: None,
        created: true,
        name: "default".to_string(),
    };
    let reporter = RecordingReporter::default();
    assert!(!revoke_temporary_token(&store, &token, &reporter));
    assert!(reporter.successes.borrow().is_empty());
    assert!(reporter.warnings.borrow().is_empty());
}

#[test]
fn test_revoke_failure_becomes_warning() {
    let (_dir, inner) = store(AuthMode::Hashed);
    let store = RevokeRefusingStore { inner };
    let token = BootstrapToken {
        value: "sk-x".to_string(),
        temporary_id: Some("abc123".to_string()),
        created: false,
        name: TEMPORARY_TOKEN_NAME.to_string(),
    };
    let reporter = RecordingReporter::default();

    assert!(!revoke_temporary_token(&store, &token, &reporter));
    let warnings = reporter.warnings.borrow();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("abc123"));
}

#[test]
fn test_debug_output_redacts_value() {
    let token = BootstrapToken {
        value: "sk-very-secret".to_string(),
        temporary_id: None,
        created: true,
        name: "default".to_string(),
    };
    let text = format!("{token:?}");
    assert!(!text.contains("sk-very-secret"));
    assert!(text.contains("<REDACTED>"));
}
