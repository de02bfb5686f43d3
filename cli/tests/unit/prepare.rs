//! Configuration assembly: validation, tuning and internal port allocation.

#![allow(clippy::expect_used)]

use llama_deploy::application::services::prepare::{plan_tuning, prepare_config};
use llama_deploy::domain::{AuthMode, ConfigError, DeployConfig, Tuning};

use crate::mocks::{BusyPorts, FixedMemory, NoMemoryInfo, RecordingReporter};

fn hashed() -> DeployConfig {
    DeployConfig {
        auth_mode: AuthMode::Hashed,
        ..DeployConfig::default()
    }
}

#[test]
fn test_plaintext_keeps_internal_ports_untouched() {
    let cfg = DeployConfig::default();
    let prepared = prepare_config(
        cfg,
        &FixedMemory(64.0),
        &BusyPorts::of(&[8081, 9000]),
        &RecordingReporter::default(),
    )
    .expect("prepare");

    assert_eq!(prepared.config.llama_internal_port, 8081);
    assert_eq!(prepared.config.sidecar_port, 9000);
    assert_eq!(prepared.memory_gib, Some(64.0));
}

#[test]
fn test_hashed_moves_busy_internal_ports() {
    let reporter = RecordingReporter::default();
    let prepared = prepare_config(
        hashed(),
        &FixedMemory(64.0),
        &BusyPorts::of(&[8081, 8082, 9000]),
        &reporter,
    )
    .expect("prepare");

    assert_eq!(prepared.config.llama_internal_port, 8083);
    assert_eq!(prepared.config.sidecar_port, 9001);
    assert_eq!(reporter.warnings.borrow().len(), 2);
}

#[test]
fn test_internal_ports_never_collide_with_public_port() {
    let mut cfg = hashed();
    cfg.network.port = 8081;
    cfg.llama_internal_port = 8081;
    cfg.sidecar_port = 8082;

    let prepared = prepare_config(
        cfg,
        &FixedMemory(64.0),
        &BusyPorts::default(),
        &RecordingReporter::default(),
    )
    .expect("prepare");

    let c = &prepared.config;
    assert_eq!(c.llama_internal_port, 8082);
    assert_eq!(c.sidecar_port, 8083);
}

#[test]
fn test_small_host_is_tuned_down_and_reported() {
    let mut cfg = DeployConfig::default();
    cfg.tuning = Tuning {
        swap_gib: 2,
        models_max: 4,
        parallel: 3,
    };
    let reporter = RecordingReporter::default();

    let prepared = prepare_config(cfg, &FixedMemory(8.0), &BusyPorts::default(), &reporter)
        .expect("prepare");

    assert_eq!(
        prepared.config.tuning,
        Tuning {
            swap_gib: 8,
            models_max: 2,
            parallel: 1,
        }
    );
    assert_eq!(prepared.tuning.adjustments.len(), 3);
    assert_eq!(reporter.steps.borrow().len(), 3);
    assert!(reporter.steps.borrow()[0].starts_with("Auto-tune models_max"));
}

#[test]
fn test_auto_tune_off_uses_baseline_and_warns_on_low_models_max() {
    let mut cfg = DeployConfig::default();
    cfg.auto_tune = false;
    cfg.tuning.models_max = 1;
    let reporter = RecordingReporter::default();

    let (memory, outcome) = plan_tuning(&cfg, &FixedMemory(4.0), &reporter);

    assert_eq!(memory, None);
    assert_eq!(outcome.tuning, cfg.tuning);
    assert!(outcome.adjustments.is_empty());
    assert!(reporter.warnings.borrow()[0].contains("models_max = 1"));
}

#[test]
fn test_memory_detection_failure_applies_floors_only() {
    let mut cfg = DeployConfig::default();
    cfg.tuning = Tuning {
        swap_gib: 1,
        models_max: 1,
        parallel: 0,
    };
    let reporter = RecordingReporter::default();

    let (memory, outcome) = plan_tuning(&cfg, &NoMemoryInfo, &reporter);

    assert_eq!(memory, None);
    assert_eq!(
        outcome.tuning,
        Tuning {
            swap_gib: 1,
            models_max: 2,
            parallel: 1,
        }
    );
    assert!(reporter.warnings.borrow()[0].contains("MemTotal not found"));
}

#[test]
fn test_invalid_config_is_rejected_before_probing() {
    let mut cfg = DeployConfig::default();
    cfg.network.port = 0;

    let err = prepare_config(
        cfg,
        &FixedMemory(64.0),
        &BusyPorts::default(),
        &RecordingReporter::default(),
    )
    .expect_err("invalid");

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidValue { key, .. }) if key == "network.port"
    ));
}
