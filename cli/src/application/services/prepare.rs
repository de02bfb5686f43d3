//! Application service: final configuration assembly before a deploy.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::application::ports::{BindProbe, MemoryProbe, ProgressReporter};
use crate::domain::DeployConfig;
use crate::domain::network::pick_free_bind_port;
use crate::domain::tuning::{self, TuningOutcome};

/// Loopback address internal services bind to.
pub const LOOPBACK: &str = "127.0.0.1";

/// Result of [`prepare_config`].
#[derive(Debug, Clone)]
pub struct PreparedConfig {
    pub config: DeployConfig,
    /// Detected memory, when detection succeeded.
    pub memory_gib: Option<f64>,
    pub tuning: TuningOutcome,
}

/// Tuning that would apply on this host.
///
/// With `auto_tune` off the baseline is used verbatim. When memory cannot
/// be detected only the hard floors are applied.
pub fn plan_tuning(
    cfg: &DeployConfig,
    memory: &impl MemoryProbe,
    reporter: &impl ProgressReporter,
) -> (Option<f64>, TuningOutcome) {
    if !cfg.auto_tune {
        if cfg.tuning.models_max < tuning::MIN_MODELS_MAX {
            reporter.warn(&format!(
                "models_max = {} cannot hold both the LLM and the embedding model at once.",
                cfg.tuning.models_max
            ));
        }
        return (
            None,
            TuningOutcome {
                tuning: cfg.tuning,
                adjustments: Vec::new(),
            },
        );
    }

    match memory.total_memory_gib() {
        Ok(gib) => {
            tracing::info!(memory_gib = gib, "detected host memory");
            (Some(gib), tuning::tune(gib, cfg.tuning))
        }
        Err(e) => {
            tracing::warn!(error = %e, "memory detection failed; applying tuning floors only");
            reporter.warn(&format!(
                "Could not detect host memory ({e}); using configured tuning."
            ));
            (None, tuning::enforce_floors(cfg.tuning))
        }
    }
}

/// Validate `cfg`, tune it for this host and allocate internal ports.
///
/// # Errors
///
/// Returns an error for an invalid configuration or when no loopback port
/// is free for the internal services.
pub fn prepare_config(
    mut cfg: DeployConfig,
    memory: &impl MemoryProbe,
    bind: &impl BindProbe,
    reporter: &impl ProgressReporter,
) -> Result<PreparedConfig> {
    cfg.validate()?;

    let (memory_gib, outcome) = plan_tuning(&cfg, memory, reporter);
    for adjustment in &outcome.adjustments {
        tracing::info!(%adjustment, "tuning adjusted");
        reporter.step(&format!("Auto-tune {adjustment}"));
    }
    cfg.tuning = outcome.tuning;

    if cfg.behind_auth_proxy() {
        let public = cfg.network.port;
        let internal = pick_free_bind_port(
            LOOPBACK,
            cfg.llama_internal_port,
            &BTreeSet::from([public]),
            |host, port| bind.is_bind_port_free(host, port),
        )?;
        let sidecar = pick_free_bind_port(
            LOOPBACK,
            cfg.sidecar_port,
            &BTreeSet::from([public, internal]),
            |host, port| bind.is_bind_port_free(host, port),
        )?;
        if internal != cfg.llama_internal_port {
            reporter.warn(&format!(
                "Port {} is busy; llama-server will listen on {LOOPBACK}:{internal}.",
                cfg.llama_internal_port
            ));
        }
        if sidecar != cfg.sidecar_port {
            reporter.warn(&format!(
                "Port {} is busy; the auth sidecar will listen on {LOOPBACK}:{sidecar}.",
                cfg.sidecar_port
            ));
        }
        cfg.llama_internal_port = internal;
        cfg.sidecar_port = sidecar;
    }

    Ok(PreparedConfig {
        config: cfg,
        memory_gib,
        tuning: outcome,
    })
}
