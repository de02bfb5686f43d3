//! `llama-deploy tune`: show the tuning a deploy would apply on this host.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::MemoryProbe;
use crate::application::services::prepare::plan_tuning;
use crate::infra::config;
use crate::infra::system::ProcMemoryProbe;
use crate::output::{TerminalReporter, json};

/// Arguments for the tune command.
#[derive(Args, Debug, Default)]
pub struct TuneArgs {
    /// YAML deploy configuration providing the baseline
    #[arg(long, env = "LLAMA_DEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pretend the host has this much memory
    #[arg(long)]
    pub memory_gib: Option<f64>,

    /// Baseline swap size in GiB
    #[arg(long)]
    pub swap_gib: Option<u32>,

    /// Baseline models_max
    #[arg(long)]
    pub models_max: Option<u32>,

    /// Baseline parallel slots
    #[arg(long)]
    pub parallel: Option<u32>,
}

/// Memory probe returning a fixed figure.
struct FixedMemory(f64);

impl MemoryProbe for FixedMemory {
    fn total_memory_gib(&self) -> Result<f64> {
        Ok(self.0)
    }
}

/// Run the tune command.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded.
pub fn run(app: &AppContext, args: TuneArgs) -> Result<ExitCode> {
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(v) = args.swap_gib {
        cfg.tuning.swap_gib = v;
    }
    if let Some(v) = args.models_max {
        cfg.tuning.models_max = v;
    }
    if let Some(v) = args.parallel {
        cfg.tuning.parallel = v;
    }

    let reporter = TerminalReporter::new(&app.output);
    let (memory_gib, outcome) = match args.memory_gib {
        Some(gib) => plan_tuning(&cfg, &FixedMemory(gib), &reporter),
        None => plan_tuning(&cfg, &ProcMemoryProbe::default(), &reporter),
    };

    if app.is_json() {
        let adjustments: Vec<String> = outcome.adjustments.iter().map(ToString::to_string).collect();
        json::print(&serde_json::json!({
            "memory_gib": memory_gib,
            "auto_tune": cfg.auto_tune,
            "baseline": cfg.tuning,
            "tuning": outcome.tuning,
            "adjustments": adjustments,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    match memory_gib {
        Some(gib) => app.output.kv("Memory:", &format!("{gib:.1} GiB")),
        None => app.output.kv("Memory:", "unknown"),
    }
    app.output.kv("swap_gib:", &outcome.tuning.swap_gib.to_string());
    app.output.kv("models_max:", &outcome.tuning.models_max.to_string());
    app.output.kv("parallel:", &outcome.tuning.parallel.to_string());
    if outcome.adjustments.is_empty() {
        app.output.success("Baseline fits this host");
    }
    for adjustment in &outcome.adjustments {
        app.output.info(&format!("Adjusted {adjustment}"));
    }
    Ok(ExitCode::SUCCESS)
}
