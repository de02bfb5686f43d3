//! `llama-deploy deploy`: provision the host and start the inference server.

#![allow(clippy::format_push_string)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::CommandRunner;
use crate::application::services::deploy::{DeployOutcome, run_deploy};
use crate::application::services::prepare::prepare_config;
use crate::domain::{AuthMode, BackendKind, DeployConfig};
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config;
use crate::infra::host::LocalHost;
use crate::infra::system::{ProcMemoryProbe, TcpBindProbe};
use crate::infra::token_store::{TokenStore, conflicting_auth_mode};
use crate::logging::{self, LogOptions, Redactor};
use crate::output::{StepBar, TerminalReporter, json};

/// Arguments for the deploy command. Flags override the config file.
#[derive(Args, Debug, Default)]
pub struct DeployArgs {
    /// YAML deploy configuration
    #[arg(long, env = "LLAMA_DEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root of models, presets, secrets and compose file
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Inference backend: cpu or cuda
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Override the llama.cpp server image
    #[arg(long)]
    pub image: Option<String>,

    /// Address the endpoint binds to
    #[arg(long)]
    pub bind_host: Option<String>,

    /// Public port of the endpoint
    #[arg(long)]
    pub port: Option<u16>,

    /// Keep the endpoint on the compose network only
    #[arg(long)]
    pub no_publish: bool,

    /// Open the public port in UFW
    #[arg(long)]
    pub open_firewall: bool,

    /// Leave UFW untouched
    #[arg(long)]
    pub no_ufw: bool,

    /// Token storage: plaintext or hashed
    #[arg(long)]
    pub auth_mode: Option<AuthMode>,

    /// Fixed value for the first API token
    #[arg(long, env = "LLAMA_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Name of the first API token
    #[arg(long)]
    pub api_token_name: Option<String>,

    /// Hugging Face access token for gated repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Use GGUF files already in <base-dir>/models
    #[arg(long)]
    pub skip_download: bool,

    /// Public domain; enables nginx with a Let's Encrypt certificate
    #[arg(long)]
    pub domain: Option<String>,

    /// Contact address for Let's Encrypt
    #[arg(long)]
    pub certbot_email: Option<String>,

    /// Hugging Face repository of the chat model
    #[arg(long)]
    pub llm_repo: Option<String>,

    /// Filename patterns for the chat model, in priority order
    #[arg(long, value_delimiter = ',')]
    pub llm_patterns: Option<Vec<String>>,

    /// Context length of the chat model
    #[arg(long)]
    pub llm_ctx: Option<u32>,

    /// Name clients use for the chat model
    #[arg(long)]
    pub llm_alias: Option<String>,

    /// Hugging Face repository of the embedding model
    #[arg(long)]
    pub emb_repo: Option<String>,

    /// Filename patterns for the embedding model, in priority order
    #[arg(long, value_delimiter = ',')]
    pub emb_patterns: Option<Vec<String>>,

    /// Context length of the embedding model
    #[arg(long)]
    pub emb_ctx: Option<u32>,

    /// Name clients use for the embedding model
    #[arg(long)]
    pub emb_alias: Option<String>,

    /// Target swap size in GiB (0 leaves swap alone)
    #[arg(long)]
    pub swap_gib: Option<u32>,

    /// Models llama-server keeps loaded at once
    #[arg(long)]
    pub models_max: Option<u32>,

    /// Parallel request slots per model
    #[arg(long)]
    pub parallel: Option<u32>,

    /// Use the tuning values as given
    #[arg(long)]
    pub no_auto_tune: bool,

    /// Log file (default /var/log/llamacpp_deploy.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

impl DeployArgs {
    /// Overlay the flags that were given onto `cfg`.
    pub fn apply(self, cfg: &mut DeployConfig) {
        set(&mut cfg.base_dir, self.base_dir);
        set(&mut cfg.backend, self.backend);
        if self.image.is_some() {
            cfg.image = self.image;
        }
        set(&mut cfg.network.bind_host, self.bind_host);
        set(&mut cfg.network.port, self.port);
        if self.no_publish {
            cfg.network.publish = false;
        }
        if self.open_firewall {
            cfg.network.open_firewall = true;
        }
        if self.no_ufw {
            cfg.network.configure_ufw = false;
        }
        set(&mut cfg.auth_mode, self.auth_mode);
        if self.api_token.is_some() {
            cfg.api_token = self.api_token;
        }
        set(&mut cfg.api_token_name, self.api_token_name);
        if self.hf_token.is_some() {
            cfg.hf_token = self.hf_token;
        }
        if self.skip_download {
            cfg.skip_download = true;
        }
        if self.domain.is_some() {
            cfg.domain = self.domain;
        }
        if self.certbot_email.is_some() {
            cfg.certbot_email = self.certbot_email;
        }

        set(&mut cfg.llm.hf_repo, self.llm_repo);
        set(&mut cfg.llm.candidate_patterns, self.llm_patterns);
        set(&mut cfg.llm.ctx_len, self.llm_ctx);
        if self.llm_alias.is_some() {
            cfg.llm.alias = self.llm_alias;
        }
        set(&mut cfg.emb.hf_repo, self.emb_repo);
        set(&mut cfg.emb.candidate_patterns, self.emb_patterns);
        set(&mut cfg.emb.ctx_len, self.emb_ctx);
        if self.emb_alias.is_some() {
            cfg.emb.alias = self.emb_alias;
        }

        set(&mut cfg.tuning.swap_gib, self.swap_gib);
        set(&mut cfg.tuning.models_max, self.models_max);
        set(&mut cfg.tuning.parallel, self.parallel);
        if self.no_auto_tune {
            cfg.auto_tune = false;
        }
    }
}

async fn ensure_root(runner: &impl CommandRunner) -> Result<()> {
    let uid = runner.capture("id", &["-u"]).await?;
    if uid.trim() != "0" {
        bail!("deploy must run as root (try: sudo llama-deploy deploy ...)");
    }
    Ok(())
}

fn is_ubuntu(os_release: &str) -> bool {
    os_release
        .lines()
        .filter_map(|l| l.strip_prefix("ID="))
        .any(|id| id.trim_matches('"') == "ubuntu")
}

/// Human-readable wrap-up printed after a successful deploy.
#[must_use]
pub fn render_summary(cfg: &DeployConfig, outcome: &DeployOutcome, log_file: Option<&Path>) -> String {
    let base = cfg.base_dir.display();
    let endpoint = cfg.public_base_url();
    let aliases = outcome.aliases();
    let mut out = String::new();

    out.push_str("Deployment complete\n\n");
    out.push_str(&format!("  Endpoint:   {endpoint}\n"));
    out.push_str(&format!("  Auth mode:  {}\n", cfg.auth_mode));
    out.push_str(&format!("  Base dir:   {base}\n"));
    out.push_str(&format!("  Models:     {} ({})\n", aliases.llm, outcome.llm.filename));
    out.push_str(&format!(
        "              {} ({})\n",
        aliases.embedding, outcome.emb.filename
    ));
    if let Some(path) = log_file {
        out.push_str(&format!("  Log file:   {}\n", path.display()));
    }

    if outcome.token.created {
        out.push_str(&format!(
            "\n  API token '{}':  {}\n",
            outcome.token.name, outcome.token.value
        ));
        if cfg.auth_mode == AuthMode::Hashed {
            out.push_str("  This token is shown ONCE and is not stored on disk. Save it now.\n");
        }
    } else {
        out.push_str("\n  Existing API token kept; see `llama-deploy tokens list`.\n");
    }

    out.push_str("\nToken management:\n");
    out.push_str(&format!("  llama-deploy tokens list --base-dir {base}\n"));
    out.push_str(&format!(
        "  llama-deploy tokens create --name NAME --base-dir {base}\n"
    ));
    out.push_str(&format!("  llama-deploy tokens revoke ID --base-dir {base}\n"));

    out.push_str("\nClient usage:\n");
    out.push_str(&format!(
        "  curl {endpoint}/v1/models -H \"Authorization: Bearer $TOKEN\"\n"
    ));
    out.push_str(&format!(
        "  curl {endpoint}/v1/chat/completions -H \"Authorization: Bearer $TOKEN\" \\\n    -H 'Content-Type: application/json' \\\n    -d '{{\"model\":\"{}\",\"messages\":[{{\"role\":\"user\",\"content\":\"Hello\"}}]}}'\n",
        aliases.llm
    ));
    out.push_str(&format!(
        "  curl {endpoint}/v1/embeddings -H \"Authorization: Bearer $TOKEN\" \\\n    -H 'Content-Type: application/json' \\\n    -d '{{\"model\":\"{}\",\"input\":[\"hello\"]}}'\n",
        aliases.embedding
    ));
    out
}

fn summary_json(cfg: &DeployConfig, outcome: &DeployOutcome) -> serde_json::Value {
    let aliases = outcome.aliases();
    serde_json::json!({
        "endpoint": cfg.public_base_url(),
        "auth_mode": cfg.auth_mode,
        "base_dir": cfg.base_dir,
        "token": outcome.token.created.then(|| serde_json::json!({
            "name": outcome.token.name,
            "value": outcome.token.value,
        })),
        "models": {
            "llm": { "alias": aliases.llm, "file": outcome.llm.filename, "sha256": outcome.llm.sha256 },
            "embedding": { "alias": aliases.embedding, "file": outcome.emb.filename, "sha256": outcome.emb.sha256 },
        },
        "tuning": cfg.tuning,
        "temporary_token_revoked": outcome.temporary_revoked,
    })
}

/// Run the deploy command.
///
/// # Errors
///
/// Returns the first failing step's error, or a setup error (config, root
/// check, logging).
pub async fn run(app: &AppContext, args: DeployArgs, redactor: Redactor) -> Result<ExitCode> {
    let mut cfg = config::load(args.config.as_deref())?;
    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(logging::DEFAULT_LOG_FILE));
    args.apply(&mut cfg);

    let fallback = cfg.base_dir.join("deploy.log");
    let log_path = logging::init(
        redactor,
        &LogOptions {
            verbose: app.verbose,
            file: Some(&log_file),
            fallback_file: Some(&fallback),
        },
    )?;

    let runner = TokioCommandRunner::default();
    ensure_root(&runner).await?;

    let reporter = TerminalReporter::new(&app.output);
    match std::fs::read_to_string("/etc/os-release") {
        Ok(text) if is_ubuntu(&text) => {}
        _ => app
            .output
            .warn("This host does not look like Ubuntu; continuing anyway."),
    }

    let prepared = prepare_config(cfg, &ProcMemoryProbe::default(), &TcpBindProbe, &reporter)?;
    let cfg = prepared.config;
    if let Some(gib) = prepared.memory_gib {
        app.output.info(&format!("Detected {gib:.1} GiB of memory"));
    }

    let host = LocalHost::new(runner, app.output.show_progress())?;
    if let Some(existing) = conflicting_auth_mode(&cfg.secrets_dir(), cfg.auth_mode) {
        tracing::warn!(%existing, requested = %cfg.auth_mode, "auth mode differs from existing secrets");
        app.output.warn(&format!(
            "Existing tokens use {existing} mode but this deploy uses {}; pass --auth-mode {existing} to keep them working.",
            cfg.auth_mode
        ));
    }
    let store = TokenStore::new(cfg.secrets_dir(), cfg.auth_mode);
    let outcome = {
        let progress = StepBar::new(&app.output);
        run_deploy(&host, &store, &cfg, &progress, &progress, ctrl_c()).await?
    };

    match config::save_effective(&cfg) {
        Ok(path) => tracing::info!(path = %path.display(), "effective configuration saved"),
        Err(e) => app
            .output
            .warn(&format!("Could not save effective configuration: {e:#}")),
    }

    if app.is_json() {
        json::print(&summary_json(&cfg, &outcome))?;
    } else if app.output.quiet {
        if outcome.token.created {
            app.output.secret("API token:", &outcome.token.value);
        }
    } else {
        println!();
        print!("{}", render_summary(&cfg, &outcome, log_path.as_deref()));
    }
    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
