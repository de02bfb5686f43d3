//! `llama-deploy tokens`: manage API tokens of an existing deployment.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::AppContext;
use crate::application::ports::CredentialStore;
use crate::domain::config::DEFAULT_BASE_DIR;
use crate::domain::{AuthMode, DeployConfig, TokenRecord};
use crate::infra::token_store::TokenStore;
use crate::output::json;

/// Arguments shared by every tokens subcommand.
#[derive(Args, Debug)]
pub struct TokensArgs {
    /// Deployment root the secrets live under
    #[arg(long, global = true, default_value = DEFAULT_BASE_DIR)]
    pub base_dir: PathBuf,

    /// Force plaintext or hashed (detected from the secrets by default)
    #[arg(long, global = true)]
    pub auth_mode: Option<AuthMode>,

    #[command(subcommand)]
    pub command: TokensCommand,
}

/// Tokens subcommands.
#[derive(Subcommand, Debug)]
pub enum TokensCommand {
    /// List all tokens, including revoked ones
    List,
    /// Issue a new token
    Create {
        /// Human-readable label
        #[arg(long, default_value = "default")]
        name: String,
        /// Use this value instead of a random one
        #[arg(long)]
        value: Option<String>,
    },
    /// Print a token's plaintext (plaintext mode only)
    Show {
        /// Token id
        id: String,
    },
    /// Revoke a token
    Revoke {
        /// Token id
        id: String,
    },
}

/// Token metadata without secret material.
#[derive(Debug, Serialize)]
pub struct TokenView<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a TokenRecord> for TokenView<'a> {
    fn from(r: &'a TokenRecord) -> Self {
        Self {
            id: &r.id,
            name: &r.name,
            status: r.status(),
            created_at: r.created_at,
            revoked_at: r.revoked_at,
        }
    }
}

/// Fixed-width table of `records`.
#[must_use]
pub fn render_table(records: &[TokenRecord]) -> String {
    let id_width = column_width("ID", records.iter().map(|r| r.id.as_str()));
    let name_width = column_width("NAME", records.iter().map(|r| r.name.as_str()));
    let mut lines = vec![format!(
        "{:<id_width$}  {:<name_width$}  {:<7}  CREATED",
        "ID", "NAME", "STATUS"
    )];
    for r in records {
        lines.push(format!(
            "{:<id_width$}  {:<name_width$}  {:<7}  {}",
            r.id,
            r.name,
            r.status(),
            r.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    lines.join("\n")
}

fn column_width<'a>(header: &str, cells: impl Iterator<Item = &'a str>) -> usize {
    cells.map(str::len).max().unwrap_or(0).max(header.len())
}

fn open_store(args: &TokensArgs) -> TokenStore {
    let cfg = DeployConfig {
        base_dir: args.base_dir.clone(),
        ..DeployConfig::default()
    };
    match args.auth_mode {
        Some(mode) => TokenStore::new(cfg.secrets_dir(), mode),
        None => TokenStore::detect(cfg.secrets_dir()),
    }
}

/// Run the tokens command.
///
/// # Errors
///
/// Propagates credential store errors (`TokenError` variants and I/O).
pub fn run(app: &AppContext, args: TokensArgs) -> Result<ExitCode> {
    let store = open_store(&args);
    match args.command {
        TokensCommand::List => list(app, &store),
        TokensCommand::Create { name, value } => create(app, &store, &name, value.as_deref()),
        TokensCommand::Show { id } => show(app, &store, &id),
        TokensCommand::Revoke { id } => revoke(app, &store, &id),
    }
}

fn list(app: &AppContext, store: &TokenStore) -> Result<ExitCode> {
    let records = store.list_tokens()?;
    if app.is_json() {
        let views: Vec<TokenView<'_>> = records.iter().map(TokenView::from).collect();
        json::print(&serde_json::json!({
            "auth_mode": store.auth_mode(),
            "tokens": views,
        }))?;
    } else if records.is_empty() {
        app.output.info(&format!(
            "No tokens in {} ({} mode)",
            store.dir().display(),
            store.auth_mode()
        ));
    } else if !app.output.quiet {
        println!("{}", render_table(&records));
    }
    Ok(ExitCode::SUCCESS)
}

fn create(app: &AppContext, store: &TokenStore, name: &str, value: Option<&str>) -> Result<ExitCode> {
    let record = store.create_token(name, value)?;
    let plaintext = record.value.as_deref().unwrap_or_default();
    if app.is_json() {
        json::print(&serde_json::json!({
            "id": record.id,
            "name": record.name,
            "value": plaintext,
            "auth_mode": store.auth_mode(),
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    app.output
        .success(&format!("Created token '{}' ({})", record.name, record.id));
    app.output.secret("Token:", plaintext);
    match store.auth_mode() {
        AuthMode::Hashed => app
            .output
            .warn("This token is shown ONCE and is not stored on disk. Save it now."),
        AuthMode::Plaintext => app.output.info(&format!(
            "Apply with: {}",
            store.restart_hint()
        )),
    }
    Ok(ExitCode::SUCCESS)
}

fn show(app: &AppContext, store: &TokenStore, id: &str) -> Result<ExitCode> {
    let record = store.show_token(id)?;
    let plaintext = record.value.as_deref().unwrap_or_default();
    if app.is_json() {
        json::print(&serde_json::json!({
            "id": record.id,
            "name": record.name,
            "status": record.status(),
            "value": plaintext,
        }))?;
    } else {
        app.output.kv("Name:", &record.name);
        app.output.kv("Status:", record.status());
        app.output.secret("Token:", plaintext);
    }
    Ok(ExitCode::SUCCESS)
}

fn revoke(app: &AppContext, store: &TokenStore, id: &str) -> Result<ExitCode> {
    let record = store.revoke_token(id)?;
    if app.is_json() {
        json::print(&TokenView::from(&record))?;
        return Ok(ExitCode::SUCCESS);
    }
    app.output
        .success(&format!("Revoked token '{}' ({})", record.name, record.id));
    if store.auth_mode() == AuthMode::Plaintext {
        app.output
            .info(&format!("Apply with: {}", store.restart_hint()));
    }
    Ok(ExitCode::SUCCESS)
}
