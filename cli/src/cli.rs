//! CLI argument parsing with clap derive

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags};
use crate::commands;
use crate::logging::{self, LogOptions, Redactor};

/// Self-hosted llama.cpp inference server deployer
#[derive(Parser)]
#[command(
    name = "llama-deploy",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision this host and start the inference server (root)
    Deploy(Box<commands::deploy::DeployArgs>),

    /// Manage API tokens
    Tokens(commands::tokens::TokensArgs),

    /// Show the tuning that would apply on this host
    Tune(commands::tune::TuneArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// `redactor` is installed on every log sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self, redactor: Redactor) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            verbose,
            command,
        } = self;
        let app = AppContext::new(AppFlags {
            no_color,
            quiet,
            json,
            verbose,
        });

        match command {
            // Deploy picks its log file once the config is known.
            Command::Deploy(args) => commands::deploy::run(&app, *args, redactor).await,
            Command::Tokens(args) => {
                init_console_logging(redactor, verbose)?;
                commands::tokens::run(&app, args)
            }
            Command::Tune(args) => {
                init_console_logging(redactor, verbose)?;
                commands::tune::run(&app, args)
            }
            Command::Version => Ok(commands::version::run(json)),
        }
    }
}

fn init_console_logging(redactor: Redactor, verbose: bool) -> Result<()> {
    logging::init(
        redactor,
        &LogOptions {
            verbose,
            ..LogOptions::default()
        },
    )
    .map(|_| ())
}
