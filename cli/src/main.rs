//! llama-deploy - self-hosted llama.cpp inference server provisioning

#![cfg_attr(test, allow(clippy::expect_used))]

use std::process::ExitCode;

use clap::Parser;

use llama_deploy::cli::Cli;
use llama_deploy::logging::Redactor;
use llama_deploy::output::json;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_errors = cli.json;
    let redactor = Redactor::standard();

    match cli.run(redactor.clone()).await {
        Ok(code) => code,
        Err(e) => {
            let message = redactor.redact(&format!("{e:#}")).into_owned();
            tracing::error!("[FATAL] {message}");
            match json_errors
                .then(|| json::format_error(&message, json::error_code(&e)))
                .transpose()
            {
                Ok(Some(body)) => println!("{body}"),
                _ => eprintln!("Error: {message}"),
            }
            ExitCode::FAILURE
        }
    }
}
