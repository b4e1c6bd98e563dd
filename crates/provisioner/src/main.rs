//! `dnssec-kms` — provisioner binary entry point.
//!
//! Startup sequence:
//! 1. Parse the command line and load + validate [`ModuleConfig`].
//! 2. Initialise structured JSON logging.
//! 3. Initialise AWS SDK clients (KMS, STS).
//! 4. Resolve the caller context and render the desired state.
//! 5. Run the command and print its JSON result on stdout.

mod aws;
mod cli;
mod config;
mod reconcile;
mod telemetry;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use common::ProvisionError;
use serde::Serialize;
use tracing::{error, info};

use aws::AwsClients;
use cli::{Cli, Command};
use config::ModuleConfig;
use reconcile::DesiredState;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<ProvisionError>()
                .map_or(1, ProvisionError::exit_code);
            error!(exit_code = code, error = %format!("{e:#}"), "dnssec-kms failed");
            eprintln!("ERROR: {e:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = ModuleConfig::load(cli.config.as_deref())?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        alias = %cfg.name,
        command = ?cli.command,
        "dnssec-kms starting"
    );

    // -----------------------------------------------------------------------
    // 3. AWS clients
    // -----------------------------------------------------------------------
    let aws = AwsClients::init(cfg.endpoint_url.as_deref())
        .await
        .context("failed to initialise AWS clients")?;

    // -----------------------------------------------------------------------
    // 4. Commands that only need the alias name
    // -----------------------------------------------------------------------
    if !cli.command.needs_caller_context() {
        return match cli.command {
            Command::Destroy => print_json(
                &reconcile::destroy(&aws.kms, &cfg.name, cfg.key_deletion_window_in_days).await?,
            ),
            _ => print_json(&reconcile::outputs(&aws.kms, &cfg.name).await?),
        };
    }

    // -----------------------------------------------------------------------
    // 5. Desired state
    // -----------------------------------------------------------------------
    let ctx = aws::resolve_caller_context(&aws.identity, aws.region.as_deref()).await?;
    let desired = DesiredState::new(&cfg, ctx);

    match cli.command {
        Command::Policy => print_json(&desired.policy),
        Command::Plan => print_json(&reconcile::plan(&aws.kms, &desired).await?),
        _ => {
            let report = reconcile::apply(&aws.kms, &desired).await?;
            info!(
                changes = report.changes.len(),
                key_arn = %report.outputs.aws_kms_key_arn,
                "apply complete"
            );
            print_json(&report.outputs)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialise result")?;
    println!("{json}");
    Ok(())
}
