//! Ebb CLI - Command-line interface for the deployment lifecycle
//!
//! Operators use it to:
//! - Deploy, pause, resume and decommission the data and compute layers
//! - Rotate secrets from the vault into every consuming workload
//! - Inspect layer, workload, secret and budget status
//! - Roll back or prune workload revisions
//!
//! Exit codes: 0 success, 1 validation or dependency error, 2 deployment
//! error, 3 verification timeout.

use clap::{Parser, Subcommand};
use ebb_control::EbbConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod local;
mod output;

use commands::{layers, revisions, secrets, status};
use error::{CliError, CliResult};
use local::LocalBackends;

/// Ebb CLI application
#[derive(Parser)]
#[command(name = "ebb")]
#[command(about = "Ebb - two-plane deployment lifecycle manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EBB_CONFIG")]
    config: Option<PathBuf>,

    /// State file path; provider state is kept beside it
    #[arg(short, long, env = "EBB_STATE", default_value = ".ebb/state.json")]
    state: PathBuf,

    /// Vault file path (defaults to vault.toml beside the state file)
    #[arg(long, env = "EBB_VAULT")]
    vault: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Create the data layer (database, secret store, storage)
    DeployData,

    /// Deploy every workload at the scale the cost policy derives
    DeployCompute,

    /// Stop all compute resources; data is untouched
    Pause,

    /// Restore the last known-good compute configuration
    Resume,

    /// Rotate a secret to the value a vault reference points at
    RotateSecret {
        /// Secret name
        name: String,

        /// Vault reference, `name` or `name@version`
        vault_ref: String,
    },

    /// Show layers, workloads, secrets and projected spend
    Status,

    /// Show the cost plan for the configured workloads
    Plan,

    /// Route a workload back to an earlier revision
    Rollback {
        /// Workload name
        workload: String,

        /// Target revision (omit for the most recent standby)
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Drop a workload's oldest revisions
    Prune {
        /// Workload name
        workload: String,

        /// Revisions to keep, the active one included
        #[arg(short, long, default_value = "3")]
        keep: usize,
    },

    /// Irreversibly delete the data layer
    #[command(alias = "decommission")]
    DecommissionData {
        /// Confirm the deletion without prompting
        #[arg(long)]
        confirm: bool,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(cli).await {
        let message = match &err {
            CliError::Control(control) => format!("{}: {}", control.class(), control),
            other => other.to_string(),
        };
        output::print_error(&message);
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = EbbConfig::load(cli.config.as_deref())?;
    let format = cli.output;

    if let Commands::Config = cli.command {
        return output::print_single(&config, format);
    }

    let vault = cli
        .vault
        .clone()
        .unwrap_or_else(|| LocalBackends::default_vault_path(&cli.state));
    let backends = LocalBackends::open(&cli.state, &vault).await?;
    let controller = backends.controller(config)?;

    let result = match cli.command {
        Commands::DeployData => layers::deploy_data(&controller, format).await,
        Commands::DeployCompute => layers::deploy_compute(&controller, format).await,
        Commands::Pause => layers::pause(&controller, format).await,
        Commands::Resume => layers::resume(&controller, format).await,
        Commands::RotateSecret { name, vault_ref } => {
            secrets::rotate(&controller, &name, &vault_ref, format).await
        }
        Commands::Status => status::status(&controller, format).await,
        Commands::Plan => status::plan(&controller, format).await,
        Commands::Rollback { workload, revision } => {
            revisions::rollback(&controller, &workload, revision, format).await
        }
        Commands::Prune { workload, keep } => {
            revisions::prune(&controller, &workload, keep, format).await
        }
        Commands::DecommissionData { confirm } => {
            layers::decommission_data(&controller, confirm, format).await
        }
        Commands::Config => Ok(()),
    };

    // Failed operations may still have changed the provider
    let persisted = backends.persist().await;
    result?;
    persisted
}
