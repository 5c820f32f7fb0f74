//! mendd — MendOps healing control plane daemon.
//!
//! Runs the orchestrator supervisor against a workspace, feeding it from
//! spool directories under the state dir: `spool/incidents/`,
//! `spool/worker-reports/`, and `spool/deployments/`. External collaborators
//! (the detector, the worker agent, the deployment dispatcher) drop JSON
//! files there; processed files move to `processed/`.

use clap::{Parser, Subcommand};
use mendd::config::DaemonConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mendd")]
#[command(about = "MendOps healing control plane daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the healing supervisor
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mendd/config.json")]
        config: PathBuf,
    },

    /// Drop an incident JSON into the spool for the running daemon
    Enqueue {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mendd/config.json")]
        config: PathBuf,

        /// Incident JSON file
        #[arg(long)]
        file: PathBuf,
    },

    /// List healing sessions from the audit store
    Sessions {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mendd/config.json")]
        config: PathBuf,

        /// Max rows to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List knowledge-base entries
    Kb {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/mendd/config.json")]
        config: PathBuf,
    },

    /// Write a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/mendd/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("mendd=info".parse()?))
        .init();

    match cli.command {
        Commands::Run { config } => {
            let config = DaemonConfig::load(&config)?;
            mendd::daemon::run(config).await?;
        }
        Commands::Enqueue { config, file } => {
            let config = DaemonConfig::load(&config)?;
            mendd::daemon::enqueue(&config, &file)?;
        }
        Commands::Sessions { config, limit } => {
            let config = DaemonConfig::load(&config)?;
            mendd::daemon::print_sessions(&config, limit);
        }
        Commands::Kb { config } => {
            let config = DaemonConfig::load(&config)?;
            mendd::daemon::print_kb(&config);
        }
        Commands::InitConfig { output } => {
            DaemonConfig::write_sample(&output)?;
            println!("wrote sample config to {}", output.display());
        }
    }

    Ok(())
}
