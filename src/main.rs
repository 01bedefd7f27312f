//! ariesagent: Aries invitee agent
//!
//! Usage:
//!   ariesagent config                  → print the effective configuration
//!   ariesagent demo                    → run Alice against a simulated Faber
//!   ariesagent demo --revocable        → same, with a revocable credential
//!   ariesagent --log-dir logs demo     → also write daily log files

use ariesagent::demo;
use ariesagent_core::AgentConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "ariesagent",
    about = "Aries invitee agent: connections, held credentials, disclosed proofs",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the agent config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to daily files in this directory (in addition to stderr)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,
    /// Run the full Alice flow against the in-memory peer
    Demo {
        /// Issue a revocable credential and resolve its tails from a cache
        #[arg(long, default_value_t = false)]
        revocable: bool,
        /// Print the final record snapshot as JSON
        #[arg(long, default_value_t = false)]
        snapshot: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref());

    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml());
        }
        Commands::Demo { revocable, snapshot } => {
            let result = demo::run(config, revocable).await?;
            if snapshot {
                println!("{}", result.to_json()?);
            } else {
                println!(
                    "Alice finished: {} connection(s), {} credential(s), {} proof(s)",
                    result.connections.len(),
                    result.credentials.len(),
                    result.proofs.len()
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ariesagent=info".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ariesagent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
