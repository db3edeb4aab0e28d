//! statehook - hierarchical state machine runner
//!
//! Loads a JSON/YAML machine definition and checks it, runs a list of events
//! through it, or drives it interactively.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::RunnerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statehook")]
#[command(about = "Run hierarchical hook-driven state machines", version)]
struct Cli {
    /// Runner config file (YAML)
    #[arg(short, long, env = "STATEHOOK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a definition and print a summary
    Check {
        /// Definition file (.json, .yaml or .yml)
        definition: PathBuf,
    },

    /// Start a machine and apply events in order
    Run {
        /// Definition file (.json, .yaml or .yml)
        definition: PathBuf,

        /// Events as name or name:payload, comma separated
        #[arg(short, long, default_value = "")]
        events: String,

        /// Settle delay after the last event in milliseconds (overrides config)
        #[arg(long)]
        settle_ms: Option<u64>,
    },

    /// Interactive session on one machine
    Repl {
        /// Definition file (.json, .yaml or .yml)
        definition: PathBuf,
    },

    /// Write the effective runner config to a YAML file
    SaveConfig {
        /// Output path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = RunnerConfig::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log)),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Check { definition } => {
            let loaded = load_or_exit(&definition);
            println!("{}", commands::check(&loaded));
        }
        Commands::Run {
            definition,
            events,
            settle_ms,
        } => {
            if let Some(ms) = settle_ms {
                config.settle_ms = ms;
            }
            let events = commands::parse_event_list(&events)?;
            let loaded = load_or_exit(&definition);
            print!("{}", commands::run(loaded, &events, &config).await?);
        }
        Commands::Repl { definition } => {
            let loaded = load_or_exit(&definition);
            repl::run(loaded, &config).await?;
        }
        Commands::SaveConfig { path } => {
            config.save(&path)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }

    Ok(())
}

fn load_or_exit(path: &std::path::Path) -> statehook_core::Definition {
    match commands::load_definition(path) {
        Ok(definition) => definition,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
