//! mmr-node: multi-master replication demo and configuration tooling.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

mod config;
mod node;
mod simulation;

use config::{LogFormat, NodeConfig};

/// Multi-master document replication with vector-clock conflict resolution
#[derive(Parser, Debug)]
#[command(name = "mmr-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run three masters and a hub in process and print what they converge to
    Demo {
        /// Give up if the masters have not converged by then
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        /// First master port; the others and the hub follow it
        #[arg(long, default_value_t = 27017)]
        base_port: u16,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Validate the configuration file and exit
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match NodeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => NodeConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    match cli.command {
        Commands::Config => match config.to_toml() {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Check => {
            if cli.config.is_none() {
                eprintln!("error: check requires --config");
                return ExitCode::FAILURE;
            }
            // load() already validated it
            println!("configuration ok");
            ExitCode::SUCCESS
        }
        Commands::Demo {
            timeout_secs,
            base_port,
        } => {
            init_logging(&config);
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("failed to start runtime: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let timeout = Duration::from_secs(timeout_secs);
            match runtime.block_on(simulation::run(&config, base_port, timeout)) {
                Ok(report) => match serde_json::to_string_pretty(&report) {
                    Ok(json) => {
                        info!("masters converged");
                        println!("{}", json);
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!("failed to encode report: {}", e);
                        ExitCode::FAILURE
                    }
                },
                Err(e) => {
                    error!("demo failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_logging(config: &NodeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}
