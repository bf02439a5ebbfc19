//! composite-service
//!
//! Starts every service of a composite-service config in dependency order,
//! prints their merged output, and tears everything down on the first
//! failure or on SIGINT / SIGTERM.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ config ──▶ lifecycle::run ──▶ orchestrator
//!                                   │                 │
//!                                   ▼                 ▼
//!                               stdout ◀── output ◀── service ──▶ process
//!                                                        │
//!                                                        ▼
//!                                                      ready
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use composite_service::config::{load_config, normalize_config, read_config, CompositeServiceConfig, LoadError};
use composite_service::http::server::{self, ProxySettings};
use composite_service::lifecycle::{self, shutdown_signal, Host, Shutdown};
use composite_service::observability::{logging, metrics};

/// Exit status for configuration errors.
const CONFIG_ERROR_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "composite-service", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every service of a config file
    Run {
        /// Path to the TOML config
        config: PathBuf,

        /// Print the normalized config before starting
        #[arg(long)]
        print_config: bool,
    },

    /// Validate a config file and print its normalized form
    Check {
        /// Path to the TOML config
        config: PathBuf,
    },

    /// Run an HTTP proxy front end configured through HOST, PORT and PROXIES
    #[command(hide = true)]
    HttpProxy,
}

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(dispatch(cli.command)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Command) -> Result<i32, Box<dyn std::error::Error>> {
    match command {
        Command::Run { config, print_config } => {
            let raw = match read_config(&config) {
                Ok(raw) => raw,
                Err(e) => return Ok(config_error(e)),
            };
            let print_config = print_config || raw.print_config;
            let mut config = match normalize_config(raw.clone()) {
                Ok(config) => config,
                Err(e) => {
                    if print_config {
                        print_raw_config(&raw)?;
                    }
                    return Ok(config_error(LoadError::Invalid(e)));
                }
            };
            config.print_config = print_config;

            logging::init_logging(&config.observability.log_level);
            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => metrics::init_metrics(addr)?,
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }

            let host = Host::new();
            Ok(lifecycle::run(&host, config).await?)
        }
        Command::Check { config } => {
            let config = match load(&config) {
                Ok(config) => config,
                Err(code) => return Ok(code),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
        Command::HttpProxy => {
            logging::init_logging("warn");
            let settings = ProxySettings::from_env()?;

            let shutdown = Arc::new(Shutdown::new());
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    let signal = shutdown_signal().await;
                    tracing::info!(signal, "Shutdown signal received");
                    shutdown.trigger();
                }
            });

            server::serve(settings, async move { shutdown.wait().await }).await?;
            Ok(0)
        }
    }
}

fn load(path: &std::path::Path) -> Result<composite_service::NormalizedConfig, i32> {
    load_config(path).map_err(config_error)
}

fn config_error(e: LoadError) -> i32 {
    eprintln!("{}", e);
    CONFIG_ERROR_EXIT_CODE
}

/// Print the config as written, for configs that failed validation.
fn print_raw_config(raw: &CompositeServiceConfig) -> Result<(), serde_json::Error> {
    println!("Config:");
    println!("{}", serde_json::to_string_pretty(raw)?);
    Ok(())
}
