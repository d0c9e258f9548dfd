//! Burrow DNS tunnel CLI
//!
//! Runs either side of the tunnel and generates configuration material.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Burrow - DNS resolution through an encrypted tunnel
#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local resolver that forwards queries through the tunnel
    Client {
        /// Path to configuration file
        #[arg(short, long, default_value = "burrow-client.toml")]
        config: PathBuf,
    },

    /// Run the upstream tunnel endpoint
    Upstream {
        /// Path to configuration file
        #[arg(short, long, default_value = "burrow-upstream.toml")]
        config: PathBuf,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Which side to generate configuration for
        #[arg(value_enum)]
        role: Role,

        /// Output path (defaults to burrow-<role>.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a random key derivation salt
    GenSalt,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Client,
    Upstream,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Client { config } => run_client(config).await,
        Commands::Upstream { config } => run_upstream(config).await,
        Commands::GenConfig { role, output } => generate_config(role, output),
        Commands::GenSalt => {
            println!("{}", hex::encode(burrow_protocol::generate_salt()));
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_client(config_path: PathBuf) -> Result<()> {
    info!("Starting burrow client...");

    let config = burrow_client::Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    let core = burrow_client::ClientCore::new(config).context("Failed to create client core")?;

    info!("Configuration loaded from {:?}", config_path);

    let shutdown_tx = core.shutdown_handle();
    let run_core = core.clone();
    let mut core_handle = tokio::spawn(async move { run_core.run().await });

    tokio::select! {
        result = &mut core_handle => {
            result
                .context("Client task panicked")?
                .context("Client failed")?;
        }
        _ = wait_for_shutdown() => {
            info!("Shutting down client...");
            let _ = shutdown_tx.send(());
            let _ = tokio::time::timeout(Duration::from_secs(5), &mut core_handle).await;
        }
    }

    Ok(())
}

async fn run_upstream(config_path: PathBuf) -> Result<()> {
    info!("Starting burrow upstream...");

    let config = burrow_upstream::Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    info!("Configuration loaded from {:?}", config_path);

    let mut serve_handle = tokio::spawn(burrow_upstream::serve(config));

    tokio::select! {
        result = &mut serve_handle => {
            result
                .context("Upstream task panicked")?
                .context("Upstream failed")?;
        }
        _ = wait_for_shutdown() => {
            // Best-effort stop; there is no drain protocol
            info!("Shutting down upstream...");
            serve_handle.abort();
        }
    }

    Ok(())
}

fn generate_config(role: Role, output: Option<PathBuf>) -> Result<()> {
    let (sample, default_name) = match role {
        Role::Client => (burrow_client::Config::sample(), "burrow-client.toml"),
        Role::Upstream => (burrow_upstream::Config::sample(), "burrow-upstream.toml"),
    };

    let output = output.unwrap_or_else(|| PathBuf::from(default_name));
    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    println!("Sample configuration written to {:?}", output);
    println!("\nGenerate a salt with `burrow gen-salt` and configure the same password and salt on both sides.");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
