//! Kino EME CLI - Key acquisition probe
//!
//! Features:
//! - Configuration validation and capability preview
//! - License server round trips with a captured challenge
//! - Server certificate retrieval
//! - FairPlay init data packing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Kino EME CLI - DRM key acquisition toolkit
#[derive(Parser)]
#[command(name = "kino-eme")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Inspect EME configurations and exercise license servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize every key system in an options file
    Config {
        /// Path to an EME options JSON file
        file: PathBuf,
    },

    /// POST a license challenge to a license server
    License {
        /// License server URL
        url: String,

        /// File containing the challenge bytes
        #[arg(short, long)]
        challenge: PathBuf,

        /// Key system the challenge belongs to
        #[arg(short, long, default_value = "com.widevine.alpha")]
        key_system: String,

        /// Extra request header as name=value (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Write the license to a file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Request timeout in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Fetch a server certificate
    Certificate {
        /// Certificate URL
        url: String,

        /// Write the certificate to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a FairPlay init data buffer
    FairplayPack {
        /// File containing the raw init data
        #[arg(long)]
        init_data: PathBuf,

        /// Content id to embed
        #[arg(long)]
        content_id: String,

        /// File containing the server certificate
        #[arg(long)]
        certificate: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .init();

    kino_eme::init();

    match cli.command {
        Commands::Config { file } => {
            commands::config(&file, &cli.format)?;
        }
        Commands::License { url, challenge, key_system, headers, output, timeout_ms } => {
            commands::license(&url, &challenge, &key_system, &headers, output, timeout_ms, &cli.format).await?;
        }
        Commands::Certificate { url, output } => {
            commands::certificate(&url, output, &cli.format).await?;
        }
        Commands::FairplayPack { init_data, content_id, certificate, output } => {
            commands::fairplay_pack(&init_data, &content_id, &certificate, &output, &cli.format)?;
        }
    }

    Ok(())
}
