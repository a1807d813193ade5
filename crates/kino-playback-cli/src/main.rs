//! Kino Playback CLI - Live Window Probe and Session Simulator
//!
//! Features:
//! - Manifest window probing (HLS/DASH)
//! - Live seek/pause capability tables per support tier
//! - Scripted playback sessions over a simulated media element

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::OutputFormat;

/// Kino Playback CLI - Cross-device playback toolkit
#[derive(Parser)]
#[command(name = "kino-playback")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Probe live windows and simulate playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a manifest and report its time window
    Probe {
        /// URL to manifest
        manifest: String,

        /// Window type (static, growing, sliding)
        #[arg(short, long, default_value = "sliding", value_parser = commands::parse_window_type)]
        window_type: kino_playback::WindowType,

        /// Request timeout in milliseconds
        #[arg(short, long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Show which live support tiers can seek or pause in a window
    Window {
        /// Window start, epoch milliseconds
        #[arg(long)]
        start_ms: f64,

        /// Window end, epoch milliseconds
        #[arg(long)]
        end_ms: f64,

        /// Epoch milliseconds to convert to video time
        #[arg(long)]
        at_ms: Option<f64>,
    },

    /// Run a scripted session over a simulated media element
    Simulate {
        /// Source urls, preferred first
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        /// Playback configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Strategy (basic, native); overrides the configuration file
        #[arg(short, long, value_parser = commands::parse_strategy)]
        strategy: Option<kino_playback::StrategyKind>,

        /// Window type (static, growing, sliding)
        #[arg(short, long, default_value = "static", value_parser = commands::parse_window_type)]
        window_type: kino_playback::WindowType,

        /// Live window start, epoch milliseconds
        #[arg(long)]
        window_start_ms: Option<f64>,

        /// Live window end, epoch milliseconds
        #[arg(long)]
        window_end_ms: Option<f64>,

        /// Initial playback time (seconds, or epoch milliseconds when live)
        #[arg(long)]
        start: Option<f64>,

        /// Comma separated steps, e.g. "metadata,playing,+30000,waiting,+30000"
        #[arg(long, default_value = "metadata,playing,timeupdate")]
        script: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    kino_playback::init();

    match cli.command {
        Commands::Probe { manifest, window_type, timeout_ms } => {
            commands::probe(&manifest, window_type, timeout_ms, cli.format).await?;
        }
        Commands::Window { start_ms, end_ms, at_ms } => {
            commands::window(start_ms, end_ms, at_ms, cli.format)?;
        }
        Commands::Simulate {
            urls,
            config,
            strategy,
            window_type,
            window_start_ms,
            window_end_ms,
            start,
            script,
        } => {
            let options = commands::SimulateOptions {
                urls,
                config,
                strategy,
                window_type,
                window: (window_start_ms, window_end_ms),
                start,
                script,
            };
            commands::simulate(options, cli.format)?;
        }
    }

    Ok(())
}
