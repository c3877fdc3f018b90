//! a3s-sentinel - zero-trust decision engine
//!
//! Reads DNS, syscall and HTTP events as JSON Lines and prints one
//! outcome per line.

use a3s_sentinel::{DecisionEngine, Event, Outcome, Sentinel, SentinelConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-sentinel")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Zero-trust decision engine for DNS, syscall and HTTP events")]
struct Cli {
    /// Configuration file path (.json, .yaml)
    #[arg(short, long, env = "SENTINEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide a stream of JSONL events
    Run {
        /// Input file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// JSONL audit file (overrides config)
        #[arg(short, long)]
        audit: Option<PathBuf>,

        /// Events evaluated concurrently
        #[arg(long, default_value = "16")]
        concurrency: usize,
    },

    /// Decide a single DNS lookup
    Check {
        /// Domain to evaluate
        subject: String,

        /// Client address
        #[arg(short, long, default_value = "127.0.0.1")]
        actor: String,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Decisions go to stdout, logs to stderr
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("a3s_sentinel={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => SentinelConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SentinelConfig::default(),
    };

    match cli.command {
        Commands::Run {
            input,
            audit,
            concurrency,
        } => {
            if audit.is_some() {
                config.audit.path = audit;
            }
            run(&config, &input, concurrency).await
        }
        Commands::Check { subject, actor } => {
            let engine = DecisionEngine::from_config(&config).context("Failed to build engine")?;
            let decision = engine.decide(&Event::dns(subject, actor)).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(())
        }
        Commands::Config { default } => {
            let shown = if default {
                SentinelConfig::default()
            } else {
                config
            };
            print!("{}", serde_yaml::to_string(&shown)?);
            Ok(())
        }
    }
}

async fn run(config: &SentinelConfig, input: &str, concurrency: usize) -> Result<()> {
    let sentinel = Sentinel::from_config(config)
        .await
        .context("Failed to start sentinel")?;

    let reader: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .with_context(|| format!("Failed to open input {}", input))?,
        )
    };

    tracing::info!(input, concurrency, "Sentinel started");

    let sentinel_ref = &sentinel;
    let events = LinesStream::new(BufReader::new(reader).lines()).filter_map(move |line| async move {
        match sentinel_ref.accept_line(line) {
            Ok(raw) => raw,
            Err(rejected) => {
                print_outcome(&rejected);
                None
            }
        }
    });

    let stats = sentinel
        .run_with(events, concurrency, |outcome| print_outcome(&outcome))
        .await;
    eprintln!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    match serde_json::to_string(outcome) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!(error = %e, "Failed to encode outcome"),
    }
}
