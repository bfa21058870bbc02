use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, trace};

use taskexec::config::RuntimeConfig;
use taskexec::identity::{fixed_length_unique_id, ID_MAX_LENGTH};
use taskexec::logging::init_logging;
use taskexec::state::{MigrationRegistry, PluginStateStore};

/// Operator tooling for the task execution runtime
#[derive(Parser)]
#[command(name = "taskexec")]
#[command(about = "Inspect task execution names and persisted plugin state", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated execution name for an attempt
    DeriveName {
        /// Owner (workflow execution) name
        #[arg(long)]
        owner: String,

        /// Node id within the workflow
        #[arg(long)]
        node: String,

        /// Retry attempt
        #[arg(long, default_value = "0")]
        attempt: u32,

        /// Maximum name length (defaults to the configured value)
        #[arg(long)]
        max_length: Option<usize>,
    },
    /// Decode a persisted plugin state blob
    DecodeState {
        /// Codec version the blob was persisted with
        #[arg(long)]
        version: u32,

        /// File holding the raw state bytes
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    };

    init_logging(&config, cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::DeriveName {
            owner,
            node,
            attempt,
            max_length,
        } => derive_name(&config, &owner, &node, attempt, max_length),
        Commands::DecodeState { version, file } => decode_state(&config, version, file).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path)
            .await
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => {
            let mut config = RuntimeConfig::default();
            config.merge_env_vars();
            config.validate()?;
            Ok(config)
        }
    }
}

fn derive_name(
    config: &RuntimeConfig,
    owner: &str,
    node: &str,
    attempt: u32,
    max_length: Option<usize>,
) -> anyhow::Result<()> {
    let max_length = max_length.unwrap_or(config.id_max_length);
    if max_length != ID_MAX_LENGTH {
        debug!("Using non-default maximum length {}", max_length);
    }
    let name = fixed_length_unique_id(max_length, &[owner, node, &attempt.to_string()])?;
    println!("{name}");
    Ok(())
}

async fn decode_state(config: &RuntimeConfig, version: u32, file: PathBuf) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let store = PluginStateStore::new(&config.state, MigrationRegistry::new());
    let handle = store.restore(version, &bytes)?;

    let Some(payload) = handle.read() else {
        println!("empty state");
        return Ok(());
    };

    println!("state version: {}", handle.state_version());
    println!("payload bytes: {}", payload.len());
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", String::from_utf8_lossy(payload)),
    }
    Ok(())
}
