//! HourDB CLI - inspect and maintain a dataset directory

mod commands;

use clap::Parser;
use commands::Command;
use hourdb_core::{Store, StoreConfig};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hourdb", version, about = "Inspect and maintain HourDB datasets")]
struct Cli {
    /// Dataset directory
    directory: PathBuf,

    /// Store configuration (JSON)
    #[arg(long, global = true, env = "HOURDB_CONFIG")]
    config: Option<PathBuf>,

    /// Shard count, overriding the configuration
    #[arg(long, global = true)]
    shards: Option<u32>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    if cli.shards.is_some() {
        config.shard_count = cli.shards;
    }
    config.writeable = cli.command.needs_write();

    debug!("Opening {:?} with {:?}", cli.directory, config);
    let store = Store::open(&cli.directory, config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(&store, cli.command, &mut out)?;

    store.close()?;
    Ok(())
}
