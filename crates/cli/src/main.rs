//! lazydb command line entry point.
//!
//! Results are written to stdout. Logging goes to stderr as JSON, filtered
//! by `RUST_LOG`.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lazydb_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod seed;

#[derive(Parser, Debug)]
#[command(name = "lazydb")]
#[command(version, about = "Stream, paginate and cache queries over a SQLite user table", long_about = None)]
struct Cli {
    /// SQLite database path (overrides LAZYDB_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(db_path = %config.db_path.display(), command = ?cli.command, "starting lazydb");

    let mut out = std::io::stdout().lock();
    commands::run(cli.command, &config, &mut out).await
}
