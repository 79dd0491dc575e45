//! atlas-worker: ingestion worker for the model registry.
//!
//! ```text
//! consume   stream → consumer → Postgres (runs until Ctrl-C)
//! ingest    JSON file → pipeline (or → stream with --via-stream)
//! dump      Postgres → registry/latest.json
//! history   print and verify one model's change trail
//! ```

mod cli;
mod commands;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    atlas_observability::init_with(cli.log_format);

    match cli.command {
        Command::Consume(connect) => commands::consume(connect).await,
        Command::Ingest {
            connect,
            provider,
            file,
            via_stream,
        } => commands::ingest(connect, provider, file, via_stream).await,
        Command::Dump { connect, out } => commands::dump(connect, out).await,
        Command::History { connect, key } => commands::history(connect, key).await,
    }
}
