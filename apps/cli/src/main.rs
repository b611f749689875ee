//! Strataflow CLI — local, run-scoped ELT pipeline.
//!
//! Ingests tabular source files into layered snapshots (raw →
//! standardized → marts) with incremental change detection and auditable
//! per-run lineage.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
