//! Main entry point for the kraken_abundance application.
//!
//! The pipeline runs three preprocessing stages over external tools for each
//! sample — Trimmomatic read trimming, optional Bowtie2 host depletion, and
//! Kraken2 taxonomic classification — then aggregates the per-sample Kraken2
//! reports into a single merged table and renders abundance bar charts.

// Modules defined within the project
mod aggregate;
mod cli;
mod metadata;
mod pipeline;
mod report;
mod visualization;

use anyhow::Result;
use clap::Parser;

use cli::{run_cli, Cli};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    // Parse command line arguments
    let cli = Cli::parse();

    // Run CLI
    run_cli(cli)?;

    Ok(())
}
