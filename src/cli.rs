//! Command-line interface and run orchestration.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate;
use crate::pipeline::{self, tools, PipelineConfig};
use crate::visualization::{generate_abundance_plots, Bucket, PlotOptions};

/// Pipeline for Trimmomatic trimming, Bowtie2 host depletion (optional) and
/// Kraken2 taxonomic classification, with report aggregation and abundance
/// plotting.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the Kraken2 database.
    #[arg(long)]
    pub kraken_db: PathBuf,

    /// Path to the Bowtie2 host index (enables host depletion).
    #[arg(long)]
    pub bowtie2_index: Option<PathBuf>,

    /// Directory to save output files.
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Directory containing input FASTQ files.
    #[arg(long)]
    pub input_dir: PathBuf,

    /// Path to the metadata CSV file; the first column is the sample ID.
    #[arg(long)]
    pub metadata_file: PathBuf,

    /// Number of threads passed to Trimmomatic, Bowtie2 and Kraken2.
    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    /// Minimum direct-at-taxon read count for a report line to be kept.
    #[arg(long, default_value_t = 0)]
    pub read_count: u64,

    /// Keep only the N most common taxa per bucket when plotting.
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Skip Bowtie2 host depletion even when an index is given.
    #[arg(long)]
    pub no_bowtie2: bool,

    /// Generate bacterial abundance plots.
    #[arg(long)]
    pub bacteria: bool,

    /// Generate viral abundance plots.
    #[arg(long)]
    pub virus: bool,

    /// Use precomputed Kraken2 reports instead of running the pipeline.
    #[arg(long)]
    pub use_precomputed_reports: bool,

    /// Seed for the chart color palette; colors vary between runs otherwise.
    #[arg(long)]
    pub color_seed: Option<u64>,
}

/// Input files for one sample. `reverse` is absent when no `_R2` sibling
/// exists; the sample then runs single-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFiles {
    pub base_name: String,
    pub forward: PathBuf,
    pub reverse: Option<PathBuf>,
}

const FORWARD_SUFFIXES: [&str; 2] = ["_R1.fastq.gz", "_R1.fastq"];

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!("Failed to create output directory '{}'", cli.output_dir.display())
    })?;

    let bowtie2_index = if cli.no_bowtie2 {
        None
    } else {
        cli.bowtie2_index.clone()
    };

    if !cli.use_precomputed_reports {
        tools::check_dependencies(bowtie2_index.is_some())?;
    }

    let config = PipelineConfig {
        kraken_db: cli.kraken_db.clone(),
        bowtie2_index,
        output_dir: cli.output_dir.clone(),
        threads: cli.threads,
        use_precomputed_reports: cli.use_precomputed_reports,
    };

    let samples = discover_samples(&cli.input_dir)?;
    if samples.is_empty() {
        warn!(
            "No *_R1.fastq[.gz] files found in '{}'",
            cli.input_dir.display()
        );
    }
    for sample in &samples {
        pipeline::process_sample(
            sample.forward.clone(),
            sample.reverse.clone(),
            &sample.base_name,
            &config,
        )
        .with_context(|| format!("Failed to process sample '{}'", sample.base_name))?;
    }

    let merged = aggregate::aggregate_reports(&cli.output_dir, &cli.metadata_file, cli.read_count)?;

    let mut buckets = Vec::new();
    if cli.virus {
        buckets.push(Bucket::Viral);
    }
    if cli.bacteria {
        buckets.push(Bucket::Bacterial);
    }
    if buckets.is_empty() {
        info!("No --virus or --bacteria flag provided; no plots will be generated.");
        return Ok(());
    }

    let options = PlotOptions {
        top_n: cli.top_n,
        color_seed: cli.color_seed,
        output_dir: PathBuf::from("."),
    };
    let written = generate_abundance_plots(&merged, &buckets, &options)?;
    info!("Wrote {} chart(s)", written.len());

    Ok(())
}

/// Finds forward-read files in the input directory and pairs each with its
/// `_R2` sibling when present. Samples come back sorted by name so processing
/// order is stable.
pub fn discover_samples(input_dir: &Path) -> Result<Vec<SampleFiles>> {
    let mut samples = Vec::new();
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory '{}'", input_dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some((base_name, suffix)) = split_forward_name(&file_name) else {
            continue;
        };

        let reverse = input_dir.join(format!("{}{}", base_name, suffix.replace("_R1", "_R2")));
        let reverse = reverse.is_file().then_some(reverse);

        samples.push(SampleFiles {
            base_name: base_name.to_string(),
            forward: path,
            reverse,
        });
    }

    samples.sort_by(|a, b| a.base_name.cmp(&b.base_name));
    Ok(samples)
}

fn split_forward_name(file_name: &str) -> Option<(&str, &str)> {
    FORWARD_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix).map(|base| (base, *suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_split_forward_name() {
        assert_eq!(
            split_forward_name("S1_R1.fastq.gz"),
            Some(("S1", "_R1.fastq.gz"))
        );
        assert_eq!(split_forward_name("S1_R1.fastq"), Some(("S1", "_R1.fastq")));
        assert_eq!(split_forward_name("S1_R2.fastq.gz"), None);
        assert_eq!(split_forward_name("S1.fastq"), None);
    }

    #[test]
    fn test_discover_samples_pairs_and_sorts() {
        let dir = tempdir().unwrap();
        for name in [
            "S2_R1.fastq.gz",
            "S2_R2.fastq.gz",
            "S1_R1.fastq",
            "notes.txt",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let samples = discover_samples(dir.path()).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].base_name, "S1");
        assert_eq!(samples[0].reverse, None);
        assert_eq!(samples[1].base_name, "S2");
        assert_eq!(
            samples[1].reverse,
            Some(dir.path().join("S2_R2.fastq.gz"))
        );
    }
}
