//! Wrappers around the external collaborators: Trimmomatic (read trimming),
//! Bowtie2 (host-genome depletion) and Kraken2 (taxonomic classification).
//!
//! Each tool gets a pure command builder that also names the files the tool
//! will produce, and a runner that executes the command through `sh -c`.
//! Builders are separate from execution so tests can assert the exact
//! invocation without the tools installed.

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::report::REPORT_SUFFIX;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to execute command '{0}': {1}")]
    CommandExecutionFailed(String, String),

    #[error("Command '{0}' exited with status code {1}")]
    CommandFailed(String, i32),

    #[error("Required tool '{0}' is not available on PATH")]
    DependencyMissing(&'static str),
}

/// A set of read files flowing between pipeline stages. `reverse` is absent
/// for single-end samples; every stage then runs in single-end mode.
#[derive(Debug, Clone)]
pub struct ReadPair {
    pub forward: PathBuf,
    pub reverse: Option<PathBuf>,
}

/// Quality settings passed verbatim to Trimmomatic.
const TRIM_SETTINGS: &str = "SLIDINGWINDOW:4:20 MINLEN:50";

/// Builds the Trimmomatic invocation and the trimmed outputs it produces.
pub fn trimmomatic_command(
    reads: &ReadPair,
    base_name: &str,
    output_dir: &Path,
    threads: usize,
) -> (String, ReadPair) {
    match &reads.reverse {
        Some(reverse) => {
            let fwd_paired = output_dir.join(format!("{base_name}_trimmed_R1.fastq.gz"));
            let fwd_unpaired = output_dir.join(format!("{base_name}_unpaired_R1.fastq.gz"));
            let rev_paired = output_dir.join(format!("{base_name}_trimmed_R2.fastq.gz"));
            let rev_unpaired = output_dir.join(format!("{base_name}_unpaired_R2.fastq.gz"));
            let cmd = format!(
                "trimmomatic PE -threads {} -phred33 '{}' '{}' '{}' '{}' '{}' '{}' {}",
                threads,
                reads.forward.display(),
                reverse.display(),
                fwd_paired.display(),
                fwd_unpaired.display(),
                rev_paired.display(),
                rev_unpaired.display(),
                TRIM_SETTINGS,
            );
            (
                cmd,
                ReadPair {
                    forward: fwd_paired,
                    reverse: Some(rev_paired),
                },
            )
        }
        None => {
            let trimmed = output_dir.join(format!("{base_name}_trimmed.fastq.gz"));
            let cmd = format!(
                "trimmomatic SE -threads {} -phred33 '{}' '{}' {}",
                threads,
                reads.forward.display(),
                trimmed.display(),
                TRIM_SETTINGS,
            );
            (
                cmd,
                ReadPair {
                    forward: trimmed,
                    reverse: None,
                },
            )
        }
    }
}

/// Builds the Bowtie2 invocation and the unmapped-read outputs it produces.
/// Alignments are discarded; only reads that fail to map against the host
/// index survive into the next stage.
pub fn bowtie2_command(
    reads: &ReadPair,
    base_name: &str,
    index: &Path,
    output_dir: &Path,
    threads: usize,
) -> (String, ReadPair) {
    match &reads.reverse {
        Some(reverse) => {
            // Bowtie2 expands the `%` in --un-conc-gz to the mate number.
            let template = output_dir.join(format!("{base_name}_unmapped_R%.fastq.gz"));
            let cmd = format!(
                "bowtie2 -x '{}' -1 '{}' -2 '{}' -p {} --un-conc-gz '{}' -S /dev/null",
                index.display(),
                reads.forward.display(),
                reverse.display(),
                threads,
                template.display(),
            );
            (
                cmd,
                ReadPair {
                    forward: output_dir.join(format!("{base_name}_unmapped_R1.fastq.gz")),
                    reverse: Some(output_dir.join(format!("{base_name}_unmapped_R2.fastq.gz"))),
                },
            )
        }
        None => {
            let unmapped = output_dir.join(format!("{base_name}_unmapped.fastq.gz"));
            let cmd = format!(
                "bowtie2 -x '{}' -U '{}' -p {} --un-gz '{}' -S /dev/null",
                index.display(),
                reads.forward.display(),
                threads,
                unmapped.display(),
            );
            (
                cmd,
                ReadPair {
                    forward: unmapped,
                    reverse: None,
                },
            )
        }
    }
}

/// Builds the Kraken2 invocation and the report path it produces. The report
/// lands at `<output_dir>/<base_name>_report.txt`, the same location the
/// precomputed-report mode expects.
pub fn kraken2_command(
    reads: &ReadPair,
    base_name: &str,
    kraken_db: &Path,
    output_dir: &Path,
    threads: usize,
) -> (String, PathBuf) {
    let report = output_dir.join(format!("{base_name}{REPORT_SUFFIX}"));
    let classifications = output_dir.join(format!("{base_name}_kraken_output.txt"));
    let cmd = match &reads.reverse {
        Some(reverse) => format!(
            "kraken2 --db '{}' --threads {} --paired '{}' '{}' --report '{}' --output '{}'",
            kraken_db.display(),
            threads,
            reads.forward.display(),
            reverse.display(),
            report.display(),
            classifications.display(),
        ),
        None => format!(
            "kraken2 --db '{}' --threads {} '{}' --report '{}' --output '{}'",
            kraken_db.display(),
            threads,
            reads.forward.display(),
            report.display(),
            classifications.display(),
        ),
    };
    (cmd, report)
}

pub fn run_trimmomatic(
    reads: &ReadPair,
    base_name: &str,
    output_dir: &Path,
    threads: usize,
) -> Result<ReadPair, ToolError> {
    info!("Trimming reads for sample '{}'", base_name);
    let (cmd, outputs) = trimmomatic_command(reads, base_name, output_dir, threads);
    run_command(&cmd)?;
    Ok(outputs)
}

pub fn run_bowtie2(
    reads: &ReadPair,
    base_name: &str,
    index: &Path,
    output_dir: &Path,
    threads: usize,
) -> Result<ReadPair, ToolError> {
    info!("Depleting host reads for sample '{}'", base_name);
    let (cmd, outputs) = bowtie2_command(reads, base_name, index, output_dir, threads);
    run_command(&cmd)?;
    Ok(outputs)
}

pub fn run_kraken2(
    reads: &ReadPair,
    base_name: &str,
    kraken_db: &Path,
    output_dir: &Path,
    threads: usize,
) -> Result<PathBuf, ToolError> {
    info!("Classifying reads for sample '{}'", base_name);
    let (cmd, report) = kraken2_command(reads, base_name, kraken_db, output_dir, threads);
    run_command(&cmd)?;
    Ok(report)
}

/// Verifies the external tools answer a version probe before any sample runs.
/// Bowtie2 is only probed when depletion will actually be invoked.
pub fn check_dependencies(with_depletion: bool) -> Result<(), ToolError> {
    check_tool("trimmomatic", "trimmomatic -version")?;
    if with_depletion {
        check_tool("bowtie2", "bowtie2 --version")?;
    }
    check_tool("kraken2", "kraken2 --version")?;
    Ok(())
}

fn check_tool(name: &'static str, command: &str) -> Result<(), ToolError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| ToolError::CommandExecutionFailed(command.to_string(), e.to_string()))?;
    if !output.status.success() {
        return Err(ToolError::DependencyMissing(name));
    }
    Ok(())
}

fn run_command(cmd: &str) -> Result<(), ToolError> {
    debug!("Running command: {}", cmd);

    let status = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .map_err(|e| ToolError::CommandExecutionFailed(cmd.to_string(), e.to_string()))?;

    if !status.success() {
        return Err(ToolError::CommandFailed(cmd.to_string(), status.code().unwrap_or(-1)));
    }

    Ok(())
}
