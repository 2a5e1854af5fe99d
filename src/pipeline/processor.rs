//! Per-sample pipeline orchestration.
//!
//! For each sample the three external stages run in sequence: trimming, then
//! host depletion when an index is configured, then classification. In
//! precomputed-report mode no tool is invoked and the report is expected to
//! already sit at its conventional path. There is no retry; any stage failure
//! is fatal for the run.

use log::{debug, info};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::tools::{self, ReadPair, ToolError};
use crate::report::REPORT_SUFFIX;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Precomputed classification report not found: {0}")]
    MissingReport(PathBuf),
}

/// Pipeline settings shared by every sample in a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub kraken_db: PathBuf,
    /// Host index; `None` disables the depletion stage.
    pub bowtie2_index: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub use_precomputed_reports: bool,
}

/// Runs the preprocessing chain for one sample and returns the path of its
/// classification report.
pub fn process_sample(
    forward: PathBuf,
    reverse: Option<PathBuf>,
    base_name: &str,
    config: &PipelineConfig,
) -> Result<PathBuf, PipelineError> {
    if config.use_precomputed_reports {
        return precomputed_report(base_name, &config.output_dir);
    }

    let reads = ReadPair { forward, reverse };
    let trimmed = tools::run_trimmomatic(&reads, base_name, &config.output_dir, config.threads)?;

    let depleted = match &config.bowtie2_index {
        Some(index) => {
            tools::run_bowtie2(&trimmed, base_name, index, &config.output_dir, config.threads)?
        }
        None => {
            debug!("Host depletion disabled for sample '{}'", base_name);
            trimmed
        }
    };

    let report =
        tools::run_kraken2(&depleted, base_name, &config.kraken_db, &config.output_dir, config.threads)?;
    info!(
        "Sample '{}' classified; report at '{}'",
        base_name,
        report.display()
    );
    Ok(report)
}

fn precomputed_report(base_name: &str, output_dir: &Path) -> Result<PathBuf, PipelineError> {
    let report = output_dir.join(format!("{base_name}{REPORT_SUFFIX}"));
    if !report.is_file() {
        return Err(PipelineError::MissingReport(report));
    }
    debug!("Using precomputed report '{}'", report.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn config(output_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            kraken_db: PathBuf::from("/db/k2"),
            bowtie2_index: None,
            output_dir: output_dir.to_path_buf(),
            threads: 1,
            use_precomputed_reports: true,
        }
    }

    #[test]
    fn test_precomputed_report_found() {
        let dir = tempdir().unwrap();
        let report_path = dir.path().join("S1_report.txt");
        let mut file = File::create(&report_path).unwrap();
        writeln!(file, " 1.00\t10\t10\tS\t562\tEscherichia coli").unwrap();

        let result = process_sample(
            PathBuf::from("/data/S1_R1.fastq.gz"),
            None,
            "S1",
            &config(dir.path()),
        )
        .unwrap();
        assert_eq!(result, report_path);
    }

    #[test]
    fn test_precomputed_report_missing_names_expected_path() {
        let dir = tempdir().unwrap();

        let err = process_sample(
            PathBuf::from("/data/S1_R1.fastq.gz"),
            None,
            "S1",
            &config(dir.path()),
        )
        .unwrap_err();

        match err {
            PipelineError::MissingReport(path) => {
                assert_eq!(path, dir.path().join("S1_report.txt"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
