//! Kraken2 classification report parsing.
//!
//! A report is a headerless tab-separated file with one line per taxon:
//! percent of fragments covering the clade, fragments covering the clade,
//! fragments assigned directly to the taxon, rank code, NCBI taxon ID and
//! scientific name. Reports are produced by the external classifier and are
//! read-only to this pipeline.

use log::warn;
use serde::Deserialize;
use std::path::Path;

/// Rank code marking a species-level line.
pub const SPECIES_RANK: &str = "S";

/// Filename suffix of per-sample classification reports.
pub const REPORT_SUFFIX: &str = "_report.txt";

/// One line of a classification report.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRecord {
    pub perc_frag_cover: String,
    pub nr_frag_cover: String,
    pub nr_frag_direct_at_taxon: u64,
    pub rank_code: String,
    pub ncbi_id: String,
    pub scientific_name: String,
}

impl ReportRecord {
    /// Whether this line is classified at species rank.
    pub fn is_species(&self) -> bool {
        self.rank_code == SPECIES_RANK
    }

    /// Whether the direct-at-taxon read count meets the threshold (inclusive).
    pub fn passes_threshold(&self, min_read_count: u64) -> bool {
        self.nr_frag_direct_at_taxon >= min_read_count
    }

    fn trim_fields(&mut self) {
        self.perc_frag_cover = self.perc_frag_cover.trim().to_string();
        self.nr_frag_cover = self.nr_frag_cover.trim().to_string();
        self.rank_code = self.rank_code.trim().to_string();
        self.ncbi_id = self.ncbi_id.trim().to_string();
        self.scientific_name = self.scientific_name.trim().to_string();
    }
}

/// Reads every well-formed line of a classification report.
///
/// Lines with fewer than six fields or an unparseable read count are skipped
/// with a warning; a truncated report should not abort the whole run. String
/// fields are trimmed (Kraken2 pads the percentage and indents names by rank).
pub fn read_report(path: &Path) -> Result<Vec<ReportRecord>, csv::Error> {
    // Kraken2 reports are plain tab-separated text, never quoted.
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)?;

    let mut records = Vec::new();
    for (line_no, result) in rdr.records().enumerate() {
        let mut raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "Skipping unreadable line {} of '{}': {}",
                    line_no + 1,
                    path.display(),
                    err
                );
                continue;
            }
        };
        if raw.len() < 6 {
            warn!(
                "Skipping malformed line {} of '{}': expected 6 tab-separated fields, found {}",
                line_no + 1,
                path.display(),
                raw.len()
            );
            continue;
        }
        // KrakenUniq-style reports append extra columns; only the first six matter.
        raw.truncate(6);
        match raw.deserialize::<ReportRecord>(None) {
            Ok(mut record) => {
                record.trim_fields();
                records.push(record);
            }
            Err(err) => {
                warn!(
                    "Skipping malformed line {} of '{}': {}",
                    line_no + 1,
                    path.display(),
                    err
                );
            }
        }
    }

    Ok(records)
}

/// Derives the sample identifier from a report filename by stripping the last
/// underscore-delimited token, e.g. `Patient_01_report.txt` -> `Patient_01`.
pub fn sample_id_from_filename(file_name: &str) -> Option<&str> {
    file_name.rsplit_once('_').map(|(sample_id, _)| sample_id)
}
