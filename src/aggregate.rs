//! Aggregation of per-sample classification reports into one merged table.
//!
//! Every `*_report.txt` file in the output directory is parsed, filtered to
//! species-rank lines meeting the read-count threshold, joined against the
//! sample metadata and written as a single tab-separated table consumed by the
//! plot generator.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::metadata::{self, Metadata};
use crate::report::{self, ReportRecord, REPORT_SUFFIX};

/// Fixed name of the merged table inside the output directory.
pub const MERGED_FILE_NAME: &str = "merged_kraken1.tsv";

/// Report-derived and sample columns, in output order. Metadata attribute
/// columns follow these in the written header.
const FIXED_COLUMNS: [&str; 7] = [
    "Perc_frag_cover",
    "Nr_frag_cover",
    "Nr_frag_direct_at_taxon",
    "Rank_code",
    "NCBI_ID",
    "Scientific_name",
    "SampleID",
];

/// One merged row: a qualifying report line plus the sample's metadata.
#[derive(Debug, Clone)]
struct MergedRecord {
    report: ReportRecord,
    sample_id: String,
    attributes: Vec<String>,
}

/// Aggregates all classification reports in `report_dir` into a merged table.
///
/// Reports are visited in lexicographic filename order so repeated runs over
/// unchanged inputs produce byte-identical output. A sample without a metadata
/// row is dropped. The merge key is sample ID + taxon ID; a duplicate key
/// overwrites the earlier record in place (last write wins, logged).
///
/// Returns the path of the written table.
pub fn aggregate_reports(
    report_dir: &Path,
    metadata_file: &Path,
    min_read_count: u64,
) -> Result<PathBuf> {
    let metadata = metadata::load_metadata(metadata_file)
        .with_context(|| format!("Failed to load metadata from '{}'", metadata_file.display()))?;
    info!(
        "Loaded metadata for {} sample(s), joining on column '{}'",
        metadata.sample_count(),
        metadata.sample_id_column()
    );

    let mut report_files: Vec<PathBuf> = fs::read_dir(report_dir)
        .with_context(|| format!("Failed to read report directory '{}'", report_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map_or(false, |name| name.to_string_lossy().ends_with(REPORT_SUFFIX))
        })
        .collect();
    report_files.sort();

    let mut merged: IndexMap<String, MergedRecord> = IndexMap::new();
    for path in &report_files {
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        let Some(sample_id) = report::sample_id_from_filename(&file_name) else {
            continue;
        };
        let Some(attributes) = metadata.attributes(sample_id) else {
            debug!("No metadata entry for sample '{}'; skipping '{}'", sample_id, file_name);
            continue;
        };
        let attributes = attributes.to_vec();

        let records = report::read_report(path)
            .with_context(|| format!("Failed to read report '{}'", path.display()))?;
        for record in records {
            if !record.is_species() || !record.passes_threshold(min_read_count) {
                continue;
            }
            let key = format!("{}{}", sample_id, record.ncbi_id);
            let replaced = merged.insert(
                key,
                MergedRecord {
                    report: record,
                    sample_id: sample_id.to_string(),
                    attributes: attributes.clone(),
                },
            );
            if let Some(old) = replaced {
                warn!(
                    "Duplicate entry for sample '{}' taxon '{}'; keeping the later record",
                    old.sample_id, old.report.ncbi_id
                );
            }
        }
    }

    let merged_path = report_dir.join(MERGED_FILE_NAME);
    write_merged_table(&merged_path, &metadata, &merged)
        .with_context(|| format!("Failed to write merged table '{}'", merged_path.display()))?;

    info!(
        "Aggregated {} records from {} report file(s) into '{}'",
        merged.len(),
        report_files.len(),
        merged_path.display()
    );

    Ok(merged_path)
}

fn write_merged_table(
    path: &Path,
    metadata: &Metadata,
    merged: &IndexMap<String, MergedRecord>,
) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let header = FIXED_COLUMNS
        .iter()
        .map(|col| col.to_string())
        .chain(metadata.attribute_columns().iter().cloned());
    wtr.write_record(header)?;

    for record in merged.values() {
        let row = [
            record.report.perc_frag_cover.clone(),
            record.report.nr_frag_cover.clone(),
            record.report.nr_frag_direct_at_taxon.to_string(),
            record.report.rank_code.clone(),
            record.report.ncbi_id.clone(),
            record.report.scientific_name.clone(),
            record.sample_id.clone(),
        ];
        wtr.write_record(row.into_iter().chain(record.attributes.iter().cloned()))?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &Path, content: &str) {
        let mut file = File::create(path).unwrap();
        write!(file, "{}", content).unwrap();
    }

    fn metadata_file(dir: &Path) -> PathBuf {
        let path = dir.join("metadata.csv");
        write_file(
            &path,
            "SampleID,Condition,Batch\nS1,Control,B1\nS2,Treatment,B2\n",
        );
        path
    }

    #[test]
    fn test_single_qualifying_line() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S1_report.txt"),
            " 1.00\t10\t10\tS\t562\tEscherichia coli\n",
        );

        let merged = aggregate_reports(dir.path(), &meta, 5).unwrap();
        let content = fs::read_to_string(&merged).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Perc_frag_cover\tNr_frag_cover\tNr_frag_direct_at_taxon\tRank_code\tNCBI_ID\tScientific_name\tSampleID\tCondition\tBatch"
        );
        assert_eq!(lines[1], "1.00\t10\t10\tS\t562\tEscherichia coli\tS1\tControl\tB1");
    }

    #[test]
    fn test_rank_and_threshold_filters() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S1_report.txt"),
            concat!(
                " 1.00\t10\t100\tG\t561\tEscherichia\n",
                " 1.00\t10\t5\tS\t562\tEscherichia coli\n",
                " 1.00\t10\t4\tS\t563\tShigella sp.\n",
            ),
        );

        let merged = aggregate_reports(dir.path(), &meta, 5).unwrap();
        let content = fs::read_to_string(&merged).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        // Genus line excluded regardless of count; threshold boundary inclusive.
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("Escherichia coli"));
    }

    #[test]
    fn test_sample_without_metadata_dropped() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S9_report.txt"),
            " 1.00\t10\t50\tS\t562\tEscherichia coli\n",
        );

        let merged = aggregate_reports(dir.path(), &meta, 0).unwrap();
        let content = fs::read_to_string(&merged).unwrap();

        assert_eq!(content.lines().count(), 1); // header only
    }

    #[test]
    fn test_duplicate_key_last_write_wins() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S1_report.txt"),
            concat!(
                " 1.00\t10\t10\tS\t562\tEscherichia coli\n",
                " 2.00\t20\t20\tS\t562\tEscherichia coli\n",
            ),
        );

        let merged = aggregate_reports(dir.path(), &meta, 0).unwrap();
        let content = fs::read_to_string(&merged).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2.00\t20\t20"));
    }

    #[test]
    fn test_multiple_samples_in_filename_order() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S2_report.txt"),
            " 1.00\t10\t10\tS\t10239\tSome virus\n",
        );
        write_file(
            &dir.path().join("S1_report.txt"),
            " 1.00\t10\t10\tS\t562\tEscherichia coli\n",
        );

        let merged = aggregate_reports(dir.path(), &meta, 0).unwrap();
        let content = fs::read_to_string(&merged).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("S1\tControl\tB1"));
        assert!(lines[2].ends_with("S2\tTreatment\tB2"));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let dir = tempdir().unwrap();
        let meta = metadata_file(dir.path());
        write_file(
            &dir.path().join("S1_report.txt"),
            " 1.00\t10\t10\tS\t562\tEscherichia coli\n",
        );

        let first = fs::read(aggregate_reports(dir.path(), &meta, 0).unwrap()).unwrap();
        let second = fs::read(aggregate_reports(dir.path(), &meta, 0).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
