//! Sample metadata handling.
//!
//! The metadata table is a CSV file whose first column holds the sample
//! identifier; the remaining columns are arbitrary per-sample attributes that
//! get appended to every merged record for that sample.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

/// Metadata for a collection of samples, keyed by the first CSV column.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// All column names, join key first, in file order.
    columns: Vec<String>,
    /// Maps sample IDs to their attribute values, aligned with `columns[1..]`.
    rows: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// Name of the join-key column (the first column of the file).
    pub fn sample_id_column(&self) -> &str {
        &self.columns[0]
    }

    /// Attribute column names, in file order, excluding the join key.
    pub fn attribute_columns(&self) -> &[String] {
        &self.columns[1..]
    }

    /// Attribute values for a sample, aligned with `attribute_columns`.
    pub fn attributes(&self, sample_id: &str) -> Option<&[String]> {
        self.rows.get(sample_id).map(Vec::as_slice)
    }

    /// Returns the number of samples in the metadata.
    pub fn sample_count(&self) -> usize {
        self.rows.len()
    }
}

/// Loads metadata from a CSV file.
///
/// The first column is treated as the unique sample identifier. Rows with an
/// empty identifier are skipped; a duplicate identifier keeps the first row
/// seen. A file with a header but no usable rows is an error.
pub fn load_metadata(path: &Path) -> Result<Metadata> {
    let mut rdr = csv::Reader::from_path(path)?;

    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        return Err(anyhow::anyhow!(
            "Metadata file '{}' has no columns",
            path.display()
        ));
    }
    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    let mut rows: HashMap<String, Vec<String>> = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let sample_id = record
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("Missing sample ID in metadata row"))?
            .trim()
            .to_string();

        if sample_id.is_empty() {
            log::warn!("Skipping metadata row with empty sample ID.");
            continue;
        }

        let attributes: Vec<String> = record
            .iter()
            .skip(1)
            .map(|field| field.trim().to_string())
            .collect();

        if rows.contains_key(&sample_id) {
            log::warn!(
                "Duplicate metadata entry for sample '{}'; keeping the first row.",
                sample_id
            );
            continue;
        }
        rows.insert(sample_id, attributes);
    }

    if rows.is_empty() {
        return Err(anyhow::anyhow!(
            "No valid sample entries found in metadata file '{}'",
            path.display()
        ));
    }

    Ok(Metadata { columns, rows })
}
