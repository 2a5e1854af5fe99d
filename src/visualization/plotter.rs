//! Grouped bar charts of taxon abundance.
//!
//! The merged table is split into two buckets by scientific name — rows
//! matching the virus pattern and rows that do not — and, for every
//! categorical metadata column, the mean direct-at-taxon read count is plotted
//! per (taxon, column value) group. One PNG per (bucket, column) pair.

use indexmap::IndexMap;
use itertools::Itertools;
use log::{info, warn};
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::style::FontTransform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column holding the taxon name in the merged table.
const NAME_COLUMN: &str = "Scientific_name";

/// Column holding the read-count measure that gets averaged.
const MEASURE_COLUMN: &str = "Nr_frag_direct_at_taxon";

/// Host rows are dropped before bucketing.
const HOST_NAME: &str = "Homo sapiens";

/// Case-insensitive substring marking a virus name.
const VIRUS_PATTERN: &str = "virus";

#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Merged table is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Plot error: {0}")]
    PlotError(String),
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for VisualizationError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        VisualizationError::PlotError(err.to_string())
    }
}

/// Taxonomic bucket used to partition charts. The split is a name heuristic,
/// not a rank filter: everything not matching the virus pattern lands in the
/// bacterial bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Viral,
    Bacterial,
}

impl Bucket {
    pub fn label(&self) -> &'static str {
        match self {
            Bucket::Viral => "Viral",
            Bucket::Bacterial => "Bacterial",
        }
    }

    fn matches(&self, scientific_name: &str) -> bool {
        let is_virus = scientific_name.to_lowercase().contains(VIRUS_PATTERN);
        match self {
            Bucket::Viral => is_virus,
            Bucket::Bacterial => !is_virus,
        }
    }
}

/// Chart generation settings.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    /// Keep only the N most frequent taxon names per bucket.
    pub top_n: Option<usize>,
    /// Seed for the per-taxon palette; unseeded colors differ between runs.
    pub color_seed: Option<u64>,
    /// Directory the PNG files are written to.
    pub output_dir: PathBuf,
}

/// The merged table held as strings, with normalized column names and
/// whitespace-trimmed cells.
#[derive(Debug, Clone)]
pub struct AbundanceTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AbundanceTable {
    pub fn load(path: &Path) -> Result<Self, VisualizationError> {
        let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let columns: Vec<String> = rdr.headers()?.iter().map(normalize_column_name).collect();

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }

        Ok(AbundanceTable { columns, rows })
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// A column is numeric when every non-empty cell parses as a number;
    /// numeric columns are never used as chart categories.
    fn is_numeric_column(&self, index: usize) -> bool {
        self.rows.iter().all(|row| {
            let cell = &row[index];
            cell.is_empty() || cell.parse::<f64>().is_ok()
        })
    }

    fn categorical_columns(&self, exclude: usize) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&index| index != exclude && !self.is_numeric_column(index))
            .collect()
    }
}

fn normalize_column_name(name: &str) -> String {
    name.replace('/', "_").replace(' ', "_")
}

/// Renders every (bucket, categorical column) chart for the merged table and
/// returns the written image paths.
pub fn generate_abundance_plots(
    merged_path: &Path,
    buckets: &[Bucket],
    options: &PlotOptions,
) -> Result<Vec<PathBuf>, VisualizationError> {
    let table = AbundanceTable::load(merged_path)?;
    let name_idx = table
        .column_index(NAME_COLUMN)
        .ok_or(VisualizationError::MissingColumn(NAME_COLUMN))?;
    let measure_idx = table
        .column_index(MEASURE_COLUMN)
        .ok_or(VisualizationError::MissingColumn(MEASURE_COLUMN))?;
    let categorical = table.categorical_columns(name_idx);

    let mut written = Vec::new();
    for bucket in buckets {
        let mut rows = bucket_rows(&table, *bucket, name_idx);
        if let Some(n) = options.top_n {
            rows = top_n_rows(&table, &rows, name_idx, n);
        }
        if rows.is_empty() {
            warn!("No records in the {} bucket; skipping its charts", bucket.label());
            continue;
        }

        let names: Vec<String> = rows
            .iter()
            .map(|&row| table.rows[row][name_idx].clone())
            .unique()
            .collect();
        let colors = color_palette(&names, options.color_seed);

        for &col_idx in &categorical {
            let grouped = group_means(&table, &rows, name_idx, col_idx, measure_idx);
            let path = render_grouped_bar(
                &grouped,
                &names,
                &colors,
                bucket.label(),
                &table.columns[col_idx],
                &options.output_dir,
            )?;
            info!("Figure saved as {}", path.display());
            written.push(path);
        }
    }

    Ok(written)
}

/// Row indices belonging to a bucket, host rows excluded.
fn bucket_rows(table: &AbundanceTable, bucket: Bucket, name_idx: usize) -> Vec<usize> {
    table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            let name = row[name_idx].as_str();
            name != HOST_NAME && bucket.matches(name)
        })
        .map(|(index, _)| index)
        .collect()
}

/// Restricts rows to the `n` most frequent taxon names by row count. Ties
/// keep first-encounter order; rows outside the top N are dropped entirely.
fn top_n_rows(table: &AbundanceTable, rows: &[usize], name_idx: usize, n: usize) -> Vec<usize> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for &row in rows {
        *counts.entry(table.rows[row][name_idx].as_str()).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let keep: HashSet<&str> = ranked.into_iter().take(n).map(|(name, _)| name).collect();

    rows.iter()
        .copied()
        .filter(|&row| keep.contains(table.rows[row][name_idx].as_str()))
        .collect()
}

/// One bar of a grouped chart: mean measure for a (taxon, category) pair.
#[derive(Debug, Clone, PartialEq)]
struct GroupedMean {
    name: String,
    category: String,
    mean: f64,
}

fn group_means(
    table: &AbundanceTable,
    rows: &[usize],
    name_idx: usize,
    col_idx: usize,
    measure_idx: usize,
) -> Vec<GroupedMean> {
    let mut groups: IndexMap<(String, String), (f64, u64)> = IndexMap::new();
    for &row in rows {
        let cells = &table.rows[row];
        let Ok(measure) = cells[measure_idx].parse::<f64>() else {
            warn!(
                "Unparseable {} value '{}'; skipping row",
                MEASURE_COLUMN, cells[measure_idx]
            );
            continue;
        };
        let entry = groups
            .entry((cells[name_idx].clone(), cells[col_idx].clone()))
            .or_insert((0.0, 0));
        entry.0 += measure;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((name, category), (sum, count))| GroupedMean {
            name,
            category,
            mean: sum / count as f64,
        })
        .collect()
}

/// One random color per taxon name. With a seed the palette is deterministic;
/// without one it differs between runs.
fn color_palette(names: &[String], seed: Option<u64>) -> HashMap<String, RGBColor> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    names
        .iter()
        .map(|name| {
            (
                name.clone(),
                RGBColor(
                    rng.random_range(0..=255),
                    rng.random_range(0..=255),
                    rng.random_range(0..=255),
                ),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChartSize {
    width: u32,
    height: u32,
    font_size: i32,
}

/// Canvas grows and fonts shrink with the number of x-axis categories.
fn chart_size(category_count: usize) -> ChartSize {
    let n = category_count as u32;
    ChartSize {
        width: 1100 + 5 * n,
        height: 800 + 5 * n,
        font_size: (14 - category_count as i32 / 10).max(10),
    }
}

fn render_grouped_bar(
    grouped: &[GroupedMean],
    names: &[String],
    colors: &HashMap<String, RGBColor>,
    bucket_label: &str,
    column: &str,
    output_dir: &Path,
) -> Result<PathBuf, VisualizationError> {
    let output_file = output_dir.join(format!("{bucket_label}_Abundance_by_{column}.png"));

    let categories: Vec<String> = grouped.iter().map(|g| g.category.clone()).unique().collect();
    let category_index: HashMap<&str, usize> = categories
        .iter()
        .enumerate()
        .map(|(index, category)| (category.as_str(), index))
        .collect();
    let size = chart_size(categories.len());

    let max_mean = grouped.iter().map(|g| g.mean).fold(0.0, f64::max);
    let y_max = if max_mean > 0.0 { max_mean * 1.1 } else { 1.0 };

    let root = BitMapBackend::new(&output_file, (size.width, size.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Average {} Abundance by {}", bucket_label, column),
            ("sans-serif", 16),
        )
        .margin(10)
        .x_label_area_size(160)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5..categories.len() as f64 - 0.5, 0.0..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .label_style(("sans-serif", size.font_size))
        .x_labels(categories.len())
        .x_label_formatter(&|x| {
            let nearest = x.round();
            if (x - nearest).abs() > 0.01 || nearest < 0.0 {
                return String::new();
            }
            categories.get(nearest as usize).cloned().unwrap_or_default()
        })
        .x_label_style(
            ("sans-serif", size.font_size)
                .into_font()
                .transform(FontTransform::Rotate90),
        )
        .y_desc(MEASURE_COLUMN)
        .draw()?;

    // Group i is centered on x = i; its bars share the surrounding 0.8 units.
    let bar_width = 0.8 / names.len() as f64;
    for (slot, name) in names.iter().enumerate() {
        let color = colors.get(name).copied().unwrap_or(BLACK);
        let bars: Vec<Rectangle<(f64, f64)>> = grouped
            .iter()
            .filter(|g| &g.name == name)
            .filter_map(|g| {
                let group = *category_index.get(g.category.as_str())?;
                let x0 = group as f64 - 0.4 + slot as f64 * bar_width;
                Some(Rectangle::new(
                    [(x0, 0.0), (x0 + bar_width, g.mean)],
                    color.mix(0.8).filled(),
                ))
            })
            .collect();

        chart
            .draw_series(bars)?
            .label(name.clone())
            .legend(move |(x, y)| {
                Rectangle::new([(x, y - 4), (x + 12, y + 4)], color.filled())
            });
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", size.font_size))
        .draw()?;

    drop(chart);
    root.present()?;
    drop(root);

    Ok(output_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn table_from(content: &str) -> AbundanceTable {
        let dir = tempdir().unwrap();
        let path = dir.path().join("merged.tsv");
        let mut file = File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        AbundanceTable::load(&path).unwrap()
    }

    fn sample_table() -> AbundanceTable {
        table_from(concat!(
            "Nr_frag_direct_at_taxon\tScientific_name\tSampleID\tCondition\n",
            "10\tInfluenza A virus\tS1\tControl\n",
            "20\tInfluenza A virus\tS2\tTreatment\n",
            "30\tEscherichia coli\tS1\tControl\n",
            "40\tHomo sapiens\tS1\tControl\n",
        ))
    }

    #[test]
    fn test_load_normalizes_headers_and_trims_cells() {
        let table = table_from("Scientific name\tBody/Site\n  Influenza A virus \t gut \n");
        assert_eq!(table.columns, vec!["Scientific_name", "Body_Site"]);
        assert_eq!(table.rows[0], vec!["Influenza A virus", "gut"]);
    }

    #[test]
    fn test_numeric_columns_are_not_categorical() {
        let table = sample_table();
        let name_idx = table.column_index(NAME_COLUMN).unwrap();
        let categorical = table.categorical_columns(name_idx);
        // SampleID and Condition survive; the count column is numeric.
        assert_eq!(categorical, vec![2, 3]);
    }

    #[test]
    fn test_bucket_rows_split_and_host_filter() {
        let table = sample_table();
        let name_idx = table.column_index(NAME_COLUMN).unwrap();

        let viral = bucket_rows(&table, Bucket::Viral, name_idx);
        let bacterial = bucket_rows(&table, Bucket::Bacterial, name_idx);

        assert_eq!(viral, vec![0, 1]);
        // Homo sapiens (row 3) is in neither bucket.
        assert_eq!(bacterial, vec![2]);
    }

    #[test]
    fn test_bucket_match_is_case_insensitive() {
        assert!(Bucket::Viral.matches("Tomato mosaic VIRUS"));
        assert!(!Bucket::Bacterial.matches("Tomato mosaic VIRUS"));
        assert!(Bucket::Bacterial.matches("Escherichia coli"));
    }

    #[test]
    fn test_top_n_keeps_most_frequent_names() {
        let table = table_from(concat!(
            "Nr_frag_direct_at_taxon\tScientific_name\n",
            "1\tA virus\n1\tA virus\n1\tA virus\n1\tA virus\n1\tA virus\n",
            "1\tB virus\n1\tB virus\n1\tB virus\n",
            "1\tC virus\n",
        ));
        let name_idx = table.column_index(NAME_COLUMN).unwrap();
        let rows = bucket_rows(&table, Bucket::Viral, name_idx);

        let kept = top_n_rows(&table, &rows, name_idx, 2);
        let kept_names: Vec<&str> = kept
            .iter()
            .map(|&row| table.rows[row][name_idx].as_str())
            .unique()
            .collect();

        assert_eq!(kept_names, vec!["A virus", "B virus"]);
        assert_eq!(kept.len(), 8);
    }

    #[test]
    fn test_group_means() {
        let table = table_from(concat!(
            "Nr_frag_direct_at_taxon\tScientific_name\tCondition\n",
            "10\tA virus\tControl\n",
            "20\tA virus\tControl\n",
            "40\tA virus\tTreatment\n",
        ));
        let name_idx = table.column_index(NAME_COLUMN).unwrap();
        let measure_idx = table.column_index(MEASURE_COLUMN).unwrap();
        let col_idx = table.column_index("Condition").unwrap();
        let rows: Vec<usize> = (0..table.rows.len()).collect();

        let grouped = group_means(&table, &rows, name_idx, col_idx, measure_idx);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].category, "Control");
        assert_relative_eq!(grouped[0].mean, 15.0);
        assert_relative_eq!(grouped[1].mean, 40.0);
    }

    #[test]
    fn test_color_palette_is_deterministic_with_seed() {
        let names = vec!["A virus".to_string(), "B virus".to_string()];
        let first = color_palette(&names, Some(7));
        let second = color_palette(&names, Some(7));
        assert_eq!(first.len(), 2);
        for name in &names {
            assert_eq!(first[name.as_str()], second[name.as_str()]);
        }
    }

    #[test]
    fn test_chart_size_scales_with_categories() {
        let small = chart_size(2);
        assert_eq!(small.width, 1110);
        assert_eq!(small.height, 810);
        assert_eq!(small.font_size, 14);

        let large = chart_size(60);
        assert_eq!(large.width, 1400);
        assert_eq!(large.height, 1100);
        // Font never drops below 10.
        assert_eq!(large.font_size, 10);
    }
}
