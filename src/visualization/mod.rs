//! Abundance chart generation from the merged table.

pub mod plotter;

pub use plotter::{generate_abundance_plots, Bucket, PlotOptions};
