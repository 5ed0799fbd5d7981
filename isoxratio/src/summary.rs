//! Reduction of an [`AnnotatedScanTable`] to per-label summary statistics
use serde::{Deserialize, Serialize};

use crate::merge::MergedScanTable;
use crate::ratio::{AnnotatedScanTable, DerivedColumns, LabelKind};
use crate::stats;

/// The summary statistics of one ratio or relative abundance of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentSummary {
    /// The fragment the file measured, a folder name or a nominal mass like `119.0`
    pub fragment: String,
    /// The ratio (`13C/Unsub`) or isotopologue (`13C`) summarized
    pub label: String,
    pub kind: LabelKind,
    pub average: f64,
    /// The population standard deviation of the per-scan values
    pub std_dev: f64,
    pub std_error: f64,
    pub rel_std_error: f64,
    /// The relative standard error expected from counting statistics alone
    pub shot_noise_limit: f64,
    pub tic: f64,
    pub tic_variability: f64,
    pub tic_it_mean: f64,
    pub tic_it_variability: f64,
    pub n_scans: usize,
}

/// The relative standard error of a ratio of two Poisson counts
pub fn shot_noise_limit(counts_a: f64, counts_b: f64) -> f64 {
    (1.0 / counts_a + 1.0 / counts_b).sqrt()
}

/// Label a file's fragment by the median observed mass of its unsubstituted isotopologue,
/// rounded to one decimal, or that of its first isotopologue if it has no unsubstituted
/// trace.
pub fn fragment_label(table: &MergedScanTable) -> Option<String> {
    let trace = table
        .traces()
        .find(|(label, _)| label.is_unsubstituted())
        .or_else(|| table.traces().next())
        .map(|(_, trace)| trace)?;
    let masses: Vec<f64> = trace
        .iter()
        .filter(|o| o.is_observed())
        .map(|o| o.mass)
        .collect();
    let median = stats::median(&masses);
    if median.is_nan() {
        None
    } else {
        Some(format!("{median:.1}"))
    }
}

struct ScanDiagnostics {
    tic: f64,
    tic_variability: f64,
    tic_it_mean: f64,
    tic_it_variability: f64,
}

impl ScanDiagnostics {
    fn new(table: &MergedScanTable) -> Self {
        let tic: Vec<f64> = table.scans().iter().map(|s| s.total_ion_current).collect();
        let tic_it: Vec<f64> = table
            .scans()
            .iter()
            .map(|s| s.tic_times_integ_time)
            .collect();
        Self {
            tic: stats::mean(&tic),
            tic_variability: stats::relative_variability(&tic),
            tic_it_mean: stats::mean(&tic_it),
            tic_it_variability: stats::relative_variability(&tic_it),
        }
    }
}

/// Summarize every derived column of `table`.
///
/// When `fragment` is `None` the fragment is labeled by [`fragment_label`].
pub fn aggregate(table: &AnnotatedScanTable, fragment: Option<&str>) -> Vec<FragmentSummary> {
    let fragment = fragment
        .map(|f| f.to_string())
        .or_else(|| fragment_label(&table.merged))
        .unwrap_or_else(|| "N/A".to_string());
    let n_scans = table.len();
    let diagnostics = ScanDiagnostics::new(&table.merged);
    let kind = table.kind();

    let summarize = |label: String, values: &[f64], shot_noise: f64| {
        let average = stats::mean(values);
        let std_dev = stats::population_std_dev(values);
        let std_error = std_dev / (n_scans as f64).sqrt();
        FragmentSummary {
            fragment: fragment.clone(),
            label,
            kind,
            average,
            std_dev,
            std_error,
            rel_std_error: std_error / average,
            shot_noise_limit: shot_noise,
            tic: diagnostics.tic,
            tic_variability: diagnostics.tic_variability,
            tic_it_mean: diagnostics.tic_it_mean,
            tic_it_variability: diagnostics.tic_it_variability,
            n_scans,
        }
    };

    let merged = &table.merged;
    match &table.derived {
        DerivedColumns::Ratios(columns) => columns
            .iter()
            .map(|col| {
                let a = merged
                    .total_counts(col.numerator.as_str())
                    .unwrap_or_default();
                let b = merged
                    .total_counts(col.denominator.as_str())
                    .unwrap_or_default();
                summarize(col.label(), &col.values, shot_noise_limit(a, b))
            })
            .collect(),
        DerivedColumns::RelativeAbundance {
            total_counts,
            fractions,
        } => {
            let b = stats::sum(total_counts);
            fractions
                .iter()
                .map(|col| {
                    let a = merged
                        .total_counts(col.isotopologue.as_str())
                        .unwrap_or_default();
                    summarize(
                        col.isotopologue.to_string(),
                        &col.values,
                        shot_noise_limit(a, b),
                    )
                })
                .collect()
        }
    }
}
