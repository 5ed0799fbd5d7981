//! Per-scan isotope ratios and relative abundances
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IsoXError;
use crate::merge::{retain_by_mask, MergedScanTable};
use crate::record::Isotopologue;

/// The prefix of relative abundance column names, as in `MN Relative Abundance 13C`
pub const RELATIVE_ABUNDANCE: &str = "MN Relative Abundance";
/// The name of the per-scan summed counts column of relative abundance mode
pub const TOTAL_COUNTS: &str = "total Counts";

/// Which quantity is derived from the merged counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AbundanceMode {
    /// Pairwise ratios of isotopologue counts
    Ratio {
        /// Only report pairs involving the most abundant isotopologue
        most_abundant_only: bool,
    },
    /// The fraction of the summed counts of every isotopologue contributed by each one
    RelativeAbundance,
}

impl Default for AbundanceMode {
    fn default() -> Self {
        Self::Ratio {
            most_abundant_only: true,
        }
    }
}

impl AbundanceMode {
    pub fn kind(&self) -> LabelKind {
        match self {
            Self::Ratio { .. } => LabelKind::IsotopeRatio,
            Self::RelativeAbundance => LabelKind::RelativeAbundance,
        }
    }
}

/// What the label of a summary names, a ratio like `13C/Unsub` or an isotopologue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LabelKind {
    IsotopeRatio,
    RelativeAbundance,
}

impl LabelKind {
    /// The column header the label is written under
    pub const fn header(&self) -> &'static str {
        match self {
            LabelKind::IsotopeRatio => "IsotopeRatio",
            LabelKind::RelativeAbundance => RELATIVE_ABUNDANCE,
        }
    }
}

/// Divide, treating a zero denominator as undefined
#[inline]
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        f64::NAN
    } else {
        numerator / denominator
    }
}

/// The per-scan ratio of two isotopologues' counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioColumn {
    pub numerator: Isotopologue,
    pub denominator: Isotopologue,
    pub values: Vec<f64>,
}

impl RatioColumn {
    pub fn label(&self) -> String {
        format!("{}/{}", self.numerator, self.denominator)
    }
}

/// The per-scan share of the total counts held by one isotopologue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceColumn {
    pub isotopologue: Isotopologue,
    pub values: Vec<f64>,
}

impl AbundanceColumn {
    pub fn label(&self) -> String {
        format!("{RELATIVE_ABUNDANCE} {}", self.isotopologue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DerivedColumns {
    Ratios(Vec<RatioColumn>),
    RelativeAbundance {
        total_counts: Vec<f64>,
        fractions: Vec<AbundanceColumn>,
    },
}

impl DerivedColumns {
    pub fn kind(&self) -> LabelKind {
        match self {
            DerivedColumns::Ratios(_) => LabelKind::IsotopeRatio,
            DerivedColumns::RelativeAbundance { .. } => LabelKind::RelativeAbundance,
        }
    }

    fn retain_rows(&mut self, keep: &[bool]) {
        match self {
            DerivedColumns::Ratios(columns) => {
                for col in columns.iter_mut() {
                    retain_by_mask(&mut col.values, keep);
                }
            }
            DerivedColumns::RelativeAbundance {
                total_counts,
                fractions,
            } => {
                retain_by_mask(total_counts, keep);
                for col in fractions.iter_mut() {
                    retain_by_mask(&mut col.values, keep);
                }
            }
        }
    }
}

/// A [`MergedScanTable`] together with the columns derived from it, aligned by row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedScanTable {
    pub merged: MergedScanTable,
    pub derived: DerivedColumns,
}

impl AnnotatedScanTable {
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn kind(&self) -> LabelKind {
        self.derived.kind()
    }

    /// The labels of the derived columns in the order they were derived
    pub fn derived_labels(&self) -> Vec<String> {
        match &self.derived {
            DerivedColumns::Ratios(columns) => columns.iter().map(|c| c.label()).collect(),
            DerivedColumns::RelativeAbundance { fractions, .. } => {
                fractions.iter().map(|c| c.label()).collect()
            }
        }
    }

    /// Look up any derived or merged column by name
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        match &self.derived {
            DerivedColumns::Ratios(columns) => {
                if let Some(col) = columns.iter().find(|c| c.label() == name) {
                    return Some(col.values.clone());
                }
            }
            DerivedColumns::RelativeAbundance {
                total_counts,
                fractions,
            } => {
                if name == TOTAL_COUNTS {
                    return Some(total_counts.clone());
                }
                if let Some(col) = fractions.iter().find(|c| c.label() == name) {
                    return Some(col.values.clone());
                }
            }
        }
        self.merged.column(name)
    }

    /// As [`AnnotatedScanTable::column`], failing with [`IsoXError::UnknownColumn`]
    pub fn column_values(&self, name: &str) -> Result<Vec<f64>, IsoXError> {
        self.column(name)
            .ok_or_else(|| IsoXError::UnknownColumn(name.to_string()))
    }

    /// Keep only the rows whose entry in `keep` is `true`
    pub fn retain_rows(&mut self, keep: &[bool]) {
        self.merged.retain_rows(keep);
        self.derived.retain_rows(keep);
    }
}

/// The isotopologue with the largest summed counts. The first one in canonical
/// order wins ties.
pub fn most_abundant(table: &MergedScanTable) -> Option<&Isotopologue> {
    let mut best: Option<(&Isotopologue, f64)> = None;
    for (label, trace) in table.traces() {
        let total: f64 = trace.iter().map(|o| o.counts).sum();
        match best {
            Some((_, best_total)) if total <= best_total => {}
            _ => best = Some((label, total)),
        }
    }
    best.map(|(label, _)| label)
}

/// Compute the ratio of every retained pair of isotopologues.
///
/// The isotopologue with the smaller summed counts is the numerator, the first of
/// the pair when the sums are equal.
pub fn derive_ratios(table: &MergedScanTable, most_abundant_only: bool) -> Vec<RatioColumn> {
    let major = most_abundant(table).cloned();
    let totals: Vec<(&Isotopologue, f64, &[_])> = table
        .traces()
        .map(|(label, trace)| (label, trace.iter().map(|o| o.counts).sum::<f64>(), trace))
        .collect();

    let mut columns = Vec::new();
    for ((label1, total1, trace1), (label2, total2, trace2)) in
        totals.iter().tuple_combinations()
    {
        let involves_major =
            Some(*label1) == major.as_ref() || Some(*label2) == major.as_ref();
        if most_abundant_only && !involves_major {
            continue;
        }
        let ((numerator, num_trace), (denominator, den_trace)) = if total1 <= total2 {
            ((label1, trace1), (label2, trace2))
        } else {
            ((label2, trace2), (label1, trace1))
        };
        let values = num_trace
            .iter()
            .zip(den_trace.iter())
            .map(|(n, d)| safe_ratio(n.counts, d.counts))
            .collect();
        columns.push(RatioColumn {
            numerator: (*numerator).clone(),
            denominator: (*denominator).clone(),
            values,
        });
    }
    columns
}

/// Compute the summed counts of every scan and each isotopologue's share of it
pub fn derive_relative_abundance(table: &MergedScanTable) -> DerivedColumns {
    let mut total_counts = vec![0.0; table.len()];
    for (_, trace) in table.traces() {
        for (total, obs) in total_counts.iter_mut().zip(trace) {
            *total += obs.counts;
        }
    }
    let fractions = table
        .traces()
        .map(|(label, trace)| AbundanceColumn {
            isotopologue: label.clone(),
            values: trace
                .iter()
                .zip(total_counts.iter())
                .map(|(obs, total)| safe_ratio(obs.counts, *total))
                .collect(),
        })
        .collect();
    DerivedColumns::RelativeAbundance {
        total_counts,
        fractions,
    }
}

/// Annotates a [`MergedScanTable`] with the columns of one [`AbundanceMode`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RatioDeriver {
    pub mode: AbundanceMode,
}

impl RatioDeriver {
    pub fn new(mode: AbundanceMode) -> Self {
        Self { mode }
    }

    pub fn derive(&self, merged: MergedScanTable) -> AnnotatedScanTable {
        let derived = match self.mode {
            AbundanceMode::Ratio { most_abundant_only } => {
                let columns = derive_ratios(&merged, most_abundant_only);
                debug!(
                    "Derived {} ratios: {:?}",
                    columns.len(),
                    columns.iter().map(|c| c.label()).collect::<Vec<_>>()
                );
                DerivedColumns::Ratios(columns)
            }
            AbundanceMode::RelativeAbundance => derive_relative_abundance(&merged),
        };
        AnnotatedScanTable { merged, derived }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::merge::test::make_peak;
    use crate::merge::ScanMerger;

    fn make_table() -> MergedScanTable {
        let mut records = Vec::new();
        for scan in 1..=5 {
            records.push(make_peak("M0", scan, 1000.0 + scan as f64));
            records.push(make_peak("13C", scan, 100.0 * scan as f64));
            if scan != 3 {
                records.push(make_peak("D", scan, 20.0));
            }
        }
        ScanMerger::default().merge(records).unwrap()
    }

    #[test]
    fn test_most_abundant() {
        let table = make_table();
        assert_eq!(most_abundant(&table).map(|l| l.as_str()), Some("Unsub"));
    }

    #[test]
    fn test_most_abundant_tie() {
        let table = ScanMerger::default()
            .merge(vec![make_peak("M0", 1, 50.0), make_peak("13C", 1, 50.0)])
            .unwrap();
        assert_eq!(most_abundant(&table).map(|l| l.as_str()), Some("13C"));
        let ratios = derive_ratios(&table, true);
        assert_eq!(ratios[0].label(), "13C/Unsub");
    }

    #[test]
    fn test_ratio_pairs() {
        let table = make_table();
        let ratios = derive_ratios(&table, true);
        let labels: Vec<_> = ratios.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["13C/Unsub", "D/Unsub"]);

        let ratios = derive_ratios(&table, false);
        let labels: Vec<_> = ratios.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["D/13C", "13C/Unsub", "D/Unsub"]);
    }

    #[test]
    fn test_ratios_at_most_one() {
        let table = make_table();
        for column in derive_ratios(&table, false) {
            let num = table.counts(column.numerator.as_str()).unwrap();
            let den = table.counts(column.denominator.as_str()).unwrap();
            for ((v, n), d) in column.values.iter().zip(num).zip(den) {
                if n != 0.0 && d != 0.0 {
                    assert!(*v <= 1.0, "{} = {v}", column.label());
                }
            }
            let n_total: f64 = table.total_counts(column.numerator.as_str()).unwrap();
            let d_total: f64 = table.total_counts(column.denominator.as_str()).unwrap();
            assert!(n_total <= d_total);
        }
    }

    #[test]
    fn test_zero_denominator_is_nan() {
        let table = make_table();
        let ratios = derive_ratios(&table, false);
        let d_13c = ratios.iter().find(|c| c.label() == "D/13C").unwrap();
        assert!(d_13c.values.iter().all(|v| v.is_finite()));

        let table = ScanMerger::default()
            .merge(vec![
                make_peak("M0", 1, 1000.0),
                make_peak("13C", 2, 100.0),
                make_peak("M0", 3, 1000.0),
                make_peak("13C", 3, 100.0),
            ])
            .unwrap();
        let ratios = derive_ratios(&table, true);
        assert_eq!(ratios[0].values[0], 0.0);
        assert!(ratios[0].values[1].is_nan());
        assert!((ratios[0].values[2] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_relative_abundance_sums_to_one() {
        let table = make_table();
        let annotated = RatioDeriver::new(AbundanceMode::RelativeAbundance).derive(table);
        assert_eq!(annotated.kind(), LabelKind::RelativeAbundance);
        let total = annotated.column(TOTAL_COUNTS).unwrap();
        let labels = annotated.derived_labels();
        assert_eq!(labels.len(), 3);
        for i in 0..annotated.len() {
            let acc: f64 = labels
                .iter()
                .map(|l| annotated.column(l).unwrap()[i])
                .sum();
            if total[i] > 0.0 {
                assert!((acc - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_column_lookup() {
        let annotated = RatioDeriver::default().derive(make_table());
        assert_eq!(annotated.kind(), LabelKind::IsotopeRatio);
        assert!(annotated.column("13C/Unsub").is_some());
        assert!(annotated.column("countsD").is_some());
        assert!(annotated.column(TOTAL_COUNTS).is_none());
        assert!(matches!(
            annotated.column_values("Unsub/13C"),
            Err(IsoXError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_retain_rows() {
        let mut annotated = RatioDeriver::default().derive(make_table());
        annotated.retain_rows(&[true, false, true, false, true]);
        assert_eq!(annotated.len(), 3);
        assert_eq!(annotated.merged.scan_numbers(), vec![1, 3, 5]);
        assert_eq!(annotated.column("13C/Unsub").unwrap().len(), 3);
    }
}
