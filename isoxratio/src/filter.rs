//! Row selection over an [`AnnotatedScanTable`] by acquisition window and by outlier exclusion
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IsoXError;
use crate::interval::{intervals_containing_point, SimpleInterval, Span1D};
use crate::ratio::AnnotatedScanTable;
use crate::stats;

/// The quantity an [`AcquisitionWindow`] bounds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowAxis {
    #[default]
    RetentionTime,
    ScanNumber,
}

/// A closed interval of retention time (minutes) or scan numbers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionWindow {
    pub axis: WindowAxis,
    pub start: f64,
    pub end: f64,
}

impl AcquisitionWindow {
    pub fn new(axis: WindowAxis, start: f64, end: f64) -> Self {
        Self { axis, start, end }
    }

    pub fn retention_time(start: f64, end: f64) -> Self {
        Self::new(WindowAxis::RetentionTime, start, end)
    }

    pub fn scan_number(start: f64, end: f64) -> Self {
        Self::new(WindowAxis::ScanNumber, start, end)
    }

    pub fn interval(&self) -> SimpleInterval<f64> {
        SimpleInterval::new(self.start, self.end)
    }

    pub fn mask(&self, table: &AnnotatedScanTable) -> Vec<bool> {
        let interval = self.interval();
        table
            .merged
            .scans()
            .iter()
            .map(|scan| match self.axis {
                WindowAxis::RetentionTime => interval.contains(scan.retention_time),
                WindowAxis::ScanNumber => interval.contains(scan.scan_number as f64),
            })
            .collect()
    }
}

/// Alternating sample and standard observation periods of a dual inlet acquisition.
///
/// Each repetition waits `dead_time` minutes for the inlet to settle, then observes for
/// `observation_time` minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DualInletSchedule {
    pub start: f64,
    pub dead_time: f64,
    pub observation_time: f64,
    pub repetitions: usize,
}

impl Default for DualInletSchedule {
    fn default() -> Self {
        Self {
            start: 0.0,
            dead_time: 2.0,
            observation_time: 5.0,
            repetitions: 7,
        }
    }
}

impl DualInletSchedule {
    pub fn new(start: f64, dead_time: f64, observation_time: f64, repetitions: usize) -> Self {
        Self {
            start,
            dead_time,
            observation_time,
            repetitions,
        }
    }

    /// The retention time windows that are observed
    pub fn windows(&self) -> Vec<SimpleInterval<f64>> {
        let mut current = self.start;
        let mut windows = Vec::with_capacity(self.repetitions);
        for _ in 0..self.repetitions {
            windows.push(SimpleInterval::new(
                current + self.dead_time,
                current + self.dead_time + self.observation_time,
            ));
            current += self.dead_time + self.observation_time;
        }
        windows
    }

    pub fn mask(&self, table: &AnnotatedScanTable) -> Vec<bool> {
        let windows = self.windows();
        table
            .merged
            .scans()
            .iter()
            .map(|scan| !intervals_containing_point(&windows, scan.retention_time).is_empty())
            .collect()
    }
}

/// Drop rows whose value in `column` lies further than `multiplier` sample standard
/// deviations from the column mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierCull {
    pub column: String,
    pub multiplier: f64,
}

impl OutlierCull {
    pub fn new(column: impl Into<String>, multiplier: f64) -> Self {
        Self {
            column: column.into(),
            multiplier,
        }
    }

    pub fn bounds(&self, values: &[f64]) -> SimpleInterval<f64> {
        let mu = stats::mean(values);
        let sd = stats::sample_std_dev(values);
        // A column with a single value has an undefined spread; keep it.
        let sd = if sd.is_nan() { 0.0 } else { sd };
        SimpleInterval::new(mu - self.multiplier * sd, mu + self.multiplier * sd)
    }

    pub fn mask(&self, table: &AnnotatedScanTable) -> Result<Vec<bool>, IsoXError> {
        let values = table.column_values(&self.column)?;
        let bounds = self.bounds(&values);
        Ok(values.iter().map(|v| bounds.contains(*v)).collect())
    }
}

impl Default for OutlierCull {
    fn default() -> Self {
        Self {
            column: String::new(),
            multiplier: 3.0,
        }
    }
}

/// The optional row selections applied to every file, in the order window, then cull
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub window: Option<AcquisitionWindow>,
    #[serde(default)]
    pub dual_inlet: Option<DualInletSchedule>,
    #[serde(default)]
    pub outlier_cull: Option<OutlierCull>,
}

impl FilterParams {
    pub fn is_empty(&self) -> bool {
        self.window.is_none() && self.dual_inlet.is_none() && self.outlier_cull.is_none()
    }

    /// Reject combinations of options that cannot be honored together
    pub fn validate(&self) -> Result<(), IsoXError> {
        if self.window.is_some() && self.dual_inlet.is_some() {
            return Err(IsoXError::Configuration(
                "an acquisition window and a dual inlet schedule cannot be used together"
                    .to_string(),
            ));
        }
        if let Some(window) = self.window.as_ref() {
            if window.start.is_nan() || window.end.is_nan() || window.start > window.end {
                return Err(IsoXError::Configuration(format!(
                    "the acquisition window {}-{} is empty",
                    window.start, window.end
                )));
            }
        }
        if let Some(cull) = self.outlier_cull.as_ref() {
            if cull.column.is_empty() {
                return Err(IsoXError::Configuration(
                    "an outlier cull needs a column to cull on".to_string(),
                ));
            }
            if cull.multiplier.is_nan() || cull.multiplier < 0.0 {
                return Err(IsoXError::Configuration(format!(
                    "the outlier cull multiplier must not be negative, found {}",
                    cull.multiplier
                )));
            }
        }
        Ok(())
    }

    /// Apply every configured selection to `table`, returning the number of rows removed
    pub fn apply(&self, table: &mut AnnotatedScanTable) -> Result<usize, IsoXError> {
        self.validate()?;
        let initial = table.len();
        if let Some(window) = self.window.as_ref() {
            let mask = window.mask(table);
            table.retain_rows(&mask);
        } else if let Some(schedule) = self.dual_inlet.as_ref() {
            let mask = schedule.mask(table);
            table.retain_rows(&mask);
        }
        let after_window = table.len();

        if let Some(cull) = self.outlier_cull.as_ref() {
            let mask = cull.mask(table)?;
            table.retain_rows(&mask);
            debug!(
                "Culled {} rows on {} outside of {} standard deviations",
                after_window - table.len(),
                cull.column,
                cull.multiplier
            );
        }

        if table.is_empty() && initial > 0 {
            warn!("No scans left after filtering {initial} scans");
        }
        Ok(initial - table.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::merge::test::make_peak;
    use crate::merge::ScanMerger;
    use crate::ratio::{AbundanceMode, RatioDeriver};

    fn make_table(unsub_intensity: &[f64]) -> AnnotatedScanTable {
        let mut records = Vec::new();
        for (i, intensity) in unsub_intensity.iter().enumerate() {
            let scan = i as u32 + 1;
            records.push(make_peak("M0", scan, *intensity));
            records.push(make_peak("13C", scan, 100.0));
        }
        let merged = ScanMerger::default().merge(records).unwrap();
        RatioDeriver::default().derive(merged)
    }

    #[test]
    fn test_outlier_cull() -> Result<(), IsoXError> {
        let mut table = make_table(&[1000.0; 5]);
        let params = FilterParams {
            outlier_cull: Some(OutlierCull::new("intensityUnsub", 1.0)),
            ..Default::default()
        };
        assert_eq!(params.apply(&mut table)?, 0);

        let mut table = make_table(&[1.0, 1.0, 1.0, 1.0, 100.0]);
        let before = table.len();
        let removed = params.apply(&mut table)?;
        assert_eq!(removed, 1);
        assert_eq!(table.len(), before - 1);
        assert_eq!(table.merged.scan_numbers(), vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_outlier_cull_drops_nan() -> Result<(), IsoXError> {
        let mut records = Vec::new();
        for scan in 1..=4 {
            records.push(make_peak("13C", scan, 100.0));
            if scan != 2 {
                records.push(make_peak("M0", scan, 1000.0));
            }
        }
        let merged = ScanMerger::default().merge(records)?;
        let mut table = RatioDeriver::default().derive(merged);
        let params = FilterParams {
            outlier_cull: Some(OutlierCull::new("13C/Unsub", 3.0)),
            ..Default::default()
        };
        assert_eq!(params.apply(&mut table)?, 1);
        assert_eq!(table.merged.scan_numbers(), vec![1, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_unknown_cull_column() {
        let mut table = make_table(&[1000.0; 3]);
        let params = FilterParams {
            outlier_cull: Some(OutlierCull::new("Unsub/13C", 3.0)),
            ..Default::default()
        };
        assert!(matches!(
            params.apply(&mut table),
            Err(IsoXError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_cull_on_relative_abundance() -> Result<(), IsoXError> {
        let records = (1..=4)
            .flat_map(|scan| [make_peak("M0", scan, 1000.0), make_peak("13C", scan, 100.0)])
            .collect::<Vec<_>>();
        let merged = ScanMerger::default().merge(records)?;
        let mut table = RatioDeriver::new(AbundanceMode::RelativeAbundance).derive(merged);
        for column in ["MN Relative Abundance 13C", "total Counts"] {
            let params = FilterParams {
                outlier_cull: Some(OutlierCull::new(column, 3.0)),
                ..Default::default()
            };
            assert_eq!(params.apply(&mut table)?, 0);
        }
        Ok(())
    }

    #[test]
    fn test_time_window() -> Result<(), IsoXError> {
        let mut table = make_table(&[1000.0; 10]);
        let params = FilterParams {
            window: Some(AcquisitionWindow::retention_time(0.025, 0.055)),
            ..Default::default()
        };
        params.apply(&mut table)?;
        assert_eq!(table.merged.scan_numbers(), vec![3, 4, 5]);

        let mut table = make_table(&[1000.0; 10]);
        let params = FilterParams {
            window: Some(AcquisitionWindow::scan_number(2.0, 4.0)),
            ..Default::default()
        };
        params.apply(&mut table)?;
        assert_eq!(table.merged.scan_numbers(), vec![2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_dual_inlet_windows() {
        let schedule = DualInletSchedule::new(0.0, 10.0, 2.0, 3);
        let windows = schedule.windows();
        assert_eq!(
            windows,
            vec![
                SimpleInterval::new(10.0, 12.0),
                SimpleInterval::new(22.0, 24.0),
                SimpleInterval::new(34.0, 36.0),
            ]
        );
        assert!(DualInletSchedule::new(1.0, 1.0, 1.0, 0).windows().is_empty());
    }

    #[test]
    fn test_dual_inlet_filter() -> Result<(), IsoXError> {
        // retention times are 0.01 * scan
        let mut table = make_table(&[1000.0; 10]);
        let params = FilterParams {
            dual_inlet: Some(DualInletSchedule::new(0.0, 0.015, 0.027, 2)),
            ..Default::default()
        };
        params.apply(&mut table)?;
        assert_eq!(table.merged.scan_numbers(), vec![2, 3, 4, 6, 7, 8]);
        Ok(())
    }

    #[test]
    fn test_conflicting_windows() {
        let params = FilterParams {
            window: Some(AcquisitionWindow::retention_time(0.0, 1.0)),
            dual_inlet: Some(DualInletSchedule::default()),
            outlier_cull: None,
        };
        assert!(matches!(
            params.validate(),
            Err(IsoXError::Configuration(_))
        ));
        let mut table = make_table(&[1000.0; 3]);
        assert!(params.apply(&mut table).is_err());
        assert_eq!(table.len(), 3);
    }
}
