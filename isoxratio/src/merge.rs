//! Merging independently recorded isotopologue traces into one scan-indexed table.
//!
//! IsoX writes one row per peak per scan per isotopologue, and an isotopologue
//! is only written for scans where a peak was found. [`ScanMerger`] aligns these
//! sparse traces on a dense scan number index where an absent peak reads as
//! zero signal.
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::calibration::{calibrate, CalibratedPeak, CalibrationParams, DomainErrorPolicy};
use crate::error::IsoXError;
use crate::interval::ScanRange;
use crate::record::{Isotopologue, PeakRecord};

/// The per-isotopologue readings of one scan. All zero when the isotopologue
/// was not observed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub mass: f64,
    pub intensity: f64,
    pub peak_noise: f64,
    pub counts: f64,
}

impl Observation {
    pub fn is_observed(&self) -> bool {
        self.intensity != 0.0 || self.counts != 0.0 || self.mass != 0.0
    }
}

impl From<&CalibratedPeak> for Observation {
    fn from(value: &CalibratedPeak) -> Self {
        Self {
            mass: value.peak.mass,
            intensity: value.peak.intensity,
            peak_noise: value.peak.peak_noise,
            counts: value.counts,
        }
    }
}

/// The fields of a scan that do not depend on the isotopologue.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    pub scan_number: u32,
    pub retention_time: f64,
    pub integration_time_ms: f64,
    pub total_ion_current: f64,
    pub tic_times_integ_time: f64,
    pub resolution: f64,
    pub microscans: u32,
    pub agc_target: Option<String>,
}

impl ScanInfo {
    fn empty(scan_number: u32) -> Self {
        Self {
            scan_number,
            ..Default::default()
        }
    }
}

impl From<&PeakRecord> for ScanInfo {
    fn from(peak: &PeakRecord) -> Self {
        Self {
            scan_number: peak.scan_number,
            retention_time: peak.retention_time,
            integration_time_ms: peak.integration_time_ms,
            total_ion_current: peak.total_ion_current,
            tic_times_integ_time: peak.tic_times_integ_time,
            resolution: peak.resolution,
            microscans: peak.microscans,
            agc_target: peak.agc_target.clone(),
        }
    }
}

/// A borrowed view of one row of a [`MergedScanTable`]
#[derive(Debug, Clone)]
pub struct MergedScanRow<'a> {
    pub scan: &'a ScanInfo,
    pub observations: Vec<(&'a Isotopologue, &'a Observation)>,
}

impl<'a> MergedScanRow<'a> {
    pub fn observation(&self, isotopologue: &str) -> Option<&'a Observation> {
        self.observations
            .iter()
            .find(|(label, _)| label.as_str() == isotopologue)
            .map(|(_, obs)| *obs)
    }
}

/// Book-keeping from building a [`MergedScanTable`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatistics {
    /// The number of peaks discarded because a more intense peak shared their scan
    pub duplicate_peaks: usize,
    /// The number of scans inserted because no isotopologue was observed on them
    pub filled_scans: usize,
    /// The number of peaks discarded because they could not be calibrated
    pub dropped_peaks: usize,
}

/// Shared scan fields plus one column of [`Observation`] per isotopologue, all aligned
/// by row.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedScanTable {
    scans: Vec<ScanInfo>,
    traces: IndexMap<Isotopologue, Vec<Observation>>,
    pub statistics: MergeStatistics,
}

const SHARED_COLUMNS: [&str; 7] = [
    "scanNumber",
    "retTime",
    "integTime",
    "tic",
    "TIC*IT",
    "resolution",
    "microscans",
];

const TRACE_COLUMNS: [&str; 4] = ["mass", "intensity", "peakNoise", "counts"];

impl MergedScanTable {
    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn scans(&self) -> &[ScanInfo] {
        &self.scans
    }

    pub fn scan_numbers(&self) -> Vec<u32> {
        self.scans.iter().map(|s| s.scan_number).collect()
    }

    /// The isotopologues in the table in their canonical order
    pub fn isotopologues(&self) -> impl Iterator<Item = &Isotopologue> {
        self.traces.keys()
    }

    pub fn num_isotopologues(&self) -> usize {
        self.traces.len()
    }

    pub fn has_isotopologue(&self, isotopologue: &str) -> bool {
        self.traces.contains_key(isotopologue)
    }

    pub fn trace(&self, isotopologue: &str) -> Option<&[Observation]> {
        self.traces.get(isotopologue).map(|t| t.as_slice())
    }

    pub fn traces(&self) -> impl Iterator<Item = (&Isotopologue, &[Observation])> {
        self.traces.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn counts(&self, isotopologue: &str) -> Option<Vec<f64>> {
        self.trace(isotopologue)
            .map(|t| t.iter().map(|o| o.counts).collect())
    }

    pub fn masses(&self, isotopologue: &str) -> Option<Vec<f64>> {
        self.trace(isotopologue)
            .map(|t| t.iter().map(|o| o.mass).collect())
    }

    /// The counts of `isotopologue` summed over every row
    pub fn total_counts(&self, isotopologue: &str) -> Option<f64> {
        self.trace(isotopologue)
            .map(|t| t.iter().map(|o| o.counts).sum())
    }

    pub fn row(&self, index: usize) -> Option<MergedScanRow<'_>> {
        let scan = self.scans.get(index)?;
        let observations = self
            .traces
            .iter()
            .map(|(label, trace)| (label, &trace[index]))
            .collect();
        Some(MergedScanRow { scan, observations })
    }

    pub fn rows(&self) -> impl Iterator<Item = MergedScanRow<'_>> {
        (0..self.len()).filter_map(|i| self.row(i))
    }

    /// Look up a shared column (`scanNumber`, `retTime`, `integTime`, `tic`, `TIC*IT`,
    /// `resolution`, `microscans`) or a per-isotopologue column (`mass{sub}`,
    /// `intensity{sub}`, `peakNoise{sub}`, `counts{sub}`) by name.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        if SHARED_COLUMNS.contains(&name) {
            let values = self
                .scans
                .iter()
                .map(|s| match name {
                    "scanNumber" => s.scan_number as f64,
                    "retTime" => s.retention_time,
                    "integTime" => s.integration_time_ms,
                    "tic" => s.total_ion_current,
                    "TIC*IT" => s.tic_times_integ_time,
                    "resolution" => s.resolution,
                    _ => s.microscans as f64,
                })
                .collect();
            return Some(values);
        }
        for prefix in TRACE_COLUMNS {
            if let Some(label) = name.strip_prefix(prefix) {
                if let Some(trace) = self.trace(label) {
                    let values = trace
                        .iter()
                        .map(|o| match prefix {
                            "mass" => o.mass,
                            "intensity" => o.intensity,
                            "peakNoise" => o.peak_noise,
                            _ => o.counts,
                        })
                        .collect();
                    return Some(values);
                }
            }
        }
        None
    }

    /// Keep only the rows whose entry in `keep` is `true`
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        retain_by_mask(&mut self.scans, keep);
        for trace in self.traces.values_mut() {
            retain_by_mask(trace, keep);
        }
    }
}

pub(crate) fn retain_by_mask<T>(values: &mut Vec<T>, keep: &[bool]) {
    let mut it = keep.iter();
    values.retain(|_| it.next().copied().unwrap_or(false));
}

/// Group peak records by isotopologue.
///
/// Groups are ordered by their raw label, and `M0` is normalized to `Unsub` after
/// ordering. Records under both `M0` and `Unsub` are pooled.
pub fn group_by_isotopologue(
    records: impl IntoIterator<Item = PeakRecord>,
) -> IndexMap<Isotopologue, Vec<PeakRecord>> {
    let mut raw_groups: BTreeMap<String, Vec<PeakRecord>> = BTreeMap::new();
    for record in records {
        raw_groups
            .entry(record.isotopologue_label.clone())
            .or_default()
            .push(record);
    }
    let mut groups: IndexMap<Isotopologue, Vec<PeakRecord>> = IndexMap::new();
    for (label, members) in raw_groups {
        groups
            .entry(Isotopologue::new(label))
            .or_default()
            .extend(members);
    }
    groups
}

/// For each scan number keep only the most intense peak, the first one
/// encountered winning ties. Returns the retained peaks in ascending scan
/// order and the scan numbers that had duplicates.
pub fn select_dominant_peaks(peaks: Vec<PeakRecord>) -> (Vec<PeakRecord>, Vec<u32>) {
    let mut best: BTreeMap<u32, (PeakRecord, usize)> = BTreeMap::new();
    for peak in peaks {
        match best.entry(peak.scan_number) {
            Entry::Vacant(slot) => {
                slot.insert((peak, 1));
            }
            Entry::Occupied(mut slot) => {
                let (current, seen) = slot.get_mut();
                *seen += 1;
                if peak.intensity > current.intensity {
                    *current = peak;
                }
            }
        }
    }
    let duplicated = best
        .iter()
        .filter(|(_, (_, seen))| *seen > 1)
        .map(|(scan, _)| *scan)
        .collect();
    let selected = best.into_values().map(|(peak, _)| peak).collect();
    (selected, duplicated)
}

/// Builds a [`MergedScanTable`] from the peaks of one acquisition file
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ScanMerger {
    pub calibration: CalibrationParams,
    pub domain_policy: DomainErrorPolicy,
}

impl ScanMerger {
    pub fn new(calibration: CalibrationParams, domain_policy: DomainErrorPolicy) -> Self {
        Self {
            calibration,
            domain_policy,
        }
    }

    /// Group, de-duplicate, calibrate and merge the peaks of one file
    pub fn merge(
        &self,
        records: impl IntoIterator<Item = PeakRecord>,
    ) -> Result<MergedScanTable, IsoXError> {
        self.merge_groups(group_by_isotopologue(records))
    }

    /// Merge peaks already grouped by isotopologue. The first group supplies the
    /// shared scan fields wherever it has a peak.
    ///
    /// # Errors
    /// [`IsoXError::EmptyInput`] if there are no groups or no peaks, and
    /// [`IsoXError::Domain`] if a peak cannot be calibrated under [`DomainErrorPolicy::Fail`].
    #[instrument(level = "debug", skip_all)]
    pub fn merge_groups(
        &self,
        groups: IndexMap<Isotopologue, Vec<PeakRecord>>,
    ) -> Result<MergedScanTable, IsoXError> {
        if groups.is_empty() {
            return Err(IsoXError::EmptyInput(
                "no isotopologue groups to merge".to_string(),
            ));
        }

        let mut statistics = MergeStatistics::default();
        let mut calibrated: IndexMap<Isotopologue, Vec<CalibratedPeak>> =
            IndexMap::with_capacity(groups.len());
        for (label, peaks) in groups {
            let n_peaks = peaks.len();
            let (selected, duplicated) = select_dominant_peaks(peaks);
            if !duplicated.is_empty() {
                statistics.duplicate_peaks += n_peaks - selected.len();
                warn!(
                    "Multiple peaks found for isotopologue {label} on {} scans, keeping the most intense",
                    duplicated.len()
                );
                debug!("Scans with multiple {label} peaks: {duplicated:?}");
            }
            let n_selected = selected.len();
            let peaks: Vec<CalibratedPeak> = selected
                .into_iter()
                .map(|p| calibrate(p, &self.calibration, self.domain_policy))
                .filter_map(Result::transpose)
                .collect::<Result<Vec<_>, _>>()?;
            statistics.dropped_peaks += n_selected - peaks.len();
            calibrated.insert(label, peaks);
        }

        let range = ScanRange::covering(
            calibrated
                .values()
                .flat_map(|peaks| peaks.iter().map(|p| p.scan_number())),
        )
        .ok_or_else(|| IsoXError::EmptyInput("no peaks to merge".to_string()))?;

        let mut scans: Vec<Option<ScanInfo>> = vec![None; range.len()];
        let mut traces = IndexMap::with_capacity(calibrated.len());
        for (label, peaks) in calibrated {
            let mut trace = vec![Observation::default(); range.len()];
            for peak in peaks.iter() {
                // Every scan number lies within the covering range
                if let Some(offset) = range.offset_of(peak.scan_number()) {
                    trace[offset] = Observation::from(peak);
                    if scans[offset].is_none() {
                        scans[offset] = Some(ScanInfo::from(&peak.peak));
                    }
                }
            }
            traces.insert(label, trace);
        }

        let scans: Vec<ScanInfo> = scans
            .into_iter()
            .zip(range.iter())
            .map(|(info, scan_number)| {
                info.unwrap_or_else(|| {
                    statistics.filled_scans += 1;
                    ScanInfo::empty(scan_number)
                })
            })
            .collect();

        debug!(
            "Merged {} isotopologues over scans {}-{} ({} filled)",
            traces.len(),
            range.start,
            range.end,
            statistics.filled_scans
        );

        Ok(MergedScanTable {
            scans,
            traces,
            statistics,
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn make_peak(label: &str, scan_number: u32, intensity: f64) -> PeakRecord {
        PeakRecord {
            scan_number,
            retention_time: scan_number as f64 * 0.01,
            integration_time_ms: 20.0,
            mass: if label == "13C" { 105.05 } else { 104.05 },
            intensity,
            peak_noise: 10.0,
            resolution: 120_000.0,
            microscans: 1,
            total_ion_current: 1e8,
            tic_times_integ_time: 2e6,
            isotopologue_label: label.to_string(),
            agc_target: None,
            filename: None,
            compound: None,
        }
    }

    #[test]
    fn test_end_to_end_gap_fill() -> Result<(), IsoXError> {
        let records = vec![
            make_peak("M0", 1, 1000.0),
            make_peak("M0", 2, 1000.0),
            make_peak("M0", 4, 1000.0),
            make_peak("13C", 2, 100.0),
            make_peak("13C", 3, 100.0),
            make_peak("13C", 4, 100.0),
        ];
        let table = ScanMerger::default().merge(records)?;
        assert_eq!(table.scan_numbers(), vec![1, 2, 3, 4]);
        let labels: Vec<_> = table.isotopologues().map(|l| l.as_str()).collect();
        assert_eq!(labels, vec!["13C", "Unsub"]);

        let unsub = table.counts("Unsub").unwrap();
        let carbon = table.counts("13C").unwrap();
        assert_eq!(unsub[2], 0.0);
        assert_eq!(carbon[0], 0.0);
        assert!((unsub[0] - 440.0).abs() < 1e-9);
        assert!((carbon[1] - 44.0).abs() < 1e-9);

        // Scan 3 only has a 13C peak, so its shared fields come from that trace
        assert!((table.scans()[2].retention_time - 0.03).abs() < 1e-12);
        assert_eq!(table.statistics.filled_scans, 0);
        Ok(())
    }

    #[test]
    fn test_reindex_is_contiguous() -> Result<(), IsoXError> {
        let records = vec![
            make_peak("M0", 10, 1000.0),
            make_peak("D", 16, 5.0),
            make_peak("M0", 13, 1000.0),
        ];
        let table = ScanMerger::default().merge(records)?;
        assert_eq!(table.scan_numbers(), (10..=16).collect::<Vec<_>>());
        assert_eq!(table.statistics.filled_scans, 4);
        let filled = table.row(1).unwrap();
        assert_eq!(filled.scan.scan_number, 11);
        assert_eq!(filled.scan.retention_time, 0.0);
        assert_eq!(filled.observation("Unsub"), Some(&Observation::default()));
        assert_eq!(filled.observation("D").map(|o| o.counts), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_dominant_peak_selection() {
        let peaks = vec![
            make_peak("13C", 2, 50.0),
            make_peak("13C", 1, 10.0),
            make_peak("13C", 2, 80.0),
            make_peak("13C", 2, 80.0),
            make_peak("13C", 2, 20.0),
        ];
        let (selected, duplicated) = select_dominant_peaks(peaks);
        assert_eq!(duplicated, vec![2]);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].scan_number, 1);
        assert_eq!(selected[1].intensity, 80.0);
    }

    #[test]
    fn test_duplicates_counted() -> Result<(), IsoXError> {
        let records = vec![
            make_peak("M0", 1, 1000.0),
            make_peak("M0", 1, 900.0),
            make_peak("M0", 2, 1000.0),
        ];
        let table = ScanMerger::default().merge(records)?;
        assert_eq!(table.statistics.duplicate_peaks, 1);
        assert!((table.counts("Unsub").unwrap()[0] - 440.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_order_independent() -> Result<(), IsoXError> {
        let records = vec![
            make_peak("M0", 3, 1000.0),
            make_peak("13C", 1, 100.0),
            make_peak("M0", 1, 900.0),
            make_peak("13C", 3, 110.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();
        let merger = ScanMerger::default();
        assert_eq!(merger.merge(records)?, merger.merge(reversed)?);
        Ok(())
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            ScanMerger::default().merge(Vec::new()),
            Err(IsoXError::EmptyInput(_))
        ));
        let mut groups = IndexMap::new();
        groups.insert(Isotopologue::from("13C"), Vec::new());
        assert!(matches!(
            ScanMerger::default().merge_groups(groups),
            Err(IsoXError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_domain_error_policies() {
        let mut bad = make_peak("M0", 1, 1000.0);
        bad.peak_noise = 0.0;
        let strict = ScanMerger::new(CalibrationParams::default(), DomainErrorPolicy::Fail);
        assert!(matches!(
            strict.merge(vec![bad.clone()]),
            Err(IsoXError::Domain(_))
        ));
        let merger = ScanMerger::new(CalibrationParams::default(), DomainErrorPolicy::ZeroCounts);
        let table = merger.merge(vec![bad.clone()]).unwrap();
        assert_eq!(table.total_counts("Unsub"), Some(0.0));
        // Nothing is left once the only peak is dropped
        assert!(matches!(
            ScanMerger::default().merge(vec![bad]),
            Err(IsoXError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_bad_peak_only_drops_its_row() -> Result<(), IsoXError> {
        let mut records: Vec<PeakRecord> = (1..=10)
            .flat_map(|scan| [make_peak("M0", scan, 1000.0), make_peak("13C", scan, 100.0)])
            .collect();
        records[4].peak_noise = 0.0;
        assert_eq!(records[4].scan_number, 3);
        records[13].intensity = f64::NAN;

        let table = ScanMerger::default().merge(records)?;
        assert_eq!(table.len(), 10);
        assert_eq!(table.statistics.dropped_peaks, 2);
        let unsub = table.counts("Unsub").unwrap();
        let carbon = table.counts("13C").unwrap();
        assert_eq!(unsub[2], 0.0);
        assert_eq!(carbon[6], 0.0);
        assert_eq!(unsub.iter().filter(|c| **c > 0.0).count(), 9);
        assert_eq!(carbon.iter().filter(|c| **c > 0.0).count(), 9);
        // Scan 3 keeps its shared fields from the surviving 13C peak
        assert!((table.scans()[2].retention_time - 0.03).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_column_lookup() -> Result<(), IsoXError> {
        let table = ScanMerger::default().merge(vec![
            make_peak("M0", 1, 1000.0),
            make_peak("13C", 2, 100.0),
        ])?;
        assert_eq!(table.column("scanNumber"), Some(vec![1.0, 2.0]));
        assert_eq!(table.column("intensity13C"), Some(vec![0.0, 100.0]));
        assert_eq!(table.column("massUnsub"), Some(vec![104.05, 0.0]));
        assert_eq!(table.column("countsD"), None);
        assert_eq!(table.column("nonsense"), None);
        Ok(())
    }
}
