use std::ops::{Add, AddAssign};

use isoxratio::ProcessedFile;

/// Counters accumulated over the files of a run
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub files_processed: usize,
    pub files_failed: usize,
    pub scans: usize,
    pub scans_filled: usize,
    pub scans_removed: usize,
    pub duplicate_peaks: usize,
    pub dropped_peaks: usize,
}

impl ProgressRecord {
    pub fn from_processed(processed: &ProcessedFile) -> Self {
        let stats = processed.table.merged.statistics;
        Self {
            files_processed: 1,
            files_failed: 0,
            scans: processed.table.len() + processed.scans_removed,
            scans_filled: stats.filled_scans,
            scans_removed: processed.scans_removed,
            duplicate_peaks: stats.duplicate_peaks,
            dropped_peaks: stats.dropped_peaks,
        }
    }

    pub fn failure() -> Self {
        Self {
            files_failed: 1,
            ..Default::default()
        }
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.files_processed += rhs.files_processed;
        self.files_failed += rhs.files_failed;
        self.scans += rhs.scans;
        self.scans_filled += rhs.scans_filled;
        self.scans_removed += rhs.scans_removed;
        self.duplicate_peaks += rhs.duplicate_peaks;
        self.dropped_peaks += rhs.dropped_peaks;
    }
}
