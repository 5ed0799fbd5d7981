//! The per-file processing pipeline: read, merge, derive, filter and summarize
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::calibration::{CalibrationParams, DomainErrorPolicy};
use crate::error::IsoXError;
use crate::filter::FilterParams;
use crate::merge::ScanMerger;
use crate::ratio::{AbundanceMode, AnnotatedScanTable, RatioDeriver};
use crate::record::{read_isox_path, PeakRecord};
use crate::summary::{aggregate, FragmentSummary};

/// Everything that controls how one file is processed
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    #[serde(default)]
    pub calibration: CalibrationParams,
    #[serde(default)]
    pub domain_policy: DomainErrorPolicy,
    #[serde(default)]
    pub mode: AbundanceMode,
    #[serde(default)]
    pub filters: FilterParams,
}

impl ProcessingParams {
    pub fn with_mode(mut self, mode: AbundanceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_filters(mut self, filters: FilterParams) -> Self {
        self.filters = filters;
        self
    }
}

/// The outcome of processing one IsoX export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub path: PathBuf,
    pub table: AnnotatedScanTable,
    pub summaries: Vec<FragmentSummary>,
    pub scans_removed: usize,
}

/// Runs the pipeline on one file with a fixed [`ProcessingParams`]
#[derive(Debug, Clone, PartialEq)]
pub struct IsoXProcessor {
    params: ProcessingParams,
}

impl IsoXProcessor {
    /// Create a processor, failing if `params` hold conflicting options
    pub fn new(params: ProcessingParams) -> Result<Self, IsoXError> {
        params.filters.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ProcessingParams {
        &self.params
    }

    pub fn merger(&self) -> ScanMerger {
        ScanMerger::new(self.params.calibration, self.params.domain_policy)
    }

    /// Merge, derive and filter the peaks of one file
    pub fn annotate(
        &self,
        records: Vec<PeakRecord>,
    ) -> Result<(AnnotatedScanTable, usize), IsoXError> {
        let merged = self.merger().merge(records)?;
        let mut table = RatioDeriver::new(self.params.mode).derive(merged);
        let removed = self.params.filters.apply(&mut table)?;
        Ok((table, removed))
    }

    pub fn process_records(
        &self,
        records: Vec<PeakRecord>,
        fragment: Option<&str>,
    ) -> Result<(AnnotatedScanTable, Vec<FragmentSummary>), IsoXError> {
        let (table, _) = self.annotate(records)?;
        let summaries = aggregate(&table, fragment);
        Ok((table, summaries))
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn process_path<P: AsRef<Path>>(
        &self,
        path: P,
        fragment: Option<&str>,
    ) -> Result<ProcessedFile, IsoXError> {
        let path = path.as_ref();
        let records = read_isox_path(path)?;
        let (table, scans_removed) = self.annotate(records)?;
        let summaries = aggregate(&table, fragment);
        debug!(
            "Summarized {} labels over {} scans of {}",
            summaries.len(),
            table.len(),
            path.display()
        );
        Ok(ProcessedFile {
            path: path.to_path_buf(),
            table,
            summaries,
            scans_removed,
        })
    }
}
