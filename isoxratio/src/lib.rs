pub mod calibration;
pub mod error;
pub mod interval;
pub mod merge;
pub mod ratio;
pub mod record;
pub mod stats;

pub mod batch;
pub mod filter;
pub mod pipeline;
pub mod summary;

pub use batch::{
    BatchAggregator, BatchFailure, BatchInput, BatchReport, BatchRow, BatchTable, FailurePolicy,
    GroupedMeans, RatioEstimate,
};
pub use calibration::{CalibratedPeak, CalibrationParams, DomainErrorPolicy};
pub use error::{DomainError, IsoXError, ParseError};
pub use filter::{AcquisitionWindow, DualInletSchedule, FilterParams, OutlierCull, WindowAxis};
pub use merge::{MergedScanRow, MergedScanTable, ScanMerger};
pub use pipeline::{IsoXProcessor, ProcessedFile, ProcessingParams};
pub use ratio::{AbundanceMode, AnnotatedScanTable, LabelKind, RatioDeriver};
pub use record::{read_isox, read_isox_path, Isotopologue, PeakRecord};
pub use summary::{aggregate, FragmentSummary};
