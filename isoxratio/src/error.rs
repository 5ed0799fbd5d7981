//! Error types shared by every stage of the pipeline
use std::io;

use thiserror::Error;

/// A failure to read an IsoX export into [`PeakRecord`](crate::record::PeakRecord)s
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing required IsoX column: {0}")]
    MissingColumn(String),
    #[error("Malformed IsoX record on line {line}: {message}")]
    MalformedRecord { line: u64, message: String },
    #[error("Failed to read delimited text: {0}")]
    Csv(
        #[source]
        #[from]
        csv::Error,
    ),
}

/// A peak whose readings cannot be converted into counts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("Peak noise must be positive, found {value} on scan {scan_number}")]
    NonPositiveNoise { scan_number: u32, value: f64 },
    #[error("Resolution must be positive, found {value} on scan {scan_number}")]
    NonPositiveResolution { scan_number: u32, value: f64 },
    #[error("Microscan count must be positive, found {value} on scan {scan_number}")]
    NonPositiveMicroscans { scan_number: u32, value: u32 },
    #[error("Intensity must be finite, found {value} on scan {scan_number}")]
    NonFiniteIntensity { scan_number: u32, value: f64 },
}

impl DomainError {
    pub fn scan_number(&self) -> u32 {
        match self {
            DomainError::NonPositiveNoise { scan_number, .. }
            | DomainError::NonPositiveResolution { scan_number, .. }
            | DomainError::NonPositiveMicroscans { scan_number, .. }
            | DomainError::NonFiniteIntensity { scan_number, .. } => *scan_number,
        }
    }
}

#[derive(Debug, Error)]
pub enum IsoXError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Nothing to process: {0}")]
    EmptyInput(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("No column named {0:?} in the scan table")]
    UnknownColumn(String),
}

impl From<csv::Error> for IsoXError {
    fn from(value: csv::Error) -> Self {
        Self::Parse(ParseError::Csv(value))
    }
}
