//! Reading IsoX "combined" exports into typed per-peak records
use std::borrow::Borrow;
use std::fmt::Display;
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IsoXError, ParseError};

/// The label IsoX uses for the unsubstituted isotopologue
pub const M0_LABEL: &str = "M0";
/// The canonical name of the unsubstituted isotopologue
pub const UNSUBSTITUTED: &str = "Unsub";

/// Columns every IsoX export must carry
pub const REQUIRED_COLUMNS: [&str; 10] = [
    "scan.no",
    "time.min",
    "it.ms",
    "mzMeasured",
    "intensity",
    "peakNoise",
    "resolution",
    "microscans",
    "tic",
    "isotopolog",
];

/// An isotopologue label such as `13C`, `D` or `Unsub`.
///
/// Construction normalizes the IsoX alias `M0` to `Unsub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Isotopologue(String);

impl Isotopologue {
    pub fn new(label: impl Into<String>) -> Self {
        let label: String = label.into();
        if label == M0_LABEL {
            Self(UNSUBSTITUTED.to_string())
        } else {
            Self(label)
        }
    }

    pub fn unsubstituted() -> Self {
        Self(UNSUBSTITUTED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unsubstituted(&self) -> bool {
        self.0 == UNSUBSTITUTED
    }
}

impl Display for Isotopologue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Isotopologue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Isotopologue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Isotopologue> for String {
    fn from(value: Isotopologue) -> Self {
        value.0
    }
}

impl Borrow<str> for Isotopologue {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One detected peak on one scan for one isotopologue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    pub scan_number: u32,
    /// Retention time in minutes
    pub retention_time: f64,
    pub integration_time_ms: f64,
    /// The measured m/z of the peak
    pub mass: f64,
    pub intensity: f64,
    pub peak_noise: f64,
    pub resolution: f64,
    pub microscans: u32,
    pub total_ion_current: f64,
    /// `total_ion_current * integration_time_ms / 1000`
    pub tic_times_integ_time: f64,
    /// The label as it appeared in the export, before `M0` normalization
    pub isotopologue_label: String,
    pub agc_target: Option<String>,
    pub filename: Option<String>,
    pub compound: Option<String>,
}

impl PeakRecord {
    pub fn isotopologue(&self) -> Isotopologue {
        Isotopologue::new(self.isotopologue_label.as_str())
    }
}

pub fn tic_times_integ_time(total_ion_current: f64, integration_time_ms: f64) -> f64 {
    total_ion_current * integration_time_ms / 1000.0
}

/// The row layout of an IsoX export. Unlisted columns are ignored.
#[derive(Debug, Deserialize)]
struct IsoXRow {
    #[serde(rename = "scan.no")]
    scan_number: u32,
    #[serde(rename = "time.min")]
    retention_time: f64,
    #[serde(rename = "it.ms")]
    integration_time_ms: f64,
    #[serde(rename = "mzMeasured")]
    mass: f64,
    intensity: f64,
    #[serde(rename = "peakNoise")]
    peak_noise: f64,
    resolution: f64,
    microscans: u32,
    tic: f64,
    isotopolog: String,
    #[serde(rename = "TIC*IT", default)]
    tic_times_integ_time: Option<f64>,
    #[serde(rename = "agcTarget", default)]
    agc_target: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    compound: Option<String>,
}

impl From<IsoXRow> for PeakRecord {
    fn from(row: IsoXRow) -> Self {
        let tic_it = row
            .tic_times_integ_time
            .unwrap_or_else(|| tic_times_integ_time(row.tic, row.integration_time_ms));
        Self {
            scan_number: row.scan_number,
            retention_time: row.retention_time,
            integration_time_ms: row.integration_time_ms,
            mass: row.mass,
            intensity: row.intensity,
            peak_noise: row.peak_noise,
            resolution: row.resolution,
            microscans: row.microscans,
            total_ion_current: row.tic,
            tic_times_integ_time: tic_it,
            isotopologue_label: row.isotopolog,
            agc_target: row.agc_target.filter(|s| !s.is_empty()),
            filename: row.filename.filter(|s| !s.is_empty()),
            compound: row.compound.filter(|s| !s.is_empty()),
        }
    }
}

/// Read a tab-delimited IsoX export from any buffered source.
///
/// # Errors
/// [`ParseError::MissingColumn`] if the header lacks one of [`REQUIRED_COLUMNS`],
/// which is also what a file with the wrong delimiter produces, and
/// [`ParseError::MalformedRecord`] if a row cannot be read into a [`PeakRecord`].
pub fn read_isox<R: BufRead>(reader: R) -> Result<Vec<PeakRecord>, ParseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(ParseError::MissingColumn(column.to_string()));
        }
    }

    let mut records: Vec<PeakRecord> = Vec::new();
    for row in csv_reader.deserialize::<IsoXRow>() {
        match row {
            Ok(row) => records.push(row.into()),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                return Err(ParseError::MalformedRecord {
                    line,
                    message: e.to_string(),
                });
            }
        }
    }

    let mut filenames: Vec<&str> = records
        .iter()
        .filter_map(|r| r.filename.as_deref())
        .collect();
    filenames.sort_unstable();
    filenames.dedup();
    if filenames.len() > 1 {
        warn!(
            "IsoX export names {} acquisition files, treating them as one: {:?}",
            filenames.len(),
            filenames
        );
    }
    debug!("Read {} peak records", records.len());
    Ok(records)
}

/// Read an IsoX export from a path, decompressing it if the name ends with `.gz`
pub fn read_isox_path<P: AsRef<Path>>(path: P) -> Result<Vec<PeakRecord>, IsoXError> {
    let path = path.as_ref();
    let handle = io::BufReader::new(fs::File::open(path)?);
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or_default();
    let records = if is_gzip {
        read_isox(io::BufReader::new(MultiGzDecoder::new(handle)))?
    } else {
        read_isox(handle)?
    };
    Ok(records)
}
