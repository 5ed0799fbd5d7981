//! Conversion of Orbitrap peak intensities into shot-noise calibrated ion counts
//!
//! ```math
//! N = \frac{I}{\sigma_N} \times \frac{C_N}{z} \times \sqrt{\frac{R_{ref}}{R}} \times \sqrt{\mu}
//! ```
//!
//! where $`I`$ is the peak intensity, $`\sigma_N`$ the peak noise, $`R`$ the resolution
//! the peak was recorded at and $`\mu`$ the number of microscans.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DomainError;
use crate::record::PeakRecord;

/// The calibration constants of the intensity to counts conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// The resolution $`C_N`$ was determined at
    pub reference_resolution: f64,
    /// The counts-per-noise-unit factor $`C_N`$
    pub cn: f64,
    /// The ion charge $`z`$
    pub charge: u32,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            reference_resolution: 120_000.0,
            cn: 4.4,
            charge: 1,
        }
    }
}

impl CalibrationParams {
    pub fn new(reference_resolution: f64, cn: f64, charge: u32) -> Self {
        Self {
            reference_resolution,
            cn,
            charge,
        }
    }

    /// Compute the counts for a peak, failing if its intensity is not finite or any of
    /// its noise, resolution or microscan readings are not positive.
    pub fn counts_for(&self, peak: &PeakRecord) -> Result<f64, DomainError> {
        if !peak.intensity.is_finite() {
            return Err(DomainError::NonFiniteIntensity {
                scan_number: peak.scan_number,
                value: peak.intensity,
            });
        }
        if peak.peak_noise.is_nan() || peak.peak_noise <= 0.0 {
            return Err(DomainError::NonPositiveNoise {
                scan_number: peak.scan_number,
                value: peak.peak_noise,
            });
        }
        if peak.resolution.is_nan() || peak.resolution <= 0.0 {
            return Err(DomainError::NonPositiveResolution {
                scan_number: peak.scan_number,
                value: peak.resolution,
            });
        }
        if peak.microscans == 0 {
            return Err(DomainError::NonPositiveMicroscans {
                scan_number: peak.scan_number,
                value: peak.microscans,
            });
        }
        let counts = (peak.intensity / peak.peak_noise)
            * (self.cn / self.charge as f64)
            * (self.reference_resolution / peak.resolution).sqrt()
            * (peak.microscans as f64).sqrt();
        Ok(counts.max(0.0))
    }

    pub fn calibrate(&self, peak: PeakRecord) -> Result<CalibratedPeak, DomainError> {
        let counts = self.counts_for(&peak)?;
        Ok(CalibratedPeak { peak, counts })
    }
}

/// What to do with a peak whose readings make [`CalibrationParams::counts_for`] fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DomainErrorPolicy {
    /// Discard the peak, leaving its scan unobserved for that isotopologue
    #[default]
    DropPeak,
    /// Keep the peak with zero counts
    ZeroCounts,
    /// Abort processing of the file
    Fail,
}

/// A [`PeakRecord`] with its calibrated ion count.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedPeak {
    pub peak: PeakRecord,
    pub counts: f64,
}

impl CalibratedPeak {
    pub fn scan_number(&self) -> u32 {
        self.peak.scan_number
    }
}

/// Calibrate a peak under the given [`DomainErrorPolicy`], yielding `None` when the
/// policy drops it
pub fn calibrate(
    peak: PeakRecord,
    params: &CalibrationParams,
    policy: DomainErrorPolicy,
) -> Result<Option<CalibratedPeak>, DomainError> {
    match params.counts_for(&peak) {
        Ok(counts) => Ok(Some(CalibratedPeak { peak, counts })),
        Err(e) => match policy {
            DomainErrorPolicy::Fail => Err(e),
            DomainErrorPolicy::DropPeak => {
                warn!("Dropping {} peak: {e}", peak.isotopologue_label);
                Ok(None)
            }
            DomainErrorPolicy::ZeroCounts => {
                warn!("Substituting zero counts for {} peak: {e}", peak.isotopologue_label);
                Ok(Some(CalibratedPeak { peak, counts: 0.0 }))
            }
        },
    }
}
