use std::fmt::Display;
use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use isoxratio::{AbundanceMode, DualInletSchedule};

/// The name of the fragment folder whose files are summarized as ratios under `auto` mode
pub const FULL_MOLECULAR_AVERAGE: &str = "full_molecular_average";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgMode {
    #[default]
    /// Ratios for a `full_molecular_average` folder, relative abundances otherwise
    Auto,
    /// Pairwise isotope ratios
    Ratio,
    /// Relative abundance of each isotopologue
    RelativeAbundance,
}

impl ArgMode {
    /// Pick the abundance mode for the fragment folder named `folder_name`
    pub fn resolve(&self, folder_name: &str, most_abundant_only: bool) -> AbundanceMode {
        let ratio = AbundanceMode::Ratio { most_abundant_only };
        match self {
            ArgMode::Auto => {
                if folder_name == FULL_MOLECULAR_AVERAGE {
                    ratio
                } else {
                    AbundanceMode::RelativeAbundance
                }
            }
            ArgMode::Ratio => ratio,
            ArgMode::RelativeAbundance => AbundanceMode::RelativeAbundance,
        }
    }
}

impl Display for ArgMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgFragmentLabel {
    #[default]
    /// Label each file's fragment with the name of its fragment folder
    Folder,
    /// Label each file's fragment with the median mass of its unsubstituted isotopologue
    Mass,
}

#[derive(Debug, Error)]
pub enum DualInletParseError {
    #[error("Expected four comma separated values START,DEAD,OBSERVE,REPEATS, found {0}")]
    WrongArity(usize),
    #[error("Failed to parse dual inlet timing {0}")]
    MalformedTime(ParseFloatError),
    #[error("Failed to parse dual inlet repetitions {0}")]
    MalformedRepetitions(ParseIntError),
}

/// A dual inlet timing schedule written `START,DEAD,OBSERVE,REPEATS`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArgDualInlet(pub DualInletSchedule);

impl FromStr for ArgDualInlet {
    type Err = DualInletParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split(',').map(|t| t.trim()).collect();
        if tokens.len() != 4 {
            return Err(DualInletParseError::WrongArity(tokens.len()));
        }
        let mut times = [0.0; 3];
        for (slot, tok) in times.iter_mut().zip(tokens.iter()) {
            *slot = tok.parse().map_err(DualInletParseError::MalformedTime)?;
        }
        let repetitions = tokens[3]
            .parse()
            .map_err(DualInletParseError::MalformedRepetitions)?;
        Ok(Self(DualInletSchedule::new(
            times[0],
            times[1],
            times[2],
            repetitions,
        )))
    }
}

impl From<ArgDualInlet> for DualInletSchedule {
    fn from(value: ArgDualInlet) -> Self {
        value.0
    }
}

pub(crate) fn non_negative_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}
