use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use clap::parser::ValueSource;
use clap::{ArgMatches, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Value,
    Figment,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use isoxratio::{
    AcquisitionWindow, BatchAggregator, BatchReport, CalibrationParams, DomainErrorPolicy,
    FailurePolicy, FilterParams, IsoXError, IsoXProcessor, OutlierCull, ProcessingParams,
    WindowAxis,
};

use crate::args::{non_negative_float_f64, ArgDualInlet, ArgFragmentLabel, ArgMode};
use crate::discovery::{discover_fragment_folder, folder_name, DiscoveredFile, FragmentFolder};
use crate::progress::ProgressRecord;
use crate::time_range::TimeRange;
use crate::write::{write_batch_table, write_config, write_group_means, write_nested_json};

#[derive(Debug, Error)]
pub enum IsoXRatioerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error(transparent)]
    IsoX(#[from] IsoXError),
    #[error("Failed to write delimited text: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to write the configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Failed to read the configuration: {0}")]
    Config(#[from] figment::Error),
    #[error("Failed to create a thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Isotope ratio statistics for folders of IsoX exports.
///
/// Each input is a fragment folder holding one subfolder per file type (e.g. `Smp`
/// and `Std`) of IsoX exports, or a single export. Every export is merged into a
/// per-scan table, reduced to per-ratio summary statistics and written as one table.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct IsoXRatioer {
    /// The fragment folders or IsoX exports to process
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// The path to write the summary table to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write the summaries to as nested JSON, keyed by file, fragment and label
    #[arg(short = 'j', long = "json-output")]
    pub json_output: Option<PathBuf>,

    /// The path to write the mean of each fragment, label and file type to
    #[arg(short = 'm', long = "means-output")]
    pub means_output: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `isoxratioer.toml` in the working directory.
    /// Environment variables prefixed with `ISOXRATIOER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// Write the effective configuration to this path as TOML
    #[arg(long = "write-config")]
    pub write_config: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = -1)]
    pub threads: i32,

    /// The file name suffix of IsoX exports
    #[arg(short = 'e', long = "extension", default_value = ".isox")]
    pub extension: String,

    /// Whether to compute isotope ratios or relative abundances
    #[arg(long = "mode", default_value = "auto")]
    pub mode: ArgMode,

    /// Report every pair of isotopologues instead of only those with the most abundant one
    #[arg(short = 'a', long = "all-ratios")]
    pub all_ratios: bool,

    /// How to label the fragment of each file
    #[arg(short = 'f', long = "fragment-label", default_value = "folder")]
    pub fragment_label: ArgFragmentLabel,

    /// The retention time range to keep, denoted (start?)-(stop?)
    #[arg(
        short='r',
        long="time-range",
        value_parser=TimeRange::from_str,
        value_name="BEGIN-END",
        long_help=r#"The retention time range to keep in minutes, denoted (start?)-(stop?)

If a start is not specified, scans are kept from the start of the run.
If a stop is not specified, scans are kept until the end of the run.
"#
    )]
    pub time_range: Option<TimeRange>,

    /// The scan number range to keep, denoted (start?)-(stop?)
    #[arg(
        short = 's',
        long = "scan-range",
        value_parser = TimeRange::from_str,
        value_name = "BEGIN-END"
    )]
    pub scan_range: Option<TimeRange>,

    /// Keep only the observation periods of a dual inlet schedule, START,DEAD,OBSERVE,REPEATS in minutes
    #[arg(
        short = 'd',
        long = "dual-inlet",
        value_parser = ArgDualInlet::from_str,
        value_name = "START,DEAD,OBSERVE,REPEATS"
    )]
    pub dual_inlet: Option<ArgDualInlet>,

    /// The column to exclude outlying scans on, e.g. `13C/Unsub` or `total Counts`
    #[arg(short = 'c', long = "cull-on")]
    pub cull_on: Option<String>,

    /// The number of standard deviations from the mean beyond which a scan is an outlier
    #[arg(
        long = "cull-amount",
        default_value_t = 3.0,
        value_parser = non_negative_float_f64
    )]
    pub cull_amount: f64,

    /// Abort on the first file that fails instead of skipping it
    #[arg(long = "strict")]
    pub strict: bool,

    /// Treat peaks with non-positive noise, resolution or microscans as having zero counts
    #[arg(long = "zero-invalid-peaks")]
    pub zero_invalid_peaks: bool,

    /// Fail a file holding a peak with non-finite intensity or non-positive noise, resolution
    /// or microscans, instead of dropping that peak
    #[arg(long = "fail-invalid-peaks")]
    pub fail_invalid_peaks: bool,

    /// The calibration constants of the intensity to counts conversion, only settable
    /// through a configuration file
    #[arg(skip)]
    pub calibration: CalibrationParams,
}

impl Default for IsoXRatioer {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_file: PathBuf::from("-"),
            json_output: None,
            means_output: None,
            log_file: None,
            config_file: None,
            write_config: None,
            threads: -1,
            extension: ".isox".to_string(),
            mode: ArgMode::default(),
            all_ratios: false,
            fragment_label: ArgFragmentLabel::default(),
            time_range: None,
            scan_range: None,
            dual_inlet: None,
            cull_on: None,
            cull_amount: 3.0,
            strict: false,
            zero_invalid_peaks: false,
            fail_invalid_peaks: false,
            calibration: CalibrationParams::default(),
        }
    }
}

impl IsoXRatioer {
    /// Layer every configuration source, from lowest to highest precedence: defaults,
    /// `isoxratioer.toml`, `--config-file`, `ISOXRATIOER_` variables and the arguments
    /// actually given on the command line.
    pub fn layered_config(matches: &ArgMatches) -> Result<Figment, IsoXRatioerError> {
        let args = Self::from_arg_matches(matches)
            .map_err(|e| IsoXRatioerError::InvalidArguments(e.to_string()))?;
        let mut given = Value::serialize(&args)?.into_dict().unwrap_or_default();
        given.retain(|key, _| {
            matches.ids().any(|id| id.as_str() == key)
                && matches!(matches.value_source(key), Some(ValueSource::CommandLine))
        });

        let mut config = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("isoxratioer.toml"));
        if let Some(path) = args.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        Ok(config
            .merge(Env::prefixed("ISOXRATIOER_"))
            .merge(Serialized::defaults(given)))
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, IsoXRatioerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.strict {
            FailurePolicy::Strict
        } else {
            FailurePolicy::Continue
        }
    }

    pub fn filter_params(&self) -> Result<FilterParams, IsoXRatioerError> {
        let window: Option<AcquisitionWindow> = match (self.time_range, self.scan_range) {
            (Some(_), Some(_)) => {
                return Err(IsoXRatioerError::InvalidArguments(
                    "a time range and a scan range cannot be used together".to_string(),
                ))
            }
            (Some(t), None) => Some(t.to_window(WindowAxis::RetentionTime)),
            (None, Some(s)) => Some(s.to_window(WindowAxis::ScanNumber)),
            (None, None) => None,
        };
        let filters = FilterParams {
            window,
            dual_inlet: self.dual_inlet.map(|d| d.into()),
            outlier_cull: self
                .cull_on
                .as_ref()
                .map(|column| OutlierCull::new(column.clone(), self.cull_amount)),
        };
        filters.validate()?;
        Ok(filters)
    }

    pub fn processing_params(&self) -> Result<ProcessingParams, IsoXRatioerError> {
        Ok(ProcessingParams {
            calibration: self.calibration,
            domain_policy: match (self.zero_invalid_peaks, self.fail_invalid_peaks) {
                (true, true) => {
                    return Err(IsoXRatioerError::InvalidArguments(
                        "invalid peaks cannot be both zeroed and fatal".to_string(),
                    ))
                }
                (true, false) => DomainErrorPolicy::ZeroCounts,
                (false, true) => DomainErrorPolicy::Fail,
                (false, false) => DomainErrorPolicy::DropPeak,
            },
            mode: Default::default(),
            filters: self.filter_params()?,
        })
    }

    fn discover_input(&self, path: &Path) -> Result<FragmentFolder, IsoXRatioerError> {
        if path.is_dir() {
            return Ok(discover_fragment_folder(path, &self.extension)?);
        }
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
            .into());
        }
        // A lone export sits in a file type folder inside its fragment folder
        let type_folder = path.parent().unwrap_or(Path::new("."));
        let fragment_folder = type_folder.parent().unwrap_or(Path::new("."));
        Ok(FragmentFolder {
            path: fragment_folder.to_path_buf(),
            name: folder_name(fragment_folder),
            files: vec![DiscoveredFile {
                path: path.to_path_buf(),
                file_type: folder_name(type_folder),
            }],
        })
    }

    /// Process one fragment folder on the current thread pool
    fn process_folder(
        &self,
        folder: &FragmentFolder,
        base_params: &ProcessingParams,
    ) -> Result<(BatchReport, ProgressRecord), IsoXRatioerError> {
        let mode = self.mode.resolve(&folder.name, !self.all_ratios);
        info!(
            "Processing {} files of {} as {:?}",
            folder.files.len(),
            folder.name,
            mode.kind()
        );
        let processor = IsoXProcessor::new(base_params.clone().with_mode(mode))?;
        let aggregator = BatchAggregator::new(processor, self.failure_policy());
        let inputs = folder.batch_inputs(matches!(self.fragment_label, ArgFragmentLabel::Folder));

        let results: Vec<_> = inputs
            .par_iter()
            .map(|input| aggregator.process_input(input))
            .collect();

        let progress = results
            .iter()
            .map(|r| match r {
                Ok(processed) => ProgressRecord::from_processed(processed),
                Err(_) => ProgressRecord::failure(),
            })
            .fold(ProgressRecord::default(), |acc, p| acc + p);

        let report = aggregator.collate(&inputs, results)?;
        Ok((report, progress))
    }

    pub fn run(&self) -> Result<BatchReport, IsoXRatioerError> {
        let base_params = self.processing_params()?;
        let folders = self
            .inputs
            .iter()
            .map(|p| self.discover_input(p))
            .collect::<Result<Vec<_>, _>>()?;

        let n_files: usize = folders.iter().map(|f| f.files.len()).sum();
        if n_files == 0 {
            return Err(IsoXError::EmptyInput(format!(
                "no files ending with {} were found",
                self.extension
            ))
            .into());
        }

        let start = Instant::now();
        let mut report = BatchReport::default();
        let mut progress = ProgressRecord::default();
        for folder in folders.iter().filter(|f| !f.files.is_empty()) {
            let (folder_report, folder_progress) = self.process_folder(folder, &base_params)?;
            report.extend(folder_report);
            progress += folder_progress;
        }
        report.table.sort();

        info!(
            "Files: {} processed, {} failed",
            progress.files_processed, progress.files_failed
        );
        info!(
            "Scans: {} | Filled: {} | Removed: {}",
            progress.scans, progress.scans_filled, progress.scans_removed
        );
        info!(
            "Duplicate Peaks: {} | Dropped Peaks: {}",
            progress.duplicate_peaks, progress.dropped_peaks
        );
        for failure in report.failures.iter() {
            warn!("Skipped {}: {}", failure.path.display(), failure.message);
        }
        info!("Elapsed Time: {:0.3?}", Instant::now() - start);
        Ok(report)
    }

    pub fn main(&self) -> Result<(), IsoXRatioerError> {
        info!(
            "isoxratioer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        for input in self.inputs.iter() {
            info!("Input: {}", input.display());
        }
        info!("Output: {}", self.output_file.display());
        if let Some(path) = self.write_config.as_ref() {
            write_config(self, path)?;
        }

        let report = self.create_threadpool()?.install(|| self.run())?;

        write_batch_table(&report.table, &self.output_file)?;
        if let Some(path) = self.json_output.as_ref() {
            write_nested_json(&report.table, path)?;
        }
        if let Some(path) = self.means_output.as_ref() {
            write_group_means(&report.table.group_means(), path)?;
        }
        Ok(())
    }
}
