//! Aggregating per-file summaries across a batch of acquisition files
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::IsoXError;
use crate::pipeline::{IsoXProcessor, ProcessedFile};
use crate::ratio::LabelKind;
use crate::stats;
use crate::summary::FragmentSummary;

/// The file type written when a file was not given one
pub const UNLABELED_FILE_TYPE: &str = "N/A";

/// One file to process as part of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInput {
    pub path: PathBuf,
    /// The sample/standard label of the file, e.g. `Smp` or `Std`
    pub file_type: Option<String>,
    /// The fragment label to report for the file instead of its median mass
    pub fragment: Option<String>,
}

impl BatchInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_type: None,
            fragment: None,
        }
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }
}

/// Label a list of paths positionally with `file_types`. Paths beyond the end of the
/// labels are left unlabeled.
pub fn label_inputs<P: AsRef<Path>>(paths: &[P], file_types: &[String]) -> Vec<BatchInput> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| BatchInput {
            path: path.as_ref().to_path_buf(),
            file_type: file_types.get(i).cloned(),
            fragment: None,
        })
        .collect()
}

/// What a batch does when one of its files fails
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Abort the batch with the first failure
    Strict,
    /// Record the failure and keep going
    #[default]
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub message: String,
}

/// One row of the batch output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "Fragment")]
    pub fragment: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(skip, default = "default_kind")]
    pub kind: LabelKind,
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "StdDev")]
    pub std_dev: f64,
    #[serde(rename = "StdError")]
    pub std_error: f64,
    #[serde(rename = "RelStdError")]
    pub rel_std_error: f64,
    #[serde(rename = "ShotNoise")]
    pub shot_noise: f64,
    #[serde(rename = "Tic")]
    pub tic: f64,
    #[serde(rename = "TicVar")]
    pub tic_variability: f64,
    #[serde(rename = "File Type")]
    pub file_type: String,
}

fn default_kind() -> LabelKind {
    LabelKind::IsotopeRatio
}

impl BatchRow {
    pub fn from_summary(file_name: &str, file_type: Option<&str>, summary: &FragmentSummary) -> Self {
        Self {
            file_name: file_name.to_string(),
            fragment: summary.fragment.clone(),
            label: summary.label.clone(),
            kind: summary.kind,
            average: summary.average,
            std_dev: summary.std_dev,
            std_error: summary.std_error,
            rel_std_error: summary.rel_std_error,
            shot_noise: summary.shot_noise_limit,
            tic: summary.tic,
            tic_variability: summary.tic_variability,
            file_type: file_type.unwrap_or(UNLABELED_FILE_TYPE).to_string(),
        }
    }

    fn numeric_fields(&self) -> [f64; 7] {
        [
            self.average,
            self.std_dev,
            self.std_error,
            self.rel_std_error,
            self.shot_noise,
            self.tic,
            self.tic_variability,
        ]
    }
}

/// The statistics of one label of one fragment of one file in the nested view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NestedSummary {
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "StdDev")]
    pub std_dev: f64,
    #[serde(rename = "StdError")]
    pub std_error: f64,
    #[serde(rename = "RelStdError")]
    pub rel_std_error: f64,
    #[serde(rename = "ShotNoise")]
    pub shot_noise: f64,
}

/// file name -> fragment -> label -> statistics
pub type NestedSummaries = IndexMap<String, IndexMap<String, IndexMap<String, NestedSummary>>>;

/// The per-file summaries of a batch, one row per (file, fragment, label)
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTable {
    pub rows: Vec<BatchRow>,
}

const LEADING_COLUMNS: [&str; 2] = ["FileName", "Fragment"];
const TRAILING_COLUMNS: [&str; 8] = [
    "Average",
    "StdDev",
    "StdError",
    "RelStdError",
    "ShotNoise",
    "Tic",
    "TicVar",
    "File Type",
];

/// The label columns to write for rows of `kinds`, an isotope ratio column if there are none
fn label_columns(kinds: impl Iterator<Item = LabelKind>) -> Vec<LabelKind> {
    let mut kinds: Vec<LabelKind> = kinds.collect();
    kinds.sort();
    kinds.dedup();
    if kinds.is_empty() {
        vec![LabelKind::IsotopeRatio]
    } else {
        kinds
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

impl BatchTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchRow> {
        self.rows.iter()
    }

    pub fn push_file(&mut self, file_name: &str, file_type: Option<&str>, summaries: &[FragmentSummary]) {
        self.rows.extend(
            summaries
                .iter()
                .map(|s| BatchRow::from_summary(file_name, file_type, s)),
        );
    }

    pub fn extend(&mut self, other: BatchTable) {
        self.rows.extend(other.rows);
    }

    /// Order rows by fragment, then by label, keeping file order among equals
    pub fn sort(&mut self) {
        self.rows.sort_by(|a, b| {
            a.fragment
                .cmp(&b.fragment)
                .then_with(|| a.label.cmp(&b.label))
        });
    }

    /// The distinct kinds of label in the table, in sorted order
    pub fn kinds(&self) -> Vec<LabelKind> {
        let mut kinds: Vec<LabelKind> = self.rows.iter().map(|r| r.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    fn label_columns(&self) -> Vec<LabelKind> {
        label_columns(self.rows.iter().map(|r| r.kind))
    }

    /// Write the table as comma separated text.
    ///
    /// The label column is headed `IsotopeRatio` or `MN Relative Abundance` after the kind
    /// of its labels. A table mixing both kinds gets one column per kind, left blank on
    /// rows of the other kind.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), IsoXError> {
        let label_columns = self.label_columns();
        let mut writer = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = LEADING_COLUMNS.to_vec();
        header.extend(label_columns.iter().map(|k| k.header()));
        header.extend(TRAILING_COLUMNS);
        writer.write_record(&header)?;

        for row in self.rows.iter() {
            let mut record: Vec<String> = vec![row.file_name.clone(), row.fragment.clone()];
            for kind in label_columns.iter() {
                if *kind == row.kind {
                    record.push(row.label.clone());
                } else {
                    record.push(String::new());
                }
            }
            record.extend(row.numeric_fields().into_iter().map(format_value));
            record.push(row.file_type.clone());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Regroup the table as file -> fragment -> label -> statistics
    pub fn to_nested(&self) -> NestedSummaries {
        let mut nested = NestedSummaries::new();
        for row in self.rows.iter() {
            nested
                .entry(row.file_name.clone())
                .or_default()
                .entry(row.fragment.clone())
                .or_default()
                .insert(
                    row.label.clone(),
                    NestedSummary {
                        average: row.average,
                        std_dev: row.std_dev,
                        std_error: row.std_error,
                        rel_std_error: row.rel_std_error,
                        shot_noise: row.shot_noise,
                    },
                );
        }
        nested
    }

    /// Average every numeric column over the files sharing a fragment, label and file type
    pub fn group_means(&self) -> GroupedMeans {
        let mut groups: BTreeMap<(String, String, String), Vec<&BatchRow>> = BTreeMap::new();
        for row in self.rows.iter() {
            groups
                .entry((row.fragment.clone(), row.label.clone(), row.file_type.clone()))
                .or_default()
                .push(row);
        }
        let rows = groups
            .into_iter()
            .map(|((fragment, label, file_type), members)| {
                let column = |f: fn(&BatchRow) -> f64| {
                    let values: Vec<f64> = members.iter().map(|r| f(r)).collect();
                    stats::mean(&values)
                };
                GroupedMean {
                    fragment,
                    label,
                    kind: members[0].kind,
                    file_type,
                    average: column(|r| r.average),
                    std_dev: column(|r| r.std_dev),
                    std_error: column(|r| r.std_error),
                    rel_std_error: column(|r| r.rel_std_error),
                    shot_noise: column(|r| r.shot_noise),
                    tic: column(|r| r.tic),
                    tic_variability: column(|r| r.tic_variability),
                    n_files: members.len(),
                }
            })
            .collect();
        GroupedMeans { rows }
    }
}

impl<'a> IntoIterator for &'a BatchTable {
    type Item = &'a BatchRow;

    type IntoIter = std::slice::Iter<'a, BatchRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// The mean statistics of the files sharing a fragment, label and file type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedMean {
    #[serde(rename = "Fragment")]
    pub fragment: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(skip, default = "default_kind")]
    pub kind: LabelKind,
    #[serde(rename = "File Type")]
    pub file_type: String,
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "StdDev")]
    pub std_dev: f64,
    #[serde(rename = "StdError")]
    pub std_error: f64,
    #[serde(rename = "RelStdError")]
    pub rel_std_error: f64,
    #[serde(rename = "ShotNoise")]
    pub shot_noise: f64,
    #[serde(rename = "Tic")]
    pub tic: f64,
    #[serde(rename = "TicVar")]
    pub tic_variability: f64,
    #[serde(rename = "Files")]
    pub n_files: usize,
}

/// A mean ratio or relative abundance with its relative standard error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioEstimate {
    pub average: f64,
    pub rel_std_error: f64,
}

/// A sample measurement relative to a standard, in per mil
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStandardComparison {
    /// `1000 * (sample / standard - 1)`
    pub delta: f64,
    /// The sample and standard relative standard errors added in quadrature
    pub relative_error: f64,
}

/// [`GroupedMean`] rows ordered by fragment, label and file type
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedMeans {
    pub rows: Vec<GroupedMean>,
}

impl GroupedMeans {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, fragment: &str, label: &str, file_type: &str) -> Option<&GroupedMean> {
        self.rows
            .iter()
            .find(|r| r.fragment == fragment && r.label == label && r.file_type == file_type)
    }

    pub fn lookup(&self, fragment: &str, label: &str, file_type: &str) -> Option<RatioEstimate> {
        self.get(fragment, label, file_type).map(|r| RatioEstimate {
            average: r.average,
            rel_std_error: r.rel_std_error,
        })
    }

    pub fn compare_sample_standard(
        &self,
        fragment: &str,
        label: &str,
        sample: &str,
        standard: &str,
    ) -> Option<SampleStandardComparison> {
        let smp = self.lookup(fragment, label, sample)?;
        let std = self.lookup(fragment, label, standard)?;
        Some(SampleStandardComparison {
            delta: 1000.0 * (smp.average / std.average - 1.0),
            relative_error: (smp.rel_std_error.powi(2) + std.rel_std_error.powi(2)).sqrt(),
        })
    }

    /// Write the means as comma separated text, heading the label columns the way
    /// [`BatchTable::write_csv`] does
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), IsoXError> {
        let label_columns = label_columns(self.rows.iter().map(|r| r.kind));
        let mut writer = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = vec!["Fragment"];
        header.extend(label_columns.iter().map(|k| k.header()));
        header.extend(TRAILING_COLUMNS);
        header.push("Files");
        writer.write_record(&header)?;

        for row in self.rows.iter() {
            let mut record: Vec<String> = vec![row.fragment.clone()];
            for kind in label_columns.iter() {
                if *kind == row.kind {
                    record.push(row.label.clone());
                } else {
                    record.push(String::new());
                }
            }
            record.extend(
                [
                    row.average,
                    row.std_dev,
                    row.std_error,
                    row.rel_std_error,
                    row.shot_noise,
                    row.tic,
                    row.tic_variability,
                ]
                .into_iter()
                .map(format_value),
            );
            record.push(row.file_type.clone());
            record.push(row.n_files.to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// The collected results of a batch
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    pub table: BatchTable,
    pub files: IndexMap<PathBuf, ProcessedFile>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn extend(&mut self, other: BatchReport) {
        self.table.extend(other.table);
        self.files.extend(other.files);
        self.failures.extend(other.failures);
    }
}

/// Gather the results of processing `inputs`, in input order.
///
/// # Errors
/// [`IsoXError::EmptyInput`] if there are no inputs, and the first failure in input order
/// under [`FailurePolicy::Strict`].
pub fn collate_batch(
    inputs: &[BatchInput],
    results: impl IntoIterator<Item = Result<ProcessedFile, IsoXError>>,
    policy: FailurePolicy,
) -> Result<BatchReport, IsoXError> {
    if inputs.is_empty() {
        return Err(IsoXError::EmptyInput("no files in batch".to_string()));
    }
    let mut report = BatchReport::default();
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(processed) => {
                let file_name = input.path.display().to_string();
                report.table.push_file(
                    &file_name,
                    input.file_type.as_deref(),
                    &processed.summaries,
                );
                report.files.insert(input.path.clone(), processed);
            }
            Err(e) => match policy {
                FailurePolicy::Strict => return Err(e),
                FailurePolicy::Continue => {
                    error!("Failed to process {}: {e}", input.path.display());
                    report.failures.push(BatchFailure {
                        path: input.path.clone(),
                        message: e.to_string(),
                    });
                }
            },
        }
    }
    report.table.sort();
    Ok(report)
}

/// Runs an [`IsoXProcessor`] over every file of a batch
#[derive(Debug, Clone)]
pub struct BatchAggregator {
    pub processor: IsoXProcessor,
    pub failure_policy: FailurePolicy,
}

impl BatchAggregator {
    pub fn new(processor: IsoXProcessor, failure_policy: FailurePolicy) -> Self {
        Self {
            processor,
            failure_policy,
        }
    }

    pub fn process_input(&self, input: &BatchInput) -> Result<ProcessedFile, IsoXError> {
        self.processor
            .process_path(&input.path, input.fragment.as_deref())
    }

    pub fn collate(
        &self,
        inputs: &[BatchInput],
        results: impl IntoIterator<Item = Result<ProcessedFile, IsoXError>>,
    ) -> Result<BatchReport, IsoXError> {
        collate_batch(inputs, results, self.failure_policy)
    }

    /// Process every input in order
    pub fn run(&self, inputs: &[BatchInput]) -> Result<BatchReport, IsoXError> {
        if inputs.is_empty() {
            return Err(IsoXError::EmptyInput("no files in batch".to_string()));
        }
        let strict = matches!(self.failure_policy, FailurePolicy::Strict);
        // Under the strict policy nothing after the first failure needs to be read
        let mut failed = false;
        let results: Vec<_> = inputs
            .iter()
            .map_while(|input| {
                if failed {
                    return None;
                }
                let result = self.process_input(input);
                failed = strict && result.is_err();
                Some(result)
            })
            .collect();
        let report = self.collate(inputs, results)?;
        info!(
            "Processed {} of {} files",
            report.files.len(),
            inputs.len()
        );
        Ok(report)
    }
}
