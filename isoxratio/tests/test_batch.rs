use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use isoxratio::{
    AbundanceMode, BatchAggregator, BatchInput, DomainErrorPolicy, FailurePolicy, FilterParams,
    IsoXError, IsoXProcessor, OutlierCull, ProcessingParams,
};

const HEADER: &str = "filename\tscan.no\ttime.min\tcompound\tisotopolog\tions.incremental\ttic\tit.ms\tresolution\tpeakResolution\tbasePeakIntensity\trawOvFtT\tintensCompFactor\tagc\tagcTarget\tmicroscans\tnumberLockmassesFound\tanalyzerTemperature\tmzMeasured\tintensity\tpeakNoise";

fn render_isox(peaks: &[(&str, u32, f64)]) -> String {
    let mut buf = String::from(HEADER);
    for (label, scan, intensity) in peaks {
        let mass = if *label == "M0" { 119.05 } else { 120.05 };
        buf.push_str(&format!(
            "\nrun.raw\t{scan}\t{rt}\tmethionine\t{label}\t10\t2e8\t20\t120000\t119000\t1e7\t0\t1\t1e5\t2e5\t1\t1\t30\t{mass}\t{intensity}\t10",
            rt = *scan as f64 * 0.01,
        ));
    }
    buf
}

fn write_isox(path: &Path, peaks: &[(&str, u32, f64)]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_isox(peaks))
}

fn steady_peaks(c13: f64) -> Vec<(&'static str, u32, f64)> {
    (1..=10)
        .flat_map(|scan| [("M0", scan, 1000.0), ("13C", scan, c13)])
        .collect()
}

#[test_log::test]
fn test_single_file_with_gap() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("gap.isox");
    write_isox(
        &path,
        &[
            ("M0", 1, 1000.0),
            ("M0", 2, 1000.0),
            ("M0", 4, 1000.0),
            ("13C", 2, 100.0),
            ("13C", 3, 100.0),
            ("13C", 4, 100.0),
        ],
    )?;
    let processor = IsoXProcessor::new(ProcessingParams::default())?;
    let processed = processor.process_path(&path, None)?;
    let merged = &processed.table.merged;
    assert_eq!(merged.scan_numbers(), vec![1, 2, 3, 4]);
    assert_eq!(merged.counts("Unsub").unwrap()[2], 0.0);
    assert_eq!(merged.counts("13C").unwrap()[0], 0.0);

    let summary = &processed.summaries[0];
    assert_eq!(summary.label, "13C/Unsub");
    assert_eq!(summary.fragment, "119.0");
    assert_eq!(summary.n_scans, 4);
    Ok(())
}

#[test_log::test]
fn test_gzip_input() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("steady.isox.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&path)?, Compression::default());
    encoder.write_all(render_isox(&steady_peaks(100.0)).as_bytes())?;
    encoder.finish()?;

    let records = isoxratio::read_isox_path(&path)?;
    assert_eq!(records.len(), 20);
    Ok(())
}

fn make_batch(root: &Path) -> io::Result<Vec<BatchInput>> {
    let smp = root.join("119").join("Smp").join("a.isox");
    let std = root.join("119").join("Std").join("b.isox");
    let bad = root.join("119").join("Smp").join("c.isox");
    write_isox(&smp, &steady_peaks(110.0))?;
    write_isox(&std, &steady_peaks(100.0))?;
    fs::write(&bad, "not\tan\tisox\tfile\n")?;
    Ok(vec![
        BatchInput::new(smp).with_file_type("Smp").with_fragment("119"),
        BatchInput::new(std).with_file_type("Std").with_fragment("119"),
        BatchInput::new(bad).with_file_type("Smp").with_fragment("119"),
    ])
}

#[test_log::test]
fn test_batch_continue() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let inputs = make_batch(dir.path())?;
    let aggregator = BatchAggregator::new(
        IsoXProcessor::new(ProcessingParams::default())?,
        FailurePolicy::Continue,
    );
    let report = aggregator.run(&inputs)?;
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, inputs[2].path);
    assert!(report.failures[0].message.contains("scan.no"));

    assert_eq!(report.table.len(), 2);
    let means = report.table.group_means();
    let cmp = means
        .compare_sample_standard("119", "13C/Unsub", "Smp", "Std")
        .unwrap();
    assert!((cmp.delta - 100.0).abs() < 1e-6);

    let nested = report.table.to_nested();
    let key = inputs[0].path.display().to_string();
    assert!((nested[&key]["119"]["13C/Unsub"].average - 0.11).abs() < 1e-12);
    Ok(())
}

#[test_log::test]
fn test_batch_strict() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let inputs = make_batch(dir.path())?;
    let aggregator = BatchAggregator::new(
        IsoXProcessor::new(ProcessingParams::default())?,
        FailurePolicy::Strict,
    );
    assert!(matches!(aggregator.run(&inputs), Err(IsoXError::Parse(_))));

    let missing: Vec<BatchInput> = vec![BatchInput::new(PathBuf::from("not_real.isox"))];
    assert!(matches!(aggregator.run(&missing), Err(IsoXError::IOError(_))));
    assert!(matches!(aggregator.run(&[]), Err(IsoXError::EmptyInput(_))));
    Ok(())
}

#[test_log::test]
fn test_relative_abundance_with_cull() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("spiky.isox");
    let mut peaks = steady_peaks(100.0);
    peaks.push(("D", 5, 5000.0));
    write_isox(&path, &peaks)?;

    let params = ProcessingParams::default()
        .with_mode(AbundanceMode::RelativeAbundance)
        .with_filters(FilterParams {
            outlier_cull: Some(OutlierCull::new("total Counts", 2.0)),
            ..Default::default()
        });
    let processed = IsoXProcessor::new(params)?.process_path(&path, Some("full"))?;
    assert_eq!(processed.scans_removed, 1);
    assert_eq!(processed.table.len(), 9);
    let labels: Vec<_> = processed
        .summaries
        .iter()
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(labels, vec!["13C", "D", "Unsub"]);
    let total: f64 = processed.summaries.iter().map(|s| s.average).sum();
    assert!((total - 1.0).abs() < 1e-12);
    Ok(())
}

#[test_log::test]
fn test_invalid_peak_is_dropped() -> Result<(), IsoXError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("noisy.isox");
    // Scan 3's M0 peak reports zero noise
    let text: Vec<String> = render_isox(&steady_peaks(100.0))
        .lines()
        .map(|line| {
            if line.starts_with("run.raw\t3\t") && line.contains("\tM0\t") {
                format!("{}\t0", line.trim_end_matches("\t10"))
            } else {
                line.to_string()
            }
        })
        .collect();
    fs::write(&path, text.join("\n"))?;

    let processor = IsoXProcessor::new(ProcessingParams::default())?;
    let processed = processor.process_path(&path, None)?;
    let merged = &processed.table.merged;
    assert_eq!(merged.len(), 10);
    assert_eq!(merged.statistics.dropped_peaks, 1);
    assert_eq!(merged.counts("Unsub").unwrap()[2], 0.0);
    assert_eq!(processed.summaries[0].n_scans, 10);

    let strict = IsoXProcessor::new(ProcessingParams {
        domain_policy: DomainErrorPolicy::Fail,
        ..Default::default()
    })?;
    assert!(matches!(
        strict.process_path(&path, None),
        Err(IsoXError::Domain(_))
    ));
    Ok(())
}
