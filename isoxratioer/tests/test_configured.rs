use std::{error::Error, fs, path::Path};

use figment::{
    providers::{Format, Toml},
    Figment,
};

const HEADER: &str = "filename\tscan.no\ttime.min\tcompound\tisotopolog\tions.incremental\ttic\tit.ms\tresolution\tpeakResolution\tbasePeakIntensity\trawOvFtT\tintensCompFactor\tagc\tagcTarget\tmicroscans\tnumberLockmassesFound\tanalyzerTemperature\tmzMeasured\tintensity\tpeakNoise";

fn write_isox(path: &Path, outlier_scan: u32) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut buf = String::from(HEADER);
    for scan in 1..=10 {
        let c13 = if scan == outlier_scan { 500.0 } else { 100.0 };
        for (label, mass, intensity) in [("M0", 119.05, 1000.0), ("13C", 120.05, c13)] {
            buf.push_str(&format!(
                "\nrun.raw\t{scan}\t{rt}\tmethionine\t{label}\t10\t2e8\t20\t120000\t119000\t1e7\t0\t1\t1e5\t2e5\t1\t1\t30\t{mass}\t{intensity}\t10",
                rt = scan as f64 * 0.01,
            ));
        }
    }
    fs::write(path, buf)?;
    Ok(())
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_configured_cull() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("119");
    write_isox(&root.join("Smp").join("a.isox"), 5)?;
    let output = dir.path().join("summary.csv");
    let written_config = dir.path().join("effective.toml");

    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
inputs = [{root:?}]
output_file = {output:?}
write_config = {written_config:?}
threads = 2
mode = "ratio"
cull_on = "13C/Unsub"
cull_amount = 2.0

[calibration]
reference_resolution = 120000.0
cn = 3.0
charge = 1
"#,
            root = root.display().to_string(),
            output = output.display().to_string(),
            written_config = written_config.display().to_string(),
        ),
    )?;

    let config = Figment::new().merge(Toml::file_exact(&config_path));
    let driver: isoxratioer::IsoXRatioer = config.extract()?;
    assert_eq!(driver.mode, isoxratioer::ArgMode::Ratio);
    assert_eq!(driver.extension, ".isox");
    assert!((driver.calibration.cn - 3.0).abs() < 1e-12);
    driver.main()?;

    let table = fs::read_to_string(&output)?;
    let row: Vec<&str> = table
        .lines()
        .nth(1)
        .map(|line| line.split(',').collect())
        .unwrap_or_default();
    assert_eq!(row[1], "119");
    assert_eq!(row[2], "13C/Unsub");
    let average: f64 = row[3].parse()?;
    assert!((average - 0.1).abs() < 1e-9);
    let std_dev: f64 = row[4].parse()?;
    assert!(std_dev.abs() < 1e-9);

    let reread: isoxratioer::IsoXRatioer =
        Figment::new().merge(Toml::file_exact(&written_config)).extract()?;
    assert_eq!(reread.cull_on.as_deref(), Some("13C/Unsub"));
    assert_eq!(reread.inputs, driver.inputs);
    Ok(())
}
