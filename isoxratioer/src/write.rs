use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use isoxratio::{BatchTable, GroupedMeans};

use crate::driver::IsoXRatioerError;

fn is_stdout(path: &Path) -> bool {
    path == Path::new("-")
}

/// Open `path` for writing, or STDOUT if it is `-`
pub fn open_output(path: &Path) -> io::Result<Box<dyn Write>> {
    if is_stdout(path) {
        Ok(Box::new(io::BufWriter::new(io::stdout())))
    } else {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Box::new(io::BufWriter::new(fs::File::create(path)?)))
    }
}

pub fn write_batch_table(table: &BatchTable, path: &Path) -> Result<(), IsoXRatioerError> {
    table.write_csv(open_output(path)?)?;
    if !is_stdout(path) {
        info!("Wrote {} rows to {}", table.len(), path.display());
    }
    Ok(())
}

pub fn write_nested_json(table: &BatchTable, path: &Path) -> Result<(), IsoXRatioerError> {
    let mut handle = open_output(path)?;
    serde_json::to_writer_pretty(&mut handle, &table.to_nested())?;
    handle.flush()?;
    Ok(())
}

pub fn write_group_means(means: &GroupedMeans, path: &Path) -> Result<(), IsoXRatioerError> {
    means.write_csv(open_output(path)?)?;
    if !is_stdout(path) {
        info!("Wrote {} group means to {}", means.len(), path.display());
    }
    Ok(())
}

pub fn write_config<T: Serialize>(config: &T, path: &Path) -> Result<(), IsoXRatioerError> {
    let text = toml::to_string_pretty(config)?;
    let mut handle = open_output(path)?;
    handle.write_all(text.as_bytes())?;
    handle.flush()?;
    Ok(())
}
