use std::io;
use std::path::PathBuf;

use clap::CommandFactory;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use isoxratioer::{IsoXRatioer, IsoXRatioerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

fn main() -> Result<(), IsoXRatioerError> {
    let matches = IsoXRatioer::command().get_matches();
    let driver: IsoXRatioer = IsoXRatioer::layered_config(&matches)?.extract()?;

    let (file_layer, _guard) = match driver.log_file.as_ref() {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .map(|s| s.to_os_string())
                .unwrap_or_else(|| "isoxratioer.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter()),
        )
        .with(file_layer)
        .init();

    if let Some(path) = driver.config_file.as_ref() {
        info!("Read configuration from {}", path.display());
    }
    driver.main()?;
    Ok(())
}
