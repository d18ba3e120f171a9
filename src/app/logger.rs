use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    str::FromStr,
};

use log::LevelFilter;

use crate::{Error, Result};

/// Overrides the configured level when set.
pub const LOG_LEVEL_ENV: &str = "SMARTSCREEN_LOG_LEVEL";

/// Copies every record to stderr and appends it to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Level precedence: environment, then configuration.
pub fn effective_level(configured: &str) -> Result<LevelFilter> {
    let env = std::env::var(LOG_LEVEL_ENV).ok();
    let raw = env
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(configured);
    LevelFilter::from_str(raw.trim())
        .map_err(|_| Error::Config(format!("unknown log level '{raw}'")))
}

/// Install the global logger. Later calls keep the first logger.
pub fn init_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = effective_level(level)?;
    let mut builder = env_logger::Builder::new();
    builder.filter_level(filter).format_timestamp_millis();
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    if let Some(path) = file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }
    if builder.try_init().is_err() {
        log::debug!("logger already installed");
    }
    Ok(())
}
