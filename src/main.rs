use std::path::PathBuf;

use clap::Parser;
use smartscreen::{
    app::{self, logger},
    config::{Config, PortSetting, RevisionSetting},
    Error, Result,
};

/// Hardware monitor for USB serial LCD panels.
#[derive(Debug, Parser)]
#[command(name = "smartscreen", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Theme name under the theme directory.
    #[arg(long)]
    theme: Option<String>,

    /// Serial device path, or `auto` to scan.
    #[arg(long, value_name = "PATH|auto")]
    port: Option<String>,

    /// Display revision: A, B, C, D, SIMU or auto.
    #[arg(long)]
    revision: Option<String>,

    /// error, warn, info, debug or trace.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(theme) = self.theme {
            config.theme.name = theme;
        }
        if let Some(port) = self.port {
            config.display.port = PortSetting::try_from(port).map_err(Error::Config)?;
        }
        if let Some(revision) = self.revision {
            config.display.revision = RevisionSetting::try_from(revision).map_err(Error::Config)?;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        config.validate()
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_default()?,
    };
    cli.apply(&mut config)?;
    logger::init_logging(&config.log.level, config.log.file.as_deref())?;
    app::run(config)
}
