//! Daemon wiring: connection management, the render/display pipeline,
//! lifecycle and logging.

use std::time::Duration;

use log::{debug, info};

use crate::{config::Config, theme::Theme, Result};

pub mod connection;
pub mod lifecycle;
pub mod logger;
pub mod pipeline;
pub mod status;

pub use connection::{ConnectionManager, ConnectionPhase, ReconnectOutcome, SerialConnection};
pub use lifecycle::Shutdown;
pub use pipeline::{Pipeline, STOP_TIMEOUT};
pub use status::{LinkStatus, PipelineStatus};

/// How often the running daemon logs its status at debug level.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Run until ctrl-c. Configuration must already be validated.
pub fn run(config: Config) -> Result<()> {
    let theme = Theme::load(&config.theme.directory, &config.theme.name)?;
    info!(
        "smartscreen {} starting (theme {}, port {}, revision {})",
        env!("CARGO_PKG_VERSION"),
        theme.name,
        config.display.port,
        String::from(config.display.revision)
    );
    let mut pipeline = Pipeline::from_config(config, theme)?;
    let shutdown = pipeline.shutdown_handle();
    lifecycle::install_ctrlc(&shutdown)?;
    pipeline.start()?;

    while !shutdown.wait(STATUS_INTERVAL) {
        debug!("status {}", pipeline.status().to_json());
    }
    pipeline.stop(STOP_TIMEOUT);
    Ok(())
}
