pub mod app;
pub mod config;
pub mod display;
pub mod render;
pub mod sensors;
pub mod serial;
pub mod theme;

pub use sensors::ProviderError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration reached the core; fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Theme or one of its assets could not be loaded; fatal at startup.
    #[error("theme error: {0}")]
    Theme(String),
    #[error("sensor provider failed: {0}")]
    Provider(#[from] ProviderError),
    /// Handshake or encoding mismatch with the device.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no display found on {0}")]
    NoDeviceFound(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Errors that end the current connection and send the pipeline into reconnect.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_) | Error::Image(_))
    }
}
