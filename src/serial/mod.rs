pub mod backoff;
pub mod fake;
pub mod sync;
pub mod telemetry;

pub use backoff::BackoffController;
pub use sync::{SerialPortLink, SystemPorts};

use crate::Error;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

/// Byte pipe to an opened display. Only the connection that owns it writes.
pub trait SerialLink: Send {
    fn port_name(&self) -> &str;

    /// Write every byte or fail once the configured write timeout elapses.
    fn write_all(&mut self, bytes: &[u8]) -> crate::Result<()>;

    /// Fill `buf` completely or fail with `TimedOut` after `timeout`.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> crate::Result<()>;

    /// Drop any unread input so a stale reply cannot satisfy the next request.
    fn discard_input(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Settings used when opening a port; some revisions need hardware flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud: u32,
    pub write_timeout: Duration,
    pub hardware_flow_control: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud: crate::config::DEFAULT_BAUD,
            write_timeout: Duration::from_millis(crate::config::DEFAULT_WRITE_TIMEOUT_MS),
            hardware_flow_control: false,
        }
    }
}

/// USB identity of a candidate port, used to order discovery probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub usb: Option<UsbIdentity>,
}

impl PortCandidate {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usb: None,
        }
    }
}

/// Source of serial ports: the OS in production, scripted devices in tests.
pub trait PortBackend: Send {
    fn candidates(&self) -> crate::Result<Vec<PortCandidate>>;

    fn open(&self, port: &str, settings: &LinkSettings) -> crate::Result<Box<dyn SerialLink>>;
}

/// Link for the simulated display: writes vanish and nothing ever answers.
#[derive(Debug)]
pub struct NullLink {
    name: String,
    written: u64,
}

impl NullLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl SerialLink for NullLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> crate::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        Err(Error::Io(std::io::Error::new(
            ErrorKind::TimedOut,
            format!("{}: nothing to read", self.name),
        )))
    }
}

/// What a failed open, handshake or write means for the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFault {
    /// Port vanished or the device dropped off mid-write.
    Gone,
    /// Port is listed but held by another process or not accessible to us.
    Blocked,
    /// Port opened but nothing answered in a known revision's dialect.
    Silent,
}

impl LinkFault {
    /// `None` for errors that have nothing to do with the serial link.
    pub fn of(err: &Error) -> Option<LinkFault> {
        match err {
            Error::Io(io) => Some(Self::of_io(io)),
            Error::Protocol(_) => Some(LinkFault::Silent),
            Error::NoDeviceFound(_) => Some(LinkFault::Gone),
            Error::Config(_) | Error::Theme(_) | Error::Provider(_) | Error::Image(_) => None,
        }
    }

    fn of_io(err: &std::io::Error) -> LinkFault {
        // EBUSY
        if err.kind() == ErrorKind::PermissionDenied || err.raw_os_error() == Some(16) {
            return LinkFault::Blocked;
        }
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => LinkFault::Silent,
            _ => LinkFault::Gone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkFault::Gone => "gone",
            LinkFault::Blocked => "blocked",
            LinkFault::Silent => "silent",
        }
    }
}

impl fmt::Display for LinkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io(kind: ErrorKind) -> Error {
        Error::Io(std::io::Error::new(kind, "x"))
    }

    #[test]
    fn unplugged_ports_are_gone() {
        assert_eq!(LinkFault::of(&io(ErrorKind::NotFound)), Some(LinkFault::Gone));
        assert_eq!(LinkFault::of(&io(ErrorKind::BrokenPipe)), Some(LinkFault::Gone));
        assert_eq!(
            LinkFault::of(&Error::Io(std::io::Error::from_raw_os_error(5))),
            Some(LinkFault::Gone)
        );
    }

    #[test]
    fn busy_or_denied_ports_are_blocked() {
        assert_eq!(LinkFault::of(&io(ErrorKind::PermissionDenied)), Some(LinkFault::Blocked));
        assert_eq!(
            LinkFault::of(&Error::Io(std::io::Error::from_raw_os_error(16))),
            Some(LinkFault::Blocked)
        );
    }

    #[test]
    fn timeouts_and_bad_replies_are_silent() {
        assert_eq!(LinkFault::of(&io(ErrorKind::TimedOut)), Some(LinkFault::Silent));
        assert_eq!(
            LinkFault::of(&Error::Protocol("bad hello".into())),
            Some(LinkFault::Silent)
        );
    }

    #[test]
    fn config_errors_are_not_link_faults() {
        assert_eq!(LinkFault::of(&Error::Config("bad".into())), None);
    }

    #[test]
    fn null_link_swallows_writes() {
        let mut link = NullLink::new("simulated");
        link.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(link.bytes_written(), 3);
        link.read_exact_timeout(&mut [], Duration::ZERO).unwrap();
        assert!(link.read_exact_timeout(&mut [0; 1], Duration::ZERO).is_err());
    }
}
