//! Port discovery, device handshake and reconnect with backoff.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    config::{Config, PortSetting, RevisionSetting},
    display::{DisplayDriver, DriverOptions, DriverState, Revision},
    render::Frame,
    serial::{
        telemetry::{BackoffLog, BackoffPhase},
        BackoffController, LinkFault, LinkSettings, NullLink, PortBackend, PortCandidate, SerialLink,
    },
    Error, Result,
};

use super::lifecycle::Shutdown;

const SIMULATED_PORT: &str = "simulated";

/// Lifecycle of one opened port. Only [`ConnectionManager`] moves it along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Discovered,
    Opened,
    Handshaked,
    Streaming,
    Closed,
    Faulted,
}

/// Exclusive owner of an open port and the driver session running on it.
pub struct SerialConnection {
    port: String,
    link: Box<dyn SerialLink>,
    driver: DisplayDriver,
    phase: ConnectionPhase,
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("port", &self.port)
            .field("phase", &self.phase)
            .field("driver", &self.driver)
            .finish()
    }
}

impl SerialConnection {
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn driver(&self) -> &DisplayDriver {
        &self.driver
    }

    pub fn revision(&self) -> Revision {
        self.driver.revision()
    }

    fn advance(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!("{}: {:?} -> {:?}", self.port, self.phase, phase);
            self.phase = phase;
        }
    }
}

/// Result of one step of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Connected,
    /// The attempt after waiting `delay` failed.
    Failed { delay: Duration },
    Cancelled,
}

/// Order candidates so ports whose USB identity hints at a revision come
/// first, and probe that revision first on them.
pub fn probe_plan(
    candidates: Vec<PortCandidate>,
    revisions: &[Revision],
) -> Vec<(PortCandidate, Vec<Revision>)> {
    let mut hinted = Vec::new();
    let mut rest = Vec::new();
    for candidate in candidates {
        let mut order = revisions.to_vec();
        let hint = candidate
            .usb
            .as_ref()
            .and_then(|usb| revisions.iter().copied().find(|rev| rev.matches_usb(usb)));
        match hint {
            Some(rev) => {
                order.retain(|r| *r != rev);
                order.insert(0, rev);
                hinted.push((candidate, order));
            }
            None => rest.push((candidate, order)),
        }
    }
    hinted.extend(rest);
    hinted
}

pub struct ConnectionManager {
    backend: Box<dyn PortBackend>,
    port: PortSetting,
    revisions: RevisionSetting,
    options: DriverOptions,
    link: LinkSettings,
    backoff: BackoffController,
    backoff_log: BackoffLog,
    shutdown: Shutdown,
    connection: Option<SerialConnection>,
    last_port: Option<String>,
    reconnect_attempts: u64,
}

impl ConnectionManager {
    pub fn new(
        config: &Config,
        backend: Box<dyn PortBackend>,
        options: DriverOptions,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let backoff_log = BackoffLog::open(config.connection.backoff_log.as_deref())?;
        Ok(Self {
            backend,
            port: config.display.port.clone(),
            revisions: config.display.revision,
            options,
            link: LinkSettings {
                baud: config.connection.baud,
                write_timeout: Duration::from_millis(config.connection.write_timeout_ms),
                hardware_flow_control: false,
            },
            backoff: BackoffController::new(
                config.connection.backoff_initial_ms,
                config.connection.backoff_max_ms,
            ),
            backoff_log,
            shutdown,
            connection: None,
            last_port: None,
            reconnect_attempts: 0,
        })
    }

    pub fn connection(&self) -> Option<&SerialConnection> {
        self.connection.as_ref()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.connection
            .as_ref()
            .map_or(ConnectionPhase::Closed, |c| c.phase)
    }

    pub fn driver_state(&self) -> DriverState {
        self.connection
            .as_ref()
            .map_or(DriverState::Disconnected, |c| c.driver.state())
    }

    /// Whether a frame handed over now would be transmitted.
    pub fn is_ready(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.phase != ConnectionPhase::Faulted && c.driver.state().accepts_frames())
    }

    /// Port of the current connection, or of the last one.
    pub fn port_name(&self) -> Option<&str> {
        self.connection
            .as_ref()
            .map(|c| c.port.as_str())
            .or(self.last_port.as_deref())
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    pub fn backoff(&self) -> &BackoffController {
        &self.backoff
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Open the configured port, or discover one, and complete the handshake.
    pub fn connect(&mut self) -> Result<()> {
        self.close();
        let connection = if self.revisions == RevisionSetting::Fixed(Revision::Simu) {
            self.open_simulated()?
        } else {
            match self.port.clone() {
                PortSetting::Path(port) => {
                    let order = self.revisions.probe_order();
                    self.probe_port(&port, &order)?
                }
                PortSetting::Auto => self.discover()?,
            }
        };
        info!(
            "connected to revision {} display on {}",
            connection.revision(),
            connection.port
        );
        self.last_port = Some(connection.port.clone());
        self.connection = Some(connection);
        Ok(())
    }

    fn open_simulated(&self) -> Result<SerialConnection> {
        let mut connection = SerialConnection {
            port: SIMULATED_PORT.to_string(),
            link: Box::new(NullLink::new(SIMULATED_PORT)),
            driver: DisplayDriver::new(Revision::Simu, self.options.clone()),
            phase: ConnectionPhase::Discovered,
        };
        connection.advance(ConnectionPhase::Opened);
        connection.driver.handshake(connection.link.as_mut())?;
        connection.advance(ConnectionPhase::Handshaked);
        Ok(connection)
    }

    fn discover(&mut self) -> Result<SerialConnection> {
        let candidates = self.backend.candidates()?;
        let count = candidates.len();
        debug!("auto-discovery over {count} candidate ports");
        let mut blocked = Vec::new();
        for (candidate, order) in probe_plan(candidates, &self.revisions.probe_order()) {
            if self.shutdown.is_triggered() {
                break;
            }
            match self.probe_port(&candidate.name, &order) {
                Ok(connection) => return Ok(connection),
                Err(err) if LinkFault::of(&err) == Some(LinkFault::Blocked) => {
                    warn!("{}: busy or not accessible, skipped ({err})", candidate.name);
                    blocked.push(candidate.name);
                }
                Err(err) => debug!("{}: no display ({err})", candidate.name),
            }
        }
        if blocked.is_empty() {
            Err(Error::NoDeviceFound(format!("{count} candidate ports")))
        } else {
            Err(Error::NoDeviceFound(format!(
                "{count} candidate ports, could not open {}",
                blocked.join(", ")
            )))
        }
    }

    /// Try each revision's handshake on `port`, reopening the port per attempt.
    fn probe_port(&self, port: &str, order: &[Revision]) -> Result<SerialConnection> {
        let mut last_err = Error::NoDeviceFound(port.to_string());
        for &revision in order {
            let driver = DisplayDriver::new(revision, self.options.clone());
            let settings = LinkSettings {
                hardware_flow_control: driver.capabilities().hardware_flow_control,
                ..self.link
            };
            let link = match self.backend.open(port, &settings) {
                Ok(link) => link,
                Err(err) => {
                    // the port itself is unusable, other revisions will not fare better
                    debug!("{port}: open failed: {err}");
                    return Err(err);
                }
            };
            let mut connection = SerialConnection {
                port: port.to_string(),
                link,
                driver,
                phase: ConnectionPhase::Discovered,
            };
            connection.advance(ConnectionPhase::Opened);
            match connection.driver.handshake(connection.link.as_mut()) {
                Ok(()) => {
                    connection.advance(ConnectionPhase::Handshaked);
                    return Ok(connection);
                }
                Err(err) => {
                    debug!("{port}: revision {revision} handshake failed: {err}");
                    connection.advance(ConnectionPhase::Closed);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Transmit a frame on the current connection. A failure marks the
    /// connection `Faulted`; the caller is expected to [`reconnect`](Self::reconnect).
    pub fn send_frame(&mut self, frame: &Frame) -> Result<bool> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::Protocol("no display connected".into()));
        };
        match connection.driver.send_frame(connection.link.as_mut(), frame) {
            Ok(sent) => {
                if sent {
                    connection.advance(ConnectionPhase::Streaming);
                }
                Ok(sent)
            }
            Err(err) => {
                match LinkFault::of(&err) {
                    Some(LinkFault::Gone) => warn!("{}: display went away: {err}", connection.port),
                    _ => warn!("{}: frame write failed: {err}", connection.port),
                }
                connection.driver.mark_faulted();
                connection.advance(ConnectionPhase::Faulted);
                Err(err)
            }
        }
    }

    pub fn set_brightness(&mut self, percent: i32) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::Protocol("no display connected".into()));
        };
        let result = connection
            .driver
            .set_brightness(connection.link.as_mut(), percent);
        if result.is_err() {
            connection.advance(ConnectionPhase::Faulted);
        }
        result
    }

    /// One reconnect step: close the port, wait the next backoff delay, try
    /// to connect once.
    pub fn reconnect_once(&mut self) -> Result<ReconnectOutcome> {
        self.close();
        if self.shutdown.is_triggered() {
            return Ok(ReconnectOutcome::Cancelled);
        }
        let delay = self.backoff.mark_failure(Instant::now());
        self.reconnect_attempts += 1;
        let attempt = self.backoff.failures();
        let port = self.port.to_string();
        self.record(BackoffPhase::Attempt, attempt, delay, &port);
        info!(
            "reconnect attempt {attempt} to {port} in {}",
            humantime::format_duration(delay)
        );
        if self.shutdown.wait(delay) {
            return Ok(ReconnectOutcome::Cancelled);
        }
        match self.connect() {
            Ok(()) => {
                self.backoff.mark_success(Instant::now());
                self.record(BackoffPhase::Success, attempt, delay, &port);
                Ok(ReconnectOutcome::Connected)
            }
            Err(err @ (Error::Config(_) | Error::Theme(_))) => Err(err),
            Err(err) => {
                let fault = LinkFault::of(&err);
                match fault {
                    Some(LinkFault::Blocked) => warn!(
                        "reconnect attempt {attempt}: {port} is held by another process \
                         or needs access rights: {err}"
                    ),
                    Some(LinkFault::Gone) => info!(
                        "reconnect attempt {attempt}: waiting for {port} to come back ({err})"
                    ),
                    _ => warn!("reconnect attempt {attempt} to {port} failed: {err}"),
                }
                self.record_fault(BackoffPhase::Failure, attempt, delay, &port, fault);
                Ok(ReconnectOutcome::Failed { delay })
            }
        }
    }

    /// Retry until connected or shutdown. Returns `false` when cancelled.
    pub fn reconnect(&mut self) -> Result<bool> {
        loop {
            match self.reconnect_once()? {
                ReconnectOutcome::Connected => return Ok(true),
                ReconnectOutcome::Cancelled => return Ok(false),
                ReconnectOutcome::Failed { .. } => continue,
            }
        }
    }

    /// Close the port and cancel pending reconnects. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        self.close();
    }

    fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.driver.disconnect();
            connection.advance(ConnectionPhase::Closed);
            info!("closed {}", connection.port);
        }
    }

    fn record(&self, phase: BackoffPhase, attempt: u64, delay: Duration, port: &str) {
        self.record_fault(phase, attempt, delay, port, None);
    }

    fn record_fault(
        &self,
        phase: BackoffPhase,
        attempt: u64,
        delay: Duration,
        port: &str,
        fault: Option<LinkFault>,
    ) {
        let max_ms = self.backoff.max_delay().as_millis() as u64;
        if let Err(err) = self.backoff_log.record(
            phase,
            attempt,
            delay.as_millis() as u64,
            max_ms,
            port,
            fault,
        ) {
            debug!("backoff log write failed: {err}");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
