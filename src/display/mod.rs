pub mod protocol;
pub mod rev_a;
pub mod rev_b;
pub mod rev_c;
pub mod rev_d;
pub mod simulated;

pub use protocol::Protocol;

use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    time::{Duration, SystemTime},
};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    config::{Config, DEFAULT_BRIGHTNESS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_SIMULATED_OUTPUT},
    render::{Frame, Rect},
    serial::{SerialLink, UsbIdentity},
    theme::Orientation,
    Error, Result,
};

/// Hardware/protocol variant of the attached panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Revision {
    A,
    B,
    C,
    D,
    #[serde(rename = "SIMU")]
    Simu,
}

impl Revision {
    /// Revisions reachable over a serial port, in discovery probe order.
    pub const SERIAL: [Revision; 4] = [Revision::A, Revision::B, Revision::C, Revision::D];

    pub fn is_simulated(&self) -> bool {
        matches!(self, Revision::Simu)
    }

    /// True when the USB descriptor is one this revision is known to ship with.
    pub fn matches_usb(&self, usb: &UsbIdentity) -> bool {
        let serial = usb.serial_number.as_deref().unwrap_or_default();
        match self {
            Revision::A => serial == "USB35INCHIPSV2",
            Revision::B => usb.vid == 0x1a86 && usb.pid == 0x5722,
            Revision::C => (usb.vid == 0x1d6b && usb.pid == 0x0121) || serial == "20080411",
            Revision::D => usb.vid == 0x454d && usb.pid == 0x4e41,
            Revision::Simu => false,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Revision::A => "A",
            Revision::B => "B",
            Revision::C => "C",
            Revision::D => "D",
            Revision::Simu => "SIMU",
        })
    }
}

impl FromStr for Revision {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Revision::A),
            "B" => Ok(Revision::B),
            "C" => Ok(Revision::C),
            "D" => Ok(Revision::D),
            "SIMU" => Ok(Revision::Simu),
            _ => Err(format!(
                "unknown display revision '{raw}' (expected A, B, C, D, SIMU or auto)"
            )),
        }
    }
}

/// What a revision's firmware can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest single write the device accepts.
    pub max_chunk: usize,
    pub partial_update: bool,
    pub brightness: bool,
    /// Firmware can flip the panel itself; otherwise frames are rotated in software.
    pub hardware_reverse: bool,
    pub hardware_flow_control: bool,
}

/// Panel orientation as sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrientation {
    Portrait,
    ReversePortrait,
    Landscape,
    ReverseLandscape,
}

impl DeviceOrientation {
    pub fn new(layout: Orientation, reverse: bool) -> Self {
        match (layout, reverse) {
            (Orientation::Portrait, false) => DeviceOrientation::Portrait,
            (Orientation::Portrait, true) => DeviceOrientation::ReversePortrait,
            (Orientation::Landscape, false) => DeviceOrientation::Landscape,
            (Orientation::Landscape, true) => DeviceOrientation::ReverseLandscape,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DeviceOrientation::Portrait => 0,
            DeviceOrientation::ReversePortrait => 1,
            DeviceOrientation::Landscape => 2,
            DeviceOrientation::ReverseLandscape => 3,
        }
    }

    pub fn is_landscape(&self) -> bool {
        matches!(
            self,
            DeviceOrientation::Landscape | DeviceOrientation::ReverseLandscape
        )
    }

    pub fn is_reversed(&self) -> bool {
        matches!(
            self,
            DeviceOrientation::ReversePortrait | DeviceOrientation::ReverseLandscape
        )
    }

    pub fn unreversed(&self) -> Self {
        if self.is_landscape() {
            DeviceOrientation::Landscape
        } else {
            DeviceOrientation::Portrait
        }
    }
}

/// Session state of the driver for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Disconnected,
    Handshaking,
    Ready,
    Streaming,
    Faulted,
}

impl DriverState {
    pub fn accepts_frames(&self) -> bool {
        matches!(self, DriverState::Ready | DriverState::Streaming)
    }
}

/// Per-session settings the driver needs beyond the revision itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    pub brightness: u8,
    pub orientation: DeviceOrientation,
    pub width: u32,
    pub height: u32,
    pub handshake_timeout: Duration,
    pub simulated_output: PathBuf,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            brightness: DEFAULT_BRIGHTNESS,
            orientation: DeviceOrientation::Portrait,
            width: 320,
            height: 480,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            simulated_output: PathBuf::from(DEFAULT_SIMULATED_OUTPUT),
        }
    }
}

impl DriverOptions {
    pub fn from_config(config: &Config, layout: Orientation, width: u32, height: u32) -> Self {
        Self {
            brightness: config.display.brightness,
            orientation: DeviceOrientation::new(layout, config.display.reverse_orientation),
            width,
            height,
            handshake_timeout: Duration::from_millis(config.connection.handshake_timeout_ms),
            simulated_output: config.display.simulated_output.clone(),
        }
    }
}

/// Pick the encoder for `revision`. Selected once per connection.
pub fn protocol_for(revision: Revision, options: &DriverOptions) -> Box<dyn Protocol> {
    match revision {
        Revision::A => Box::new(rev_a::RevA::new()),
        Revision::B => Box::new(rev_b::RevB::new()),
        Revision::C => Box::new(rev_c::RevC::new()),
        Revision::D => Box::new(rev_d::RevD::new()),
        Revision::Simu => Box::new(simulated::Simulated::new(options.simulated_output.clone())),
    }
}

/// Device session on top of an opened link.
pub struct DisplayDriver {
    protocol: Box<dyn Protocol>,
    options: DriverOptions,
    state: DriverState,
    last_checksum: Option<u32>,
    frames_sent: u64,
    last_frame_at: Option<SystemTime>,
}

impl fmt::Debug for DisplayDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayDriver")
            .field("revision", &self.protocol.revision())
            .field("state", &self.state)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}

impl DisplayDriver {
    pub fn new(revision: Revision, options: DriverOptions) -> Self {
        let protocol = protocol_for(revision, &options);
        Self::with_protocol(protocol, options)
    }

    pub fn with_protocol(protocol: Box<dyn Protocol>, options: DriverOptions) -> Self {
        Self {
            protocol,
            options,
            state: DriverState::Disconnected,
            last_checksum: None,
            frames_sent: 0,
            last_frame_at: None,
        }
    }

    pub fn revision(&self) -> Revision {
        self.protocol.revision()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.protocol.capabilities()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn last_frame_at(&self) -> Option<SystemTime> {
        self.last_frame_at
    }

    pub fn brightness(&self) -> u8 {
        self.options.brightness
    }

    /// Identify the device, then send orientation and brightness.
    pub fn handshake(&mut self, link: &mut dyn SerialLink) -> Result<()> {
        self.state = DriverState::Handshaking;
        self.last_checksum = None;
        match self.run_handshake(link) {
            Ok(()) => {
                self.state = DriverState::Ready;
                info!(
                    "display revision {} ready on {}",
                    self.revision(),
                    link.port_name()
                );
                Ok(())
            }
            Err(err) => {
                self.state = DriverState::Faulted;
                Err(match err {
                    Error::Protocol(_) => err,
                    other => Error::Protocol(format!("handshake failed: {other}")),
                })
            }
        }
    }

    fn run_handshake(&mut self, link: &mut dyn SerialLink) -> Result<()> {
        protocol::identify(self.protocol.as_mut(), link, self.options.handshake_timeout)?;
        let caps = self.protocol.capabilities();
        let orientation = if caps.hardware_reverse {
            self.options.orientation
        } else {
            self.options.orientation.unreversed()
        };
        let mut messages =
            self.protocol
                .init_sequence(orientation, self.options.width, self.options.height);
        if caps.brightness {
            if let Some(msg) = self.protocol.brightness(self.options.brightness) {
                messages.push(msg);
            }
        }
        protocol::write_messages(link, &messages, caps.max_chunk)?;
        Ok(())
    }

    /// Transmit one frame. Returns `false` when the frame matched the last
    /// one sent and was skipped.
    ///
    /// Any failure leaves the driver `Faulted`; retrying is the connection's job.
    pub fn send_frame(&mut self, link: &mut dyn SerialLink, frame: &Frame) -> Result<bool> {
        if !self.state.accepts_frames() {
            return Err(Error::Protocol(format!(
                "cannot send a frame while the driver is {:?}",
                self.state
            )));
        }
        let checksum = frame.checksum();
        if self.last_checksum == Some(checksum) {
            debug!("frame unchanged, skipping transmit");
            return Ok(false);
        }

        let caps = self.protocol.capabilities();
        let regions: Option<Vec<Rect>> = match frame.dirty_regions() {
            Some(rects) if caps.partial_update && self.last_checksum.is_some() => {
                Some(rects.to_vec())
            }
            _ => None,
        };
        let software_flip = self.options.orientation.is_reversed() && !caps.hardware_reverse;
        let (wire_frame, wire_regions) = if software_flip {
            let (w, h) = (frame.width(), frame.height());
            let rotated = regions.map(|rs| rs.iter().map(|r| r.rotated_180(w, h)).collect());
            (frame.rotated_180(), rotated)
        } else {
            (frame.clone(), regions)
        };

        self.state = DriverState::Streaming;
        match self
            .protocol
            .transmit(link, &wire_frame, wire_regions.as_deref())
        {
            Ok(bytes) => {
                self.state = DriverState::Ready;
                self.last_checksum = Some(checksum);
                self.frames_sent += 1;
                self.last_frame_at = Some(SystemTime::now());
                debug!(
                    "sent {} frame ({bytes} bytes) to {}",
                    if wire_regions.is_some() { "partial" } else { "full" },
                    link.port_name()
                );
                Ok(true)
            }
            Err(err) => {
                self.state = DriverState::Faulted;
                self.last_checksum = None;
                Err(err)
            }
        }
    }

    /// Clamp to 0..=100 and apply. Revisions without backlight control only log.
    pub fn set_brightness(&mut self, link: &mut dyn SerialLink, percent: i32) -> Result<()> {
        let clamped = percent.clamp(0, 100) as u8;
        if clamped as i32 != percent {
            warn!("brightness {percent} out of range, clamped to {clamped}");
        }
        self.options.brightness = clamped;
        if !self.protocol.capabilities().brightness {
            warn!(
                "revision {} has no brightness control; ignoring {clamped}%",
                self.revision()
            );
            return Ok(());
        }
        if !self.state.accepts_frames() {
            return Ok(());
        }
        let Some(message) = self.protocol.brightness(clamped) else {
            return Ok(());
        };
        let max_chunk = self.protocol.capabilities().max_chunk;
        if let Err(err) = protocol::write_messages(link, &[message], max_chunk) {
            self.state = DriverState::Faulted;
            return Err(err);
        }
        Ok(())
    }

    pub fn mark_faulted(&mut self) {
        self.state = DriverState::Faulted;
        self.last_checksum = None;
    }

    pub fn disconnect(&mut self) {
        if self.state != DriverState::Disconnected {
            debug!("display driver for revision {} disconnected", self.revision());
        }
        self.state = DriverState::Disconnected;
        self.last_checksum = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::FakeLink;
    use embedded_graphics::pixelcolor::Rgb888;

    fn ready_driver(revision: Revision) -> (DisplayDriver, FakeLink) {
        let mut link = FakeLink::device("/dev/fake0", revision);
        let mut driver = DisplayDriver::new(revision, DriverOptions::default());
        driver.handshake(&mut link).unwrap();
        link.clear_writes();
        (driver, link)
    }

    #[test]
    fn revision_parses_case_insensitively() {
        assert_eq!("simu".parse::<Revision>().unwrap(), Revision::Simu);
        assert_eq!(" b ".parse::<Revision>().unwrap(), Revision::B);
        let err = "Z".parse::<Revision>().unwrap_err();
        assert!(err.contains("unknown display revision"));
        assert_eq!(Revision::Simu.to_string(), "SIMU");
    }

    #[test]
    fn usb_hints_pick_revision() {
        let xuanfang = UsbIdentity {
            vid: 0x1a86,
            pid: 0x5722,
            serial_number: None,
        };
        assert!(Revision::B.matches_usb(&xuanfang));
        assert!(!Revision::A.matches_usb(&xuanfang));
        let turing5 = UsbIdentity {
            vid: 0x0525,
            pid: 0xa4a7,
            serial_number: Some("20080411".into()),
        };
        assert!(Revision::C.matches_usb(&turing5));
    }

    #[test]
    fn orientation_codes() {
        let o = DeviceOrientation::new(Orientation::Landscape, true);
        assert_eq!(o, DeviceOrientation::ReverseLandscape);
        assert_eq!(o.code(), 3);
        assert_eq!(o.unreversed(), DeviceOrientation::Landscape);
    }

    #[test]
    fn handshake_reaches_ready() {
        let (driver, _link) = ready_driver(Revision::B);
        assert_eq!(driver.state(), DriverState::Ready);
    }

    #[test]
    fn silent_device_faults_handshake() {
        let mut link = FakeLink::silent("/dev/fake0");
        let mut driver = DisplayDriver::new(Revision::A, DriverOptions::default());
        let err = driver.handshake(&mut link).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(driver.state(), DriverState::Faulted);
    }

    #[test]
    fn send_requires_ready() {
        let mut link = FakeLink::device("/dev/fake0", Revision::A);
        let mut driver = DisplayDriver::new(Revision::A, DriverOptions::default());
        let frame = Frame::new(320, 480, Rgb888::new(0, 0, 0));
        assert!(driver.send_frame(&mut link, &frame).is_err());
        assert_eq!(driver.state(), DriverState::Disconnected);
    }

    #[test]
    fn identical_frames_are_sent_once() {
        let (mut driver, mut link) = ready_driver(Revision::A);
        let frame = Frame::new(320, 480, Rgb888::new(10, 20, 30));
        assert!(driver.send_frame(&mut link, &frame).unwrap());
        let written = link.bytes_written();
        assert!(!driver.send_frame(&mut link, &frame).unwrap());
        assert_eq!(link.bytes_written(), written);
        assert_eq!(driver.frames_sent(), 1);
    }

    #[test]
    fn write_failure_faults_driver() {
        let (mut driver, mut link) = ready_driver(Revision::B);
        link.fail_writes(true);
        let frame = Frame::new(320, 480, Rgb888::new(1, 2, 3));
        assert!(driver.send_frame(&mut link, &frame).is_err());
        assert_eq!(driver.state(), DriverState::Faulted);
    }

    #[test]
    fn brightness_is_clamped() {
        let (mut driver, mut link) = ready_driver(Revision::B);
        driver.set_brightness(&mut link, 150).unwrap();
        assert_eq!(driver.brightness(), 100);
        assert_eq!(link.writes().last().unwrap()[1], 255);
        driver.set_brightness(&mut link, -20).unwrap();
        assert_eq!(driver.brightness(), 0);
        assert_eq!(link.writes().last().unwrap()[1], 0);
    }

    #[test]
    fn partial_frames_only_after_a_full_one() {
        let (mut driver, mut link) = ready_driver(Revision::A);
        let base = Frame::new(320, 480, Rgb888::new(0, 0, 0));
        driver.send_frame(&mut link, &base).unwrap();
        let full_bytes = link.bytes_written();

        let mut next = base.clone();
        next.set_pixel(5, 5, [255, 255, 255]);
        let regions = next.diff(&base);
        let next = next.with_dirty_regions(regions);
        link.clear_writes();
        driver.send_frame(&mut link, &next).unwrap();
        assert!(link.bytes_written() < full_bytes / 10);
    }

    #[test]
    fn software_flip_without_hardware_reverse() {
        let mut options = DriverOptions::default();
        options.orientation = DeviceOrientation::ReversePortrait;
        let mut link = FakeLink::device("/dev/fake0", Revision::B);
        let mut driver = DisplayDriver::new(Revision::B, options);
        driver.handshake(&mut link).unwrap();
        // Orientation command carries the unreversed layout.
        assert_eq!(link.writes()[1], vec![0xCB, 0, 0, 0, 0, 0, 0, 0, 0, 0xCB]);
        link.clear_writes();

        let mut frame = Frame::new(320, 480, Rgb888::new(0, 0, 0));
        frame.set_pixel(0, 0, [255, 0, 0]);
        driver.send_frame(&mut link, &frame).unwrap();
        let payload = link.writes()[1..].concat();
        let last = payload.len();
        assert_eq!(&payload[last - 2..], &[0xF8, 0x00]);
        assert_eq!(&payload[..2], &[0x00, 0x00]);
    }
}
