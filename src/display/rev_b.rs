//! Revision B: XuanFang 3.5" panels.
//!
//! Commands are 10 bytes: opcode, eight payload bytes, opcode again.
//! Pixels are RGB565 big-endian, row-major. The firmware has no reverse
//! orientation, so reversed layouts are rotated before encoding.

use log::{debug, warn};

use crate::{
    render::{frame::rgb565, Frame, Rect},
    Error, Result,
};

use super::{
    protocol::{percent_to_level, Protocol},
    Capabilities, DeviceOrientation, Revision,
};

const HELLO: u8 = 0xCA;
const SET_ORIENTATION: u8 = 0xCB;
const DISPLAY_BITMAP: u8 = 0xCC;
const SET_BRIGHTNESS: u8 = 0xCE;

/// Hardware sub-revision reported in the hello reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRevision {
    /// Backlight is either on or off.
    A01,
    /// Backlight accepts 0..=255.
    A02,
}

#[derive(Debug)]
pub struct RevB {
    sub_revision: SubRevision,
}

impl RevB {
    pub fn new() -> Self {
        Self {
            sub_revision: SubRevision::A02,
        }
    }

    pub fn sub_revision(&self) -> SubRevision {
        self.sub_revision
    }
}

impl Default for RevB {
    fn default() -> Self {
        Self::new()
    }
}

fn packet(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 10];
    out[0] = cmd;
    for (slot, byte) in out[1..9].iter_mut().zip(payload) {
        *slot = *byte;
    }
    out[9] = cmd;
    out
}

impl Protocol for RevB {
    fn revision(&self) -> Revision {
        Revision::B
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_chunk: 320 * 8 * 2,
            partial_update: true,
            brightness: true,
            hardware_reverse: false,
            hardware_flow_control: false,
        }
    }

    fn hello(&self) -> Vec<u8> {
        packet(HELLO, b"HELLO")
    }

    fn hello_reply_len(&self) -> usize {
        10
    }

    fn accept_hello(&mut self, reply: &[u8]) -> Result<()> {
        if reply.len() != 10 || reply[0] != HELLO || reply[9] != HELLO {
            return Err(Error::Protocol(format!(
                "revision B hello reply not recognised: {reply:02x?}"
            )));
        }
        self.sub_revision = match reply[6] {
            0x0A => SubRevision::A01,
            0x0B => SubRevision::A02,
            other => {
                warn!("revision B reported unknown sub-revision {other:#04x}; assuming A02");
                SubRevision::A02
            }
        };
        debug!("revision B sub-revision {:?}", self.sub_revision);
        Ok(())
    }

    fn init_sequence(&self, orientation: DeviceOrientation, _width: u32, _height: u32) -> Vec<Vec<u8>> {
        let landscape = u8::from(orientation.is_landscape());
        vec![packet(SET_ORIENTATION, &[landscape])]
    }

    fn brightness(&self, percent: u8) -> Option<Vec<u8>> {
        let value = match self.sub_revision {
            SubRevision::A01 => u8::from(percent > 0),
            SubRevision::A02 => percent_to_level(percent),
        };
        Some(packet(SET_BRIGHTNESS, &[value]))
    }

    fn encode_region(&self, frame: &Frame, rect: Rect) -> Vec<Vec<u8>> {
        let r = rect.clipped(frame.width(), frame.height());
        if r.is_empty() {
            return Vec::new();
        }
        let (x, y) = (r.x as u16, r.y as u16);
        let (ex, ey) = ((r.right() - 1) as u16, (r.bottom() - 1) as u16);
        let mut coords = Vec::with_capacity(8);
        for v in [x, y, ex, ey] {
            coords.extend_from_slice(&v.to_be_bytes());
        }
        let mut payload = Vec::with_capacity(r.area() as usize * 2);
        for px in frame.region_pixels(r) {
            payload.extend_from_slice(&rgb565(px).to_be_bytes());
        }
        vec![packet(DISPLAY_BITMAP, &coords), payload]
    }
}
