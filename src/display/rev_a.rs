//! Revision A: Turing 3.5" and UsbMonitor panels.
//!
//! Every command is a 6-byte packet with the rectangle corners bit-packed
//! into the first five bytes and the opcode last. Pixels follow as RGB565
//! little-endian, row-major.

use log::debug;

use crate::{
    render::{frame::rgb565, Frame, Rect},
    Error, Result,
};

use super::{protocol::Protocol, Capabilities, DeviceOrientation, Revision};

const HELLO: u8 = 69;
const SCREEN_ON: u8 = 109;
const SET_BRIGHTNESS: u8 = 110;
const SET_ORIENTATION: u8 = 121;
const DISPLAY_BITMAP: u8 = 197;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRevision {
    Turing,
    UsbMonitor,
}

#[derive(Debug)]
pub struct RevA {
    sub_revision: SubRevision,
}

impl RevA {
    pub fn new() -> Self {
        Self {
            sub_revision: SubRevision::Turing,
        }
    }

    pub fn sub_revision(&self) -> SubRevision {
        self.sub_revision
    }
}

impl Default for RevA {
    fn default() -> Self {
        Self::new()
    }
}

fn packet(cmd: u8, x: u16, y: u16, ex: u16, ey: u16) -> Vec<u8> {
    vec![
        (x >> 2) as u8,
        (((x & 3) << 6) + (y >> 4)) as u8,
        (((y & 15) << 4) + (ex >> 6)) as u8,
        (((ex & 63) << 2) + (ey >> 8)) as u8,
        (ey & 255) as u8,
        cmd,
    ]
}

impl Protocol for RevA {
    fn revision(&self) -> Revision {
        Revision::A
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_chunk: 320 * 8 * 2,
            partial_update: true,
            brightness: true,
            hardware_reverse: true,
            hardware_flow_control: false,
        }
    }

    fn hello(&self) -> Vec<u8> {
        packet(HELLO, 0, 0, 0, 0)
    }

    fn hello_reply_len(&self) -> usize {
        6
    }

    fn accept_hello(&mut self, reply: &[u8]) -> Result<()> {
        if reply.len() != 6 {
            return Err(Error::Protocol(format!(
                "revision A hello reply must be 6 bytes, got {}",
                reply.len()
            )));
        }
        self.sub_revision = if reply.iter().all(|b| *b == 0x01) {
            SubRevision::UsbMonitor
        } else {
            SubRevision::Turing
        };
        debug!("revision A sub-revision {:?}", self.sub_revision);
        Ok(())
    }

    fn init_sequence(&self, orientation: DeviceOrientation, width: u32, height: u32) -> Vec<Vec<u8>> {
        let mut orient = packet(SET_ORIENTATION, 0, 0, 0, 0);
        orient.resize(16, 0);
        orient[6] = orientation.code() + 100;
        orient[7] = (width >> 8) as u8;
        orient[8] = (width & 255) as u8;
        orient[9] = (height >> 8) as u8;
        orient[10] = (height & 255) as u8;
        vec![packet(SCREEN_ON, 0, 0, 0, 0), orient]
    }

    fn brightness(&self, percent: u8) -> Option<Vec<u8>> {
        // 0 is the brightest level on this firmware.
        let level = 255 - super::protocol::percent_to_level(percent) as u16;
        Some(packet(SET_BRIGHTNESS, level, 0, 0, 0))
    }

    fn encode_region(&self, frame: &Frame, rect: Rect) -> Vec<Vec<u8>> {
        let r = rect.clipped(frame.width(), frame.height());
        if r.is_empty() {
            return Vec::new();
        }
        let header = packet(
            DISPLAY_BITMAP,
            r.x as u16,
            r.y as u16,
            (r.right() - 1) as u16,
            (r.bottom() - 1) as u16,
        );
        let mut payload = Vec::with_capacity(r.area() as usize * 2);
        for px in frame.region_pixels(r) {
            payload.extend_from_slice(&rgb565(px).to_le_bytes());
        }
        vec![header, payload]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::Rgb888;

    #[test]
    fn packet_packs_coordinates() {
        let p = packet(DISPLAY_BITMAP, 0, 0, 319, 479);
        assert_eq!(p, vec![0x00, 0x00, 0x04, 0xFD, 0xDF, DISPLAY_BITMAP]);
    }

    #[test]
    fn region_encodes_rgb565_le() {
        let frame = Frame::new(4, 4, Rgb888::new(255, 0, 0));
        let messages = RevA::new().encode_region(&frame, Rect::new(1, 1, 2, 1));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0][5], DISPLAY_BITMAP);
        assert_eq!(messages[1], vec![0x00, 0xF8, 0x00, 0xF8]);
    }

    #[test]
    fn brightness_is_inverted() {
        let proto = RevA::new();
        assert_eq!(proto.brightness(100).unwrap(), packet(SET_BRIGHTNESS, 0, 0, 0, 0));
        assert_eq!(proto.brightness(0).unwrap(), packet(SET_BRIGHTNESS, 255, 0, 0, 0));
    }

    #[test]
    fn hello_reply_selects_sub_revision() {
        let mut proto = RevA::new();
        proto.accept_hello(&[0x01; 6]).unwrap();
        assert_eq!(proto.sub_revision(), SubRevision::UsbMonitor);
        proto.accept_hello(&[0x00, 0x01, 0, 0, 0, 0]).unwrap();
        assert_eq!(proto.sub_revision(), SubRevision::Turing);
        assert!(proto.accept_hello(&[0x01; 3]).is_err());
    }

    #[test]
    fn orientation_packet_carries_geometry() {
        let seq = RevA::new().init_sequence(DeviceOrientation::ReverseLandscape, 480, 320);
        let orient = &seq[1];
        assert_eq!(orient.len(), 16);
        assert_eq!(orient[5], SET_ORIENTATION);
        assert_eq!(orient[6], 103);
        assert_eq!(&orient[7..11], &[0x01, 0xE0, 0x01, 0x40]);
    }
}
