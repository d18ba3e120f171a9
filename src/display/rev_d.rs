//! Revision D: Kipye 3.5" panels.
//!
//! Every message is framed as `0xAA, cmd, len (u32 LE), payload, crc32 (u32 LE)`
//! with the CRC taken over everything after the start byte. Bitmaps are sent
//! whole, as 16x16 tiles of RGB565 little-endian.

use crate::{
    render::{frame::rgb565, Frame, Rect},
    Error, Result,
};

use super::{protocol::Protocol, Capabilities, DeviceOrientation, Revision};

const START: u8 = 0xAA;
const HELLO: u8 = 0x01;
const SET_BRIGHTNESS: u8 = 0x10;
const SET_ORIENTATION: u8 = 0x11;
const DISPLAY_BITMAP: u8 = 0x20;
const TILE: u32 = 16;
const ACK: &[u8] = b"OK";

#[derive(Debug, Default)]
pub struct RevD;

impl RevD {
    pub fn new() -> Self {
        Self
    }
}

/// Frame `payload` under `cmd`.
pub fn encode_message(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(START);
    out.push(cmd);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    let crc = crc32fast::hash(&out[1..]);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Split a framed message back into command and payload, checking length and CRC.
pub fn decode_message(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < 10 || bytes[0] != START {
        return Err(Error::Protocol(format!(
            "revision D message too short or missing start byte: {:02x?}",
            &bytes[..bytes.len().min(8)]
        )));
    }
    let len = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    if len.checked_add(10) != Some(bytes.len()) {
        return Err(Error::Protocol(format!(
            "revision D length field {len} does not match {} received bytes",
            bytes.len()
        )));
    }
    let body_end = 6 + len;
    let expected = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    let actual = crc32fast::hash(&bytes[1..body_end]);
    if expected != actual {
        return Err(Error::Protocol(format!(
            "revision D checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }
    Ok((bytes[1], &bytes[6..body_end]))
}

impl Protocol for RevD {
    fn revision(&self) -> Revision {
        Revision::D
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_chunk: 4096,
            partial_update: false,
            brightness: true,
            hardware_reverse: true,
            hardware_flow_control: false,
        }
    }

    fn hello(&self) -> Vec<u8> {
        encode_message(HELLO, b"HELLO")
    }

    fn hello_reply_len(&self) -> usize {
        ACK.len() + 10
    }

    fn accept_hello(&mut self, reply: &[u8]) -> Result<()> {
        let (cmd, payload) = decode_message(reply)?;
        if cmd != HELLO || payload != ACK {
            return Err(Error::Protocol(format!(
                "revision D hello answered with command {cmd:#04x}"
            )));
        }
        Ok(())
    }

    fn init_sequence(&self, orientation: DeviceOrientation, _width: u32, _height: u32) -> Vec<Vec<u8>> {
        vec![encode_message(SET_ORIENTATION, &[orientation.code()])]
    }

    fn brightness(&self, percent: u8) -> Option<Vec<u8>> {
        Some(encode_message(SET_BRIGHTNESS, &[percent.min(100)]))
    }

    fn encode_region(&self, frame: &Frame, rect: Rect) -> Vec<Vec<u8>> {
        let r = rect.clipped(frame.width(), frame.height());
        if r.is_empty() {
            return Vec::new();
        }
        let mut payload = Vec::with_capacity(8 + r.area() as usize * 2);
        for v in [r.x, r.y, r.width, r.height] {
            payload.extend_from_slice(&(v as u16).to_le_bytes());
        }
        let mut ty = r.y;
        while ty < r.bottom() {
            let mut tx = r.x;
            while tx < r.right() {
                let tile = Rect::new(tx, ty, TILE, TILE).clipped(r.right(), r.bottom());
                for px in frame.region_pixels(tile) {
                    payload.extend_from_slice(&rgb565(px).to_le_bytes());
                }
                tx += TILE;
            }
            ty += TILE;
        }
        vec![encode_message(DISPLAY_BITMAP, &payload)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::fake::device_reply;
    use embedded_graphics::pixelcolor::Rgb888;

    #[test]
    fn message_round_trip_checks_crc() {
        let msg = encode_message(SET_BRIGHTNESS, &[42]);
        assert_eq!(msg[0], START);
        assert_eq!(&msg[2..6], &[1, 0, 0, 0]);
        let (cmd, payload) = decode_message(&msg).unwrap();
        assert_eq!((cmd, payload), (SET_BRIGHTNESS, &[42u8][..]));

        let mut corrupted = msg.clone();
        corrupted[6] = 43;
        assert!(decode_message(&corrupted).is_err());
    }

    #[test]
    fn hello_needs_ok() {
        let mut proto = RevD::new();
        proto.accept_hello(&device_reply(Revision::D)).unwrap();
        assert!(proto.accept_hello(&encode_message(HELLO, b"NO")).is_err());
        assert!(proto.accept_hello(&[0xAA; 12]).is_err());
    }

    #[test]
    fn brightness_is_percent() {
        let msg = RevD::new().brightness(64).unwrap();
        let (_, payload) = decode_message(&msg).unwrap();
        assert_eq!(payload, &[64]);
    }

    #[test]
    fn bitmap_is_tiled() {
        // 32x16: two tiles side by side; the left one red, the right one blue.
        let mut frame = Frame::new(32, 16, Rgb888::new(0, 0, 255));
        for y in 0..16 {
            for x in 0..16 {
                frame.set_pixel(x, y, [255, 0, 0]);
            }
        }
        let messages = RevD::new().encode_full(&frame);
        assert_eq!(messages.len(), 1);
        let (cmd, payload) = decode_message(&messages[0]).unwrap();
        assert_eq!(cmd, DISPLAY_BITMAP);
        assert_eq!(&payload[..8], &[0, 0, 0, 0, 32, 0, 16, 0]);
        let pixels = &payload[8..];
        // First 256 pixels all belong to the red tile.
        assert_eq!(&pixels[..2], &[0x00, 0xF8]);
        assert_eq!(&pixels[510..512], &[0x00, 0xF8]);
        assert_eq!(&pixels[512..514], &[0x1F, 0x00]);
    }
}
