//! Revision C: Turing 5" panels.
//!
//! Commands are zero-padded to 250 bytes. Full frames go out as BGRA after a
//! bitmap header; partial updates pack one segment per dirty row as a
//! 3-byte pixel offset, a 2-byte width and BGR pixels.

use log::debug;

use crate::{
    render::{Frame, Rect},
    Error, Result,
};

use super::{
    protocol::{percent_to_level, Protocol},
    Capabilities, DeviceOrientation, Revision,
};

const COMMAND_LEN: usize = 250;
const HELLO: [u8; 12] = [0x01, 0xEF, 0x69, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xC5, 0xD3];
const SET_BRIGHTNESS: [u8; 10] = [0x7B, 0xEF, 0x69, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
const SET_ORIENTATION: [u8; 14] = [
    0x7D, 0xEF, 0x69, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x2D, 0x00, 0x00, 0x00,
];
const START_DISPLAY_BITMAP: [u8; 1] = [0x2C];
const DISPLAY_BITMAP: [u8; 6] = [0xC8, 0xEF, 0x69, 0x00, 0x17, 0x70];
const UPDATE_BITMAP: [u8; 4] = [0xCC, 0xEF, 0x69, 0x00];
const UPDATE_END: [u8; 2] = [0xEF, 0x69];
const HELLO_REPLY_LEN: usize = 23;
const DEVICE_ID: &[u8] = b"chs_5inch";

#[derive(Debug, Default)]
pub struct RevC {
    firmware: Option<String>,
}

impl RevC {
    pub fn new() -> Self {
        Self::default()
    }

    /// Firmware string reported by the last accepted hello, e.g. `chs_5inch.dev1_rom1.87`.
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }
}

fn command(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.resize(COMMAND_LEN.max(bytes.len()), 0);
    out
}

fn be24(value: usize) -> [u8; 3] {
    let v = value as u32;
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

impl Protocol for RevC {
    fn revision(&self) -> Revision {
        Revision::C
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_chunk: COMMAND_LEN,
            partial_update: true,
            brightness: true,
            hardware_reverse: true,
            hardware_flow_control: true,
        }
    }

    fn hello(&self) -> Vec<u8> {
        command(&HELLO)
    }

    fn hello_reply_len(&self) -> usize {
        HELLO_REPLY_LEN
    }

    fn accept_hello(&mut self, reply: &[u8]) -> Result<()> {
        if !reply.starts_with(DEVICE_ID) {
            return Err(Error::Protocol(format!(
                "revision C hello reply does not identify a 5\" panel: {:?}",
                String::from_utf8_lossy(reply)
            )));
        }
        let id = String::from_utf8_lossy(reply)
            .trim_end_matches('\0')
            .to_string();
        debug!("revision C firmware {id}");
        self.firmware = Some(id);
        Ok(())
    }

    fn init_sequence(&self, orientation: DeviceOrientation, _width: u32, _height: u32) -> Vec<Vec<u8>> {
        let mut orient = SET_ORIENTATION.to_vec();
        orient.push(orientation.code());
        vec![command(&orient)]
    }

    fn brightness(&self, percent: u8) -> Option<Vec<u8>> {
        let mut msg = SET_BRIGHTNESS.to_vec();
        msg.push(percent_to_level(percent));
        Some(command(&msg))
    }

    fn encode_region(&self, frame: &Frame, rect: Rect) -> Vec<Vec<u8>> {
        let r = rect.clipped(frame.width(), frame.height());
        if r.is_empty() {
            return Vec::new();
        }
        if r == frame.bounds() {
            return self.encode_full(frame);
        }
        let mut payload = Vec::with_capacity(r.height as usize * (5 + r.width as usize * 3));
        for y in r.y..r.bottom() {
            let offset = y as usize * frame.width() as usize + r.x as usize;
            payload.extend_from_slice(&be24(offset));
            payload.extend_from_slice(&(r.width as u16).to_be_bytes());
            for px in frame.region_pixels(Rect::new(r.x, y, r.width, 1)) {
                payload.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        payload.extend_from_slice(&UPDATE_END);
        let mut header = UPDATE_BITMAP.to_vec();
        header.extend_from_slice(&be24(payload.len()));
        vec![command(&header), payload]
    }

    fn encode_full(&self, frame: &Frame) -> Vec<Vec<u8>> {
        let mut pixels = Vec::with_capacity(frame.as_rgb().len() / 3 * 4);
        for px in frame.as_rgb().chunks_exact(3) {
            pixels.extend_from_slice(&[px[2], px[1], px[0], 0xFF]);
        }
        vec![
            command(&START_DISPLAY_BITMAP),
            command(&DISPLAY_BITMAP),
            pixels,
        ]
    }
}
