use std::time::Duration;

use crate::{
    render::{Frame, Rect},
    serial::SerialLink,
    Error, Result,
};

use super::{Capabilities, DeviceOrientation, Revision};

/// Byte-level encoding of one display revision.
///
/// Every revision speaks the same logical operations; only the framing,
/// checksums and pixel order differ. One implementation is picked when a
/// connection is made and kept for the life of that connection.
pub trait Protocol: Send {
    fn revision(&self) -> Revision;

    fn capabilities(&self) -> Capabilities;

    /// Identification request sent during discovery and handshake.
    fn hello(&self) -> Vec<u8>;

    fn hello_reply_len(&self) -> usize;

    /// Check the identification reply. May record a sub-revision.
    fn accept_hello(&mut self, reply: &[u8]) -> Result<()>;

    /// Messages sent once after identification: power, orientation and the like.
    fn init_sequence(&self, orientation: DeviceOrientation, width: u32, height: u32) -> Vec<Vec<u8>>;

    /// Brightness message for a percentage already clamped to 0..=100,
    /// or `None` when the revision has no brightness control.
    fn brightness(&self, percent: u8) -> Option<Vec<u8>>;

    /// Messages that transfer one rectangle of `frame`.
    fn encode_region(&self, frame: &Frame, rect: Rect) -> Vec<Vec<u8>>;

    fn encode_regions(&self, frame: &Frame, rects: &[Rect]) -> Vec<Vec<u8>> {
        rects
            .iter()
            .filter(|r| !r.is_empty())
            .flat_map(|r| self.encode_region(frame, *r))
            .collect()
    }

    fn encode_full(&self, frame: &Frame) -> Vec<Vec<u8>> {
        self.encode_region(frame, frame.bounds())
    }

    /// Push `frame` to the device. `regions` is set only for partial updates.
    /// Returns the number of bytes written.
    fn transmit(
        &mut self,
        link: &mut dyn SerialLink,
        frame: &Frame,
        regions: Option<&[Rect]>,
    ) -> Result<usize> {
        let messages = match regions {
            Some(rects) => self.encode_regions(frame, rects),
            None => self.encode_full(frame),
        };
        write_messages(link, &messages, self.capabilities().max_chunk)
    }
}

/// Write each message in slices of at most `max_chunk` bytes, strictly in order.
pub fn write_messages(
    link: &mut dyn SerialLink,
    messages: &[Vec<u8>],
    max_chunk: usize,
) -> Result<usize> {
    let chunk = max_chunk.max(1);
    let mut written = 0;
    for message in messages {
        for slice in message.chunks(chunk) {
            link.write_all(slice)?;
            written += slice.len();
        }
    }
    Ok(written)
}

/// Send the identification request and validate the reply within `timeout`.
pub fn identify(
    protocol: &mut dyn Protocol,
    link: &mut dyn SerialLink,
    timeout: Duration,
) -> Result<()> {
    let reply_len = protocol.hello_reply_len();
    let request = protocol.hello();
    if request.is_empty() && reply_len == 0 {
        return Ok(());
    }
    link.discard_input()?;
    link.write_all(&request)?;
    let mut reply = vec![0u8; reply_len];
    link.read_exact_timeout(&mut reply, timeout).map_err(|err| match err {
        Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => Error::Protocol(format!(
            "revision {} device did not answer hello within {} ms",
            protocol.revision(),
            timeout.as_millis()
        )),
        other => other,
    })?;
    protocol.accept_hello(&reply)
}

/// Fold a percentage into a 0..=255 device level.
pub fn percent_to_level(percent: u8) -> u8 {
    ((percent.min(100) as u32 * 255) / 100) as u8
}
