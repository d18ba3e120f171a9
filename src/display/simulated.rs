//! SIMU revision: frames land in a PNG on disk instead of a serial port.

use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    render::{Frame, Rect},
    serial::SerialLink,
    Result,
};

use super::{protocol::Protocol, Capabilities, DeviceOrientation, Revision};

#[derive(Debug)]
pub struct Simulated {
    output: PathBuf,
}

impl Simulated {
    pub fn new(output: PathBuf) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Write through a sibling temp file so readers never see a half-written image.
    fn write_png(&self, frame: &Frame) -> Result<()> {
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = self.output.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        frame
            .to_image()
            .save_with_format(&tmp, image::ImageFormat::Png)?;
        std::fs::rename(&tmp, &self.output)?;
        debug!(
            "wrote {}x{} frame to {}",
            frame.width(),
            frame.height(),
            self.output.display()
        );
        Ok(())
    }
}

impl Protocol for Simulated {
    fn revision(&self) -> Revision {
        Revision::Simu
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_chunk: usize::MAX,
            partial_update: false,
            brightness: false,
            hardware_reverse: false,
            hardware_flow_control: false,
        }
    }

    fn hello(&self) -> Vec<u8> {
        Vec::new()
    }

    fn hello_reply_len(&self) -> usize {
        0
    }

    fn accept_hello(&mut self, _reply: &[u8]) -> Result<()> {
        Ok(())
    }

    fn init_sequence(&self, _orientation: DeviceOrientation, _width: u32, _height: u32) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn brightness(&self, _percent: u8) -> Option<Vec<u8>> {
        None
    }

    fn encode_region(&self, _frame: &Frame, _rect: Rect) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn transmit(
        &mut self,
        _link: &mut dyn SerialLink,
        frame: &Frame,
        _regions: Option<&[Rect]>,
    ) -> Result<usize> {
        self.write_png(frame)?;
        Ok(frame.as_rgb().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::NullLink;
    use embedded_graphics::pixelcolor::Rgb888;

    #[test]
    fn transmit_writes_png_of_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("screen.png");
        let mut proto = Simulated::new(path.clone());
        let mut link = NullLink::new("simulated");
        let frame = Frame::new(320, 480, Rgb888::new(12, 34, 56));
        proto.transmit(&mut link, &frame, None).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (320, 480));
        assert_eq!(img.get_pixel(10, 10).0, [12, 34, 56]);
        assert_eq!(link.bytes_written(), 0);
    }
}
