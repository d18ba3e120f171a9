//! Fixed-size RGB888 pixel buffer plus the dirty-region bookkeeping used for
//! incremental display updates.

use embedded_graphics::{
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, OriginDimensions, Pixel, Size},
};
use serde::Serialize;

/// Edge of the square tiles compared when computing a diff.
pub const DIFF_TILE: u32 = 16;

/// Axis-aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge, pinned at `u32::MAX`.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clip to a `width` x `height` surface anchored at the origin.
    pub fn clipped(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect::new(x, y, self.right().min(width) - x, self.bottom().min(height) - y)
    }

    /// Where this rectangle lands after the surface is turned upside down.
    pub fn rotated_180(&self, width: u32, height: u32) -> Rect {
        let r = self.clipped(width, height);
        Rect::new(width - r.right(), height - r.bottom(), r.width, r.height)
    }
}

/// A rendered frame. Consumed once by the display driver, then dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    dirty: Option<Vec<Rect>>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, fill: Rgb888) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&[fill.r(), fill.g(), fill.b()]);
        }
        Self {
            width,
            height,
            pixels,
            dirty: None,
        }
    }

    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            pixels,
            dirty: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn as_rgb(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.offset(x, y);
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x < self.width && y < self.height {
            let idx = self.offset(x, y);
            self.pixels[idx..idx + 3].copy_from_slice(&rgb);
        }
    }

    /// Regions changed since the previous frame, or `None` for a full frame.
    pub fn dirty_regions(&self) -> Option<&[Rect]> {
        self.dirty.as_deref()
    }

    pub fn is_partial(&self) -> bool {
        self.dirty.is_some()
    }

    pub fn with_dirty_regions(mut self, regions: Vec<Rect>) -> Self {
        self.dirty = Some(regions);
        self
    }

    pub fn into_full(mut self) -> Self {
        self.dirty = None;
        self
    }

    /// CRC-32 over geometry and pixels; equal frames hash equally regardless of dirty marks.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.width.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.pixels);
        hasher.finalize()
    }

    /// Row-major pixels of `rect`, one `[r, g, b]` triple at a time.
    pub fn region_pixels(&self, rect: Rect) -> impl Iterator<Item = [u8; 3]> + '_ {
        let rect = rect.clipped(self.width, self.height);
        (rect.y..rect.bottom()).flat_map(move |y| {
            (rect.x..rect.right()).map(move |x| {
                let idx = self.offset(x, y);
                [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
            })
        })
    }

    /// Rectangles whose pixels differ from `previous`, tiled by [`DIFF_TILE`].
    ///
    /// Frames of different geometry diff to the whole surface.
    pub fn diff(&self, previous: &Frame) -> Vec<Rect> {
        if self.width != previous.width || self.height != previous.height {
            return vec![self.bounds()];
        }
        let tiles_x = self.width.div_ceil(DIFF_TILE);
        let tiles_y = self.height.div_ceil(DIFF_TILE);
        let mut regions: Vec<Rect> = Vec::new();
        // Runs from the tile row above, open for vertical merging.
        let mut open: Vec<usize> = Vec::new();

        for ty in 0..tiles_y {
            let mut runs: Vec<Rect> = Vec::new();
            let mut tx = 0;
            while tx < tiles_x {
                if !self.tile_differs(previous, tx, ty) {
                    tx += 1;
                    continue;
                }
                let start = tx;
                while tx < tiles_x && self.tile_differs(previous, tx, ty) {
                    tx += 1;
                }
                let run = Rect::new(
                    start * DIFF_TILE,
                    ty * DIFF_TILE,
                    (tx - start) * DIFF_TILE,
                    DIFF_TILE,
                )
                .clipped(self.width, self.height);
                runs.push(run);
            }

            let mut next_open = Vec::with_capacity(runs.len());
            for run in runs {
                let merged = open.iter().copied().find(|&idx| {
                    let above = regions[idx];
                    above.x == run.x && above.width == run.width && above.bottom() == run.y
                });
                match merged {
                    Some(idx) => {
                        regions[idx].height += run.height;
                        next_open.push(idx);
                    }
                    None => {
                        regions.push(run);
                        next_open.push(regions.len() - 1);
                    }
                }
            }
            open = next_open;
        }
        regions
    }

    /// Copy `regions` of `source` into this frame.
    pub fn apply_regions(&mut self, source: &Frame, regions: &[Rect]) {
        for region in regions {
            let r = region
                .clipped(self.width, self.height)
                .clipped(source.width, source.height);
            for y in r.y..r.bottom() {
                let dst = self.offset(r.x, y);
                let src = source.offset(r.x, y);
                let len = r.width as usize * 3;
                self.pixels[dst..dst + len].copy_from_slice(&source.pixels[src..src + len]);
            }
        }
    }

    /// The same frame turned upside down, dirty regions included.
    pub fn rotated_180(&self) -> Frame {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for chunk in self.pixels.chunks_exact(3).rev() {
            pixels.extend_from_slice(chunk);
        }
        Frame {
            width: self.width,
            height: self.height,
            pixels,
            dirty: self.dirty.as_ref().map(|regions| {
                regions
                    .iter()
                    .map(|r| r.rotated_180(self.width, self.height))
                    .collect()
            }),
        }
    }

    pub fn to_image(&self) -> image::RgbImage {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 3
    }

    fn tile_differs(&self, previous: &Frame, tx: u32, ty: u32) -> bool {
        let tile = Rect::new(tx * DIFF_TILE, ty * DIFF_TILE, DIFF_TILE, DIFF_TILE)
            .clipped(self.width, self.height);
        (tile.y..tile.bottom()).any(|y| {
            let start = self.offset(tile.x, y);
            let end = start + tile.width as usize * 3;
            self.pixels[start..end] != previous.pixels[start..end]
        })
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Frame {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(
                    point.x as u32,
                    point.y as u32,
                    [color.r(), color.g(), color.b()],
                );
            }
        }
        Ok(())
    }
}

/// Pack an RGB888 triple into RGB565.
pub fn rgb565(rgb: [u8; 3]) -> u16 {
    ((rgb[0] as u16 & 0xF8) << 8) | ((rgb[1] as u16 & 0xFC) << 3) | (rgb[2] as u16 >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(w: u32, h: u32, v: u8) -> Frame {
        Frame::new(w, h, Rgb888::new(v, v, v))
    }

    #[test]
    fn identical_frames_have_no_diff() {
        let a = solid(64, 48, 10);
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn single_pixel_change_marks_one_tile() {
        let prev = solid(64, 48, 0);
        let mut next = prev.clone();
        next.set_pixel(20, 35, [255, 0, 0]);
        assert_eq!(next.diff(&prev), vec![Rect::new(16, 32, 16, 16)]);
    }

    #[test]
    fn adjacent_tiles_merge_into_one_rect() {
        let prev = solid(64, 64, 0);
        let mut next = prev.clone();
        for y in 0..40 {
            for x in 10..40 {
                next.set_pixel(x, y, [1, 2, 3]);
            }
        }
        assert_eq!(next.diff(&prev), vec![Rect::new(0, 0, 48, 48)]);
    }

    #[test]
    fn edge_tiles_are_clipped() {
        let prev = solid(20, 20, 0);
        let mut next = prev.clone();
        next.set_pixel(19, 19, [9, 9, 9]);
        assert_eq!(next.diff(&prev), vec![Rect::new(16, 16, 4, 4)]);
    }

    #[test]
    fn geometry_change_is_full_diff() {
        let prev = solid(10, 10, 0);
        let next = solid(12, 10, 0);
        assert_eq!(next.diff(&prev), vec![next.bounds()]);
    }

    #[test]
    fn oversized_rect_clips_without_overflow() {
        let huge = Rect::new(10, 5, u32::MAX, u32::MAX);
        assert_eq!(huge.right(), u32::MAX);
        assert_eq!(huge.bottom(), u32::MAX);
        assert_eq!(huge.clipped(64, 48), Rect::new(10, 5, 54, 43));
        assert_eq!(huge.rotated_180(64, 48), Rect::new(0, 0, 54, 43));
    }

    #[test]
    fn rotation_maps_pixels_and_regions() {
        let mut frame = solid(4, 2, 0).with_dirty_regions(vec![Rect::new(0, 0, 1, 1)]);
        frame.set_pixel(0, 0, [7, 7, 7]);
        let turned = frame.rotated_180();
        assert_eq!(turned.pixel(3, 1), Some([7, 7, 7]));
        assert_eq!(turned.dirty_regions(), Some(&[Rect::new(3, 1, 1, 1)][..]));
    }

    #[test]
    fn checksum_ignores_dirty_marks() {
        let frame = solid(8, 8, 3);
        let marked = frame.clone().with_dirty_regions(vec![Rect::new(0, 0, 8, 8)]);
        assert_eq!(frame.checksum(), marked.checksum());
        assert_ne!(frame.checksum(), solid(8, 8, 4).checksum());
    }

    #[test]
    fn rgb565_packs_channels() {
        assert_eq!(rgb565([255, 255, 255]), 0xFFFF);
        assert_eq!(rgb565([255, 0, 0]), 0xF800);
        assert_eq!(rgb565([0, 255, 0]), 0x07E0);
        assert_eq!(rgb565([0, 0, 255]), 0x001F);
    }

    proptest! {
        #[test]
        fn applying_diff_reconstructs_next_frame(
            w in 1u32..70,
            h in 1u32..70,
            edits in proptest::collection::vec((0u32..70, 0u32..70, any::<[u8; 3]>()), 0..40),
        ) {
            let prev = solid(w, h, 0);
            let mut next = prev.clone();
            for (x, y, rgb) in edits {
                next.set_pixel(x % w, y % h, rgb);
            }
            let regions = next.diff(&prev);
            let mut rebuilt = prev.clone();
            rebuilt.apply_regions(&next, &regions);
            prop_assert_eq!(rebuilt.as_rgb(), next.as_rgb());
        }
    }
}
