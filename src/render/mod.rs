//! Frame buffers and the theme compositor.

pub mod compositor;
pub mod format;
pub mod frame;
pub mod widgets;

pub use compositor::Compositor;
pub use format::fill_ratio;
pub use frame::{rgb565, Frame, Rect, DIFF_TILE};
