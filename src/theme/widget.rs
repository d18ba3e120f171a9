//! Widget definitions as written in `theme.toml`.

use std::{path::PathBuf, time::Duration};

use embedded_graphics::pixelcolor::Rgb888;
use image::RgbaImage;
use serde::Deserialize;

use crate::{render::Rect, sensors::MetricId};

/// `#RRGGBB` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0]);
    pub const WHITE: Color = Color([255, 255, 255]);
    pub const GREY: Color = Color([64, 64, 64]);

    pub fn rgb888(&self) -> Rgb888 {
        Rgb888::new(self.0[0], self.0[1], self.0[2])
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let hex = raw.trim().trim_start_matches('#');
        let parse = |i: usize| u8::from_str_radix(hex.get(i..i + 2).unwrap_or("zz"), 16);
        match (hex.len(), parse(0), parse(2), parse(4)) {
            (6, Ok(r), Ok(g), Ok(b)) => Ok(Color([r, g, b])),
            _ => Err(format!("invalid color '{raw}' (expected #RRGGBB)")),
        }
    }
}

/// Position and size of a widget. Each widget owns this rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Area {
    pub x: u32,
    pub y: u32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl Area {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Horizontal,
    Vertical,
}

fn default_max() -> f64 {
    100.0
}

fn default_white() -> Color {
    Color::WHITE
}

fn default_true() -> bool {
    true
}

fn default_start_angle() -> f32 {
    135.0
}

fn default_sweep() -> f32 {
    270.0
}

fn default_thickness() -> u32 {
    8
}

fn default_history() -> usize {
    32
}

fn default_line_width() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageSpec {
    #[serde(flatten)]
    pub area: Area,
    /// Relative to the theme directory.
    pub path: PathBuf,
}

/// Static text, or a metric formatted as `prefix value [unit] suffix`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextSpec {
    #[serde(flatten)]
    pub area: Area,
    pub metric: Option<MetricId>,
    pub text: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default = "default_true")]
    pub show_unit: bool,
    #[serde(default)]
    pub font: FontSize,
    #[serde(default)]
    pub align: Align,
    #[serde(default = "default_white")]
    pub color: Color,
    /// Seconds between polls of `metric`; tightens the theme's `[stats]` interval.
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BarSpec {
    #[serde(flatten)]
    pub area: Area,
    pub metric: MetricId,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_white")]
    pub color: Color,
    pub track_color: Option<Color>,
    pub outline: Option<Color>,
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RadialSpec {
    #[serde(flatten)]
    pub area: Area,
    pub metric: MetricId,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    /// Degrees, clockwise from 3 o'clock.
    #[serde(default = "default_start_angle")]
    pub start_angle: f32,
    #[serde(default = "default_sweep")]
    pub sweep: f32,
    #[serde(default = "default_thickness")]
    pub thickness: u32,
    #[serde(default = "default_white")]
    pub color: Color,
    pub track_color: Option<Color>,
    #[serde(default = "default_true")]
    pub show_value: bool,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub font: FontSize,
    #[serde(default = "default_white")]
    pub text_color: Color,
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphSpec {
    #[serde(flatten)]
    pub area: Area,
    pub metric: MetricId,
    #[serde(default)]
    pub min: f64,
    /// Fixed top of the scale; scales to the largest sample when absent.
    pub max: Option<f64>,
    /// Samples kept in the ring buffer.
    #[serde(default = "default_history")]
    pub history: usize,
    #[serde(default = "default_white")]
    pub color: Color,
    #[serde(default = "default_line_width")]
    pub line_width: u32,
    pub interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetSpec {
    Image(ImageSpec),
    Text(TextSpec),
    Bar(BarSpec),
    Radial(RadialSpec),
    Graph(GraphSpec),
}

/// A widget ready to draw: specs validated, assets decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    Image { area: Rect, pixels: RgbaImage },
    Text(TextSpec),
    Bar(BarSpec),
    Radial(RadialSpec),
    Graph(GraphSpec),
}

impl Widget {
    pub fn area(&self) -> Rect {
        match self {
            Widget::Image { area, .. } => *area,
            Widget::Text(spec) => spec.area.rect(),
            Widget::Bar(spec) => spec.area.rect(),
            Widget::Radial(spec) => spec.area.rect(),
            Widget::Graph(spec) => spec.area.rect(),
        }
    }

    pub fn metric(&self) -> Option<&MetricId> {
        match self {
            Widget::Image { .. } => None,
            Widget::Text(spec) => spec.metric.as_ref(),
            Widget::Bar(spec) => Some(&spec.metric),
            Widget::Radial(spec) => Some(&spec.metric),
            Widget::Graph(spec) => Some(&spec.metric),
        }
    }

    /// Refresh interval as written in the theme, if any.
    pub fn raw_interval(&self) -> Option<f64> {
        match self {
            Widget::Image { .. } => None,
            Widget::Text(spec) => spec.interval,
            Widget::Bar(spec) => spec.interval,
            Widget::Radial(spec) => spec.interval,
            Widget::Graph(spec) => spec.interval,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.raw_interval()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Widget::Image { .. } => "image",
            Widget::Text(_) => "text",
            Widget::Bar(_) => "bar",
            Widget::Radial(_) => "radial",
            Widget::Graph(_) => "graph",
        }
    }
}
