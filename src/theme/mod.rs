//! Theme model and loader.
//!
//! A theme lives in `<themes dir>/<name>/theme.toml` next to its image
//! assets. It declares the display geometry, a background, the placeholder
//! drawn for missing data, the poll interval of every stat group, and an
//! ordered list of widgets. Widgets are drawn in declaration order, so later
//! widgets overlay earlier ones.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    render::{Frame, Rect},
    sensors::{MetricId, StatGroup},
    Error, Result,
};

pub mod widget;

pub use widget::{
    Align, Area, BarSpec, Color, Direction, FontSize, GraphSpec, ImageSpec, RadialSpec, TextSpec,
    Widget, WidgetSpec,
};

pub const THEME_FILE: &str = "theme.toml";
pub const DEFAULT_PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

fn positive(seconds: f64) -> Option<Duration> {
    (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// Poll intervals in seconds, keyed by stat group (`cpu = 1`) or by a single
/// metric (`"cpu.frequency" = 5`). Absent or non-positive intervals disable
/// a group; a metric key polls that metric on its own schedule, even when
/// its group is disabled.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>")]
pub struct StatIntervals {
    groups: BTreeMap<StatGroup, f64>,
    metrics: BTreeMap<MetricId, f64>,
}

impl TryFrom<BTreeMap<String, f64>> for StatIntervals {
    type Error = String;

    fn try_from(raw: BTreeMap<String, f64>) -> std::result::Result<Self, Self::Error> {
        let mut stats = Self::default();
        for (key, seconds) in raw {
            let metric = MetricId::new(key.as_str());
            match metric.group() {
                Some(group) if group.as_str() == key => {
                    stats.groups.insert(group, seconds);
                }
                Some(_) => {
                    stats.metrics.insert(metric, seconds);
                }
                None => return Err(format!("unknown stat group or metric '{key}'")),
            }
        }
        Ok(stats)
    }
}

impl StatIntervals {
    pub fn get(&self, group: StatGroup) -> Option<Duration> {
        self.groups.get(&group).copied().and_then(positive)
    }

    pub fn set(&mut self, group: StatGroup, seconds: f64) -> &mut Self {
        self.groups.insert(group, seconds);
        self
    }

    /// Interval of a single metric, when it has its own.
    pub fn metric(&self, metric: &MetricId) -> Option<Duration> {
        self.metrics.get(metric).copied().and_then(positive)
    }

    pub fn set_metric(&mut self, metric: impl Into<MetricId>, seconds: f64) -> &mut Self {
        self.metrics.insert(metric.into(), seconds);
        self
    }

    /// Poll `metric` at least every `interval`.
    pub fn tighten_metric(&mut self, metric: &MetricId, interval: Duration) {
        let seconds = interval.as_secs_f64();
        let current = self.metric(metric).map(|d| d.as_secs_f64());
        if current.map_or(true, |current| seconds < current) {
            self.metrics.insert(metric.clone(), seconds);
        }
    }

    /// Metrics of `group` with their own usable interval.
    pub fn metric_overrides(&self, group: StatGroup) -> impl Iterator<Item = (&MetricId, Duration)> + '_ {
        self.metrics
            .iter()
            .filter(move |(metric, _)| metric.group() == Some(group))
            .filter_map(|(metric, seconds)| positive(*seconds).map(|d| (metric, d)))
    }

    /// Groups with a usable interval, in declaration order of [`StatGroup`].
    pub fn enabled(&self) -> impl Iterator<Item = (StatGroup, Duration)> + '_ {
        StatGroup::ALL
            .into_iter()
            .filter_map(|group| self.get(group).map(|interval| (group, interval)))
    }

    /// Groups with a usable interval or at least one metric override.
    pub fn polled(&self) -> impl Iterator<Item = StatGroup> + '_ {
        StatGroup::ALL.into_iter().filter(|group| {
            self.get(*group).is_some() || self.metric_overrides(*group).next().is_some()
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DisplaySection {
    width: u32,
    height: u32,
    #[serde(default)]
    orientation: Orientation,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackgroundSection {
    #[serde(default = "black")]
    color: Color,
    image: Option<PathBuf>,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            image: None,
        }
    }
}

fn black() -> Color {
    Color::BLACK
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThemeFile {
    display: DisplaySection,
    #[serde(default)]
    background: BackgroundSection,
    #[serde(default = "default_placeholder")]
    placeholder: String,
    #[serde(default)]
    stats: StatIntervals,
    #[serde(default, rename = "widget")]
    widgets: Vec<WidgetSpec>,
}

/// A loaded theme. Immutable once built.
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub placeholder: String,
    pub stats: StatIntervals,
    background: Frame,
    widgets: Vec<Widget>,
}

impl Theme {
    /// Load `<directory>/<name>/theme.toml`.
    pub fn load(directory: &Path, name: &str) -> Result<Self> {
        let base = directory.join(name);
        let path = base.join(THEME_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::Theme(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(name, &raw, &base)
    }

    /// Build a theme from TOML text; asset paths resolve against `base_dir`.
    pub fn from_toml(name: &str, raw: &str, base_dir: &Path) -> Result<Self> {
        let file: ThemeFile =
            toml::from_str(raw).map_err(|e| Error::Theme(format!("{name}: {e}")))?;
        let DisplaySection {
            width,
            height,
            orientation,
        } = file.display;
        if width == 0 || height == 0 {
            return Err(Error::Theme(format!(
                "{name}: display geometry must be non-zero (got {width}x{height})"
            )));
        }

        let mut background = Frame::new(width, height, file.background.color.rgb888());
        if let Some(image) = &file.background.image {
            let pixels = load_asset(base_dir, image)?;
            blend_into(&mut background, &pixels, 0, 0);
        }

        let widgets = file
            .widgets
            .into_iter()
            .enumerate()
            .map(|(index, spec)| resolve_widget(name, index, spec, base_dir, width, height))
            .collect::<Result<Vec<_>>>()?;

        let mut stats = file.stats;
        for widget in &widgets {
            if let (Some(metric), Some(interval)) = (widget.metric(), widget.interval()) {
                stats.tighten_metric(metric, interval);
            }
        }

        log::debug!(
            "theme {name}: {width}x{height} {orientation:?}, {} widgets",
            widgets.len()
        );
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            orientation,
            placeholder: file.placeholder,
            stats,
            background,
            widgets,
        })
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    /// Background pixels at display resolution.
    pub fn background(&self) -> &Frame {
        &self.background
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

fn load_asset(base_dir: &Path, relative: &Path) -> Result<image::RgbaImage> {
    let path = base_dir.join(relative);
    let decoded = image::open(&path)
        .map_err(|e| Error::Theme(format!("cannot load asset {}: {e}", path.display())))?;
    Ok(decoded.to_rgba8())
}

/// Alpha-blend `pixels` onto `frame` with the top-left corner at (`x`, `y`).
pub(crate) fn blend_into(frame: &mut Frame, pixels: &image::RgbaImage, x: u32, y: u32) {
    for (px, py, rgba) in pixels.enumerate_pixels() {
        let [r, g, b, a] = rgba.0;
        if a == 0 {
            continue;
        }
        let (tx, ty) = (x.saturating_add(px), y.saturating_add(py));
        let Some(under) = frame.pixel(tx, ty) else {
            continue;
        };
        let mix = |top: u8, bottom: u8| {
            ((top as u32 * a as u32 + bottom as u32 * (255 - a as u32)) / 255) as u8
        };
        frame.set_pixel(tx, ty, [mix(r, under[0]), mix(g, under[1]), mix(b, under[2])]);
    }
}

fn check_range(name: &str, index: usize, kind: &str, min: f64, max: Option<f64>) -> Result<()> {
    let ok = min.is_finite() && max.map_or(true, |max| max.is_finite() && max > min);
    if ok {
        Ok(())
    } else {
        Err(Error::Theme(format!(
            "{name}: widget #{index} ({kind}) needs min < max"
        )))
    }
}

fn resolve_widget(
    name: &str,
    index: usize,
    spec: WidgetSpec,
    base_dir: &Path,
    width: u32,
    height: u32,
) -> Result<Widget> {
    let widget = match spec {
        WidgetSpec::Image(ImageSpec { area, path }) => {
            let mut pixels = load_asset(base_dir, &path)?;
            let w = if area.width == 0 { pixels.width() } else { area.width };
            let h = if area.height == 0 { pixels.height() } else { area.height };
            if (w, h) != pixels.dimensions() {
                pixels =
                    image::imageops::resize(&pixels, w, h, image::imageops::FilterType::Triangle);
            }
            Widget::Image {
                area: Rect::new(area.x, area.y, w, h),
                pixels,
            }
        }
        WidgetSpec::Text(spec) => {
            if spec.metric.is_none() && spec.text.is_none() {
                return Err(Error::Theme(format!(
                    "{name}: text widget #{index} needs `metric` or `text`"
                )));
            }
            Widget::Text(spec)
        }
        WidgetSpec::Bar(spec) => {
            check_range(name, index, "bar", spec.min, Some(spec.max))?;
            Widget::Bar(spec)
        }
        WidgetSpec::Radial(spec) => {
            check_range(name, index, "radial", spec.min, Some(spec.max))?;
            Widget::Radial(spec)
        }
        WidgetSpec::Graph(spec) => {
            check_range(name, index, "graph", spec.min, spec.max)?;
            if spec.history < 2 {
                return Err(Error::Theme(format!(
                    "{name}: graph widget #{index} needs history >= 2"
                )));
            }
            Widget::Graph(spec)
        }
    };

    if let Some(seconds) = widget.raw_interval() {
        if positive(seconds).is_none() {
            return Err(Error::Theme(format!(
                "{name}: {} widget #{index} needs a positive interval (got {seconds})",
                widget.kind()
            )));
        }
    }
    let area = widget.area();
    if area.is_empty() {
        return Err(Error::Theme(format!(
            "{name}: {} widget #{index} has an empty area",
            widget.kind()
        )));
    }
    if area.x as u64 + area.width as u64 > width as u64
        || area.y as u64 + area.height as u64 > height as u64
    {
        return Err(Error::Theme(format!(
            "{name}: {} widget #{index} ({}x{} at {},{}) exceeds the {width}x{height} display",
            widget.kind(),
            area.width,
            area.height,
            area.x,
            area.y,
        )));
    }
    Ok(widget)
}
