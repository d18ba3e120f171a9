//! Turns a theme plus a sensor snapshot into a frame.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::SystemTime,
};

use crate::{
    config::StalePolicy,
    sensors::{MetricId, MetricState, SensorReading, SensorSnapshot},
    theme::{blend_into, Align, Theme, Widget},
};

use super::{
    format::{fill_ratio, format_reading},
    widgets, Frame,
};

#[derive(Debug, Default)]
struct GraphHistory {
    samples: VecDeque<f64>,
    last_timestamp: Option<SystemTime>,
}

/// Draws the theme's widgets in declaration order.
///
/// The only state carried between renders is the sample history of graph
/// widgets, which grows only when the bound reading's timestamp advances.
/// Rendering the same snapshot twice therefore yields identical pixels.
pub struct Compositor {
    theme: Arc<Theme>,
    policy: StalePolicy,
    histories: HashMap<usize, GraphHistory>,
}

impl Compositor {
    pub fn new(theme: Arc<Theme>, policy: StalePolicy) -> Self {
        Self {
            theme,
            policy,
            histories: HashMap::new(),
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    /// The reading a widget should show, or `None` for the placeholder.
    pub fn resolve<'s>(&self, snapshot: &'s SensorSnapshot, metric: &MetricId) -> Option<&'s SensorReading> {
        let reading = match snapshot.get(metric)? {
            MetricState::Fresh { reading } => Some(reading),
            MetricState::Stale { last, .. } => match self.policy {
                StalePolicy::LastKnown => last.as_ref(),
                StalePolicy::Placeholder => None,
            },
            MetricState::Unavailable { .. } => None,
        }?;
        reading.valid.then_some(reading)
    }

    /// Fill ratio a bar or radial widget would draw for `snapshot`.
    pub fn gauge_ratio(&self, widget_index: usize, snapshot: &SensorSnapshot) -> Option<f64> {
        let (metric, min, max) = match self.theme.widgets().get(widget_index)? {
            Widget::Bar(spec) => (&spec.metric, spec.min, spec.max),
            Widget::Radial(spec) => (&spec.metric, spec.min, spec.max),
            _ => return None,
        };
        let value = self.resolve(snapshot, metric)?.value.as_f64()?;
        Some(fill_ratio(value, min, max))
    }

    /// Samples currently held for the graph at `widget_index`.
    pub fn graph_samples(&self, widget_index: usize) -> Vec<f64> {
        self.histories
            .get(&widget_index)
            .map(|h| h.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Render `snapshot`. With `previous` available and `partial` set, the
    /// frame carries the regions that changed since `previous`.
    pub fn render(
        &mut self,
        snapshot: &SensorSnapshot,
        previous: Option<&Frame>,
        partial: bool,
    ) -> Frame {
        let theme = Arc::clone(&self.theme);
        let mut frame = theme.background().clone().into_full();

        for (index, widget) in theme.widgets().iter().enumerate() {
            match widget {
                Widget::Image { area, pixels } => blend_into(&mut frame, pixels, area.x, area.y),
                Widget::Text(spec) => {
                    let body = match (&spec.metric, &spec.text) {
                        (Some(metric), _) => match self.resolve(snapshot, metric) {
                            Some(reading) => format_reading(reading, spec.decimals, spec.show_unit),
                            None => theme.placeholder.clone(),
                        },
                        (None, Some(text)) => text.clone(),
                        (None, None) => theme.placeholder.clone(),
                    };
                    let label = format!("{}{}{}", spec.prefix, body, spec.suffix);
                    widgets::draw_text(
                        &mut frame,
                        spec.area.rect(),
                        &label,
                        spec.font,
                        spec.align,
                        spec.color,
                    );
                }
                Widget::Bar(spec) => {
                    let value = self
                        .resolve(snapshot, &spec.metric)
                        .and_then(|r| r.value.as_f64());
                    widgets::draw_bar(&mut frame, spec, value, &theme.placeholder);
                }
                Widget::Radial(spec) => {
                    let reading = self.resolve(snapshot, &spec.metric);
                    let value = reading.and_then(|r| r.value.as_f64());
                    let label = match reading {
                        Some(r) if spec.show_value => Some(format!(
                            "{}{}",
                            format_reading(r, spec.decimals, false),
                            spec.suffix
                        )),
                        Some(_) => None,
                        None => Some(theme.placeholder.clone()),
                    };
                    widgets::draw_radial(&mut frame, spec, value, label.as_deref());
                }
                Widget::Graph(spec) => {
                    let sample = self
                        .resolve(snapshot, &spec.metric)
                        .and_then(|r| r.value.as_f64().map(|v| (v, r.timestamp)));
                    let history = self.histories.entry(index).or_default();
                    if let Some((value, timestamp)) = sample {
                        if history.last_timestamp.map_or(true, |last| timestamp > last) {
                            history.samples.push_back(value);
                            while history.samples.len() > spec.history {
                                history.samples.pop_front();
                            }
                            history.last_timestamp = Some(timestamp);
                        }
                    }
                    if history.samples.is_empty() {
                        widgets::draw_text(
                            &mut frame,
                            spec.area.rect(),
                            &theme.placeholder,
                            crate::theme::FontSize::Small,
                            Align::Center,
                            spec.color,
                        );
                    } else {
                        widgets::draw_graph(&mut frame, spec, &history.samples);
                    }
                }
            }
        }

        match previous {
            Some(previous) if partial => {
                let regions = frame.diff(previous);
                frame.with_dirty_regions(regions)
            }
            _ => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        render::Rect,
        sensors::{SensorReading, CPU_PERCENTAGE},
    };
    use std::{path::Path, time::Duration};

    const THEME: &str = r##"
        [display]
        width = 120
        height = 60

        [[widget]]
        type = "bar"
        x = 0
        y = 0
        width = 100
        height = 10
        metric = "cpu.percentage"
        color = "#FFFFFF"

        [[widget]]
        type = "text"
        x = 0
        y = 20
        width = 120
        height = 16
        metric = "cpu.percentage"

        [[widget]]
        type = "graph"
        x = 0
        y = 40
        width = 120
        height = 20
        metric = "cpu.percentage"
        history = 4
        max = 100
    "##;

    fn compositor(policy: StalePolicy) -> Compositor {
        let theme = Theme::from_toml("t", THEME, Path::new(".")).unwrap();
        Compositor::new(Arc::new(theme), policy)
    }

    fn cpu(value: f64, secs: u64) -> SensorReading {
        SensorReading::number(CPU_PERCENTAGE, value, "%")
            .at(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn stale(value: f64) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::new();
        snapshot.insert(
            CPU_PERCENTAGE.into(),
            MetricState::Stale {
                last: Some(cpu(value, 1)),
                failures: 1,
            },
        );
        snapshot
    }

    fn lit_in_row(frame: &Frame, row: u32) -> usize {
        (0..100)
            .filter(|x| frame.pixel(*x, row) == Some([255, 255, 255]))
            .count()
    }

    #[test]
    fn rendering_is_deterministic() {
        let snapshot = SensorSnapshot::from_readings([cpu(37.0, 1)]);
        let mut c = compositor(StalePolicy::Placeholder);
        let a = c.render(&snapshot, None, false);
        let b = c.render(&snapshot, None, false);
        assert_eq!(a.as_rgb(), b.as_rgb());
        assert_eq!(c.graph_samples(2), vec![37.0]);
    }

    #[test]
    fn bar_ratio_follows_reading() {
        let snapshot = SensorSnapshot::from_readings([cpu(37.0, 1)]);
        let mut c = compositor(StalePolicy::Placeholder);
        assert_eq!(c.gauge_ratio(0, &snapshot), Some(0.37));
        let frame = c.render(&snapshot, None, false);
        assert_eq!(lit_in_row(&frame, 5), 37);
    }

    #[test]
    fn stale_placeholder_policy_hides_value() {
        let c = compositor(StalePolicy::Placeholder);
        let snapshot = stale(80.0);
        assert_eq!(c.resolve(&snapshot, &CPU_PERCENTAGE.into()), None);
        assert_eq!(c.gauge_ratio(0, &snapshot), None);
    }

    #[test]
    fn stale_last_known_policy_keeps_value() {
        let mut c = compositor(StalePolicy::LastKnown);
        let snapshot = stale(80.0);
        assert_eq!(c.gauge_ratio(0, &snapshot), Some(0.8));
        let frame = c.render(&snapshot, None, false);
        assert_eq!(lit_in_row(&frame, 5), 80);
    }

    #[test]
    fn unavailable_is_always_placeholder() {
        let c = compositor(StalePolicy::LastKnown);
        let mut snapshot = SensorSnapshot::new();
        snapshot.insert(CPU_PERCENTAGE.into(), MetricState::Unavailable { failures: 3 });
        assert_eq!(c.gauge_ratio(0, &snapshot), None);
    }

    #[test]
    fn unavailable_bar_differs_from_zero_bar() {
        let bar = Rect::new(0, 0, 100, 10);
        let mut unavailable = SensorSnapshot::new();
        unavailable.insert(CPU_PERCENTAGE.into(), MetricState::Unavailable { failures: 3 });
        let missing = compositor(StalePolicy::LastKnown).render(&unavailable, None, false);
        let zero = compositor(StalePolicy::LastKnown)
            .render(&SensorSnapshot::from_readings([cpu(0.0, 1)]), None, false);

        assert_eq!(lit_in_row(&zero, 5), 0);
        assert!(!missing.region_pixels(bar).eq(zero.region_pixels(bar)));
    }

    #[test]
    fn radial_without_value_label_still_shows_placeholder() {
        let raw = r##"
            placeholder = "n/a"
            [display]
            width = 60
            height = 60
            [[widget]]
            type = "radial"
            x = 0
            y = 0
            width = 60
            height = 60
            metric = "cpu.percentage"
            show_value = false
        "##;
        let theme = Arc::new(Theme::from_toml("r", raw, Path::new(".")).unwrap());
        let mut c = Compositor::new(Arc::clone(&theme), StalePolicy::Placeholder);
        let missing = c.render(&SensorSnapshot::new(), None, false);
        let zero = c.render(&SensorSnapshot::from_readings([cpu(0.0, 1)]), None, false);

        assert_eq!(&zero, theme.background());
        assert_ne!(missing, zero);
    }

    #[test]
    fn graph_appends_only_on_new_timestamps() {
        let mut c = compositor(StalePolicy::Placeholder);
        for (i, v) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            let snapshot = SensorSnapshot::from_readings([cpu(v, i as u64 + 1)]);
            c.render(&snapshot, None, false);
            c.render(&snapshot, None, false);
        }
        assert_eq!(c.graph_samples(2), vec![20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn partial_render_reconstructs_full_render() {
        let mut c = compositor(StalePolicy::Placeholder);
        let first = c.render(&SensorSnapshot::from_readings([cpu(10.0, 1)]), None, true);
        assert!(!first.is_partial());

        let next_snapshot = SensorSnapshot::from_readings([cpu(60.0, 2)]);
        let diffed = c.render(&next_snapshot, Some(&first), true);
        let regions = diffed.dirty_regions().unwrap().to_vec();
        assert!(!regions.is_empty());

        let mut rebuilt = first.clone();
        rebuilt.apply_regions(&diffed, &regions);
        assert_eq!(rebuilt.as_rgb(), diffed.as_rgb());
    }

    #[test]
    fn no_partial_without_capability() {
        let mut c = compositor(StalePolicy::Placeholder);
        let snapshot = SensorSnapshot::from_readings([cpu(10.0, 1)]);
        let first = c.render(&snapshot, None, false);
        assert!(!c.render(&snapshot, Some(&first), false).is_partial());
    }
}
