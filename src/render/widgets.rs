//! Drawing routines for each widget kind, on top of `embedded-graphics`.

use std::{collections::VecDeque, convert::Infallible};

use embedded_graphics::{
    mono_font::{
        iso_8859_1::{FONT_10X20, FONT_6X10, FONT_8X13},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Arc as ArcShape, Polyline, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle, StrokeAlignment},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};

use crate::theme::{Align, BarSpec, Color, Direction, FontSize, GraphSpec, RadialSpec};

use super::{format::fill_ratio, Frame, Rect};

fn done<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

fn rectangle(r: Rect) -> Rectangle {
    Rectangle::new(Point::new(r.x as i32, r.y as i32), Size::new(r.width, r.height))
}

pub fn font(size: FontSize) -> &'static MonoFont<'static> {
    match size {
        FontSize::Small => &FONT_6X10,
        FontSize::Medium => &FONT_8X13,
        FontSize::Large => &FONT_10X20,
    }
}

/// Pixels of a bar's inner length covered at `ratio`.
pub fn bar_fill(ratio: f64, inner: u32) -> u32 {
    ((ratio.clamp(0.0, 1.0) * inner as f64).round() as u32).min(inner)
}

fn fill(frame: &mut Frame, area: Rect, color: Rgb888) {
    done(
        rectangle(area)
            .into_styled(PrimitiveStyle::with_fill(color))
            .draw(frame),
    );
}

/// Single line of text, vertically centred in `area` and clipped to it.
pub fn draw_text(frame: &mut Frame, area: Rect, text: &str, size: FontSize, align: Align, color: Color) {
    let clip = rectangle(area);
    let mut target = frame.clipped(&clip);
    let (x, alignment) = match align {
        Align::Left => (area.x as i32, Alignment::Left),
        Align::Center => ((area.x + area.width / 2) as i32, Alignment::Center),
        Align::Right => (area.right() as i32 - 1, Alignment::Right),
    };
    let y = (area.y + area.height / 2) as i32;
    let style = TextStyleBuilder::new()
        .alignment(alignment)
        .baseline(Baseline::Middle)
        .build();
    let character = MonoTextStyle::new(font(size), color.rgb888());
    done(Text::with_text_style(text, Point::new(x, y), character, style).draw(&mut target));
}

/// Track, optional outline, then the fill. Without a value the track carries
/// `placeholder` instead, so a missing reading never reads as 0%.
pub fn draw_bar(frame: &mut Frame, spec: &BarSpec, value: Option<f64>, placeholder: &str) {
    let area = spec.area.rect();
    let inner = match spec.outline {
        Some(outline) if area.width > 2 && area.height > 2 => {
            let style = PrimitiveStyleBuilder::new()
                .stroke_color(outline.rgb888())
                .stroke_width(1)
                .stroke_alignment(StrokeAlignment::Inside)
                .build();
            done(rectangle(area).into_styled(style).draw(frame));
            Rect::new(area.x + 1, area.y + 1, area.width - 2, area.height - 2)
        }
        _ => area,
    };
    if let Some(track) = spec.track_color {
        fill(frame, inner, track.rgb888());
    }
    let Some(value) = value else {
        draw_text(frame, inner, placeholder, FontSize::Small, Align::Center, spec.color);
        return;
    };
    let ratio = fill_ratio(value, spec.min, spec.max);
    let filled = match spec.direction {
        Direction::Horizontal => {
            Rect::new(inner.x, inner.y, bar_fill(ratio, inner.width), inner.height)
        }
        Direction::Vertical => {
            let h = bar_fill(ratio, inner.height);
            Rect::new(inner.x, inner.bottom() - h, inner.width, h)
        }
    };
    if !filled.is_empty() {
        fill(frame, filled, spec.color.rgb888());
    }
}

/// Arc gauge with an optional centred label.
pub fn draw_radial(frame: &mut Frame, spec: &RadialSpec, value: Option<f64>, label: Option<&str>) {
    let area = spec.area.rect();
    let diameter = area.width.min(area.height);
    let top_left = Point::new(
        (area.x + (area.width - diameter) / 2) as i32,
        (area.y + (area.height - diameter) / 2) as i32,
    );
    let stroke = |color: Color| {
        PrimitiveStyleBuilder::new()
            .stroke_color(color.rgb888())
            .stroke_width(spec.thickness.max(1))
            .stroke_alignment(StrokeAlignment::Inside)
            .build()
    };
    let start = spec.start_angle.deg();
    {
        let clip = rectangle(area);
        let mut target = frame.clipped(&clip);
        if let Some(track) = spec.track_color {
            done(
                ArcShape::new(top_left, diameter, start, spec.sweep.deg())
                    .into_styled(stroke(track))
                    .draw(&mut target),
            );
        }
        if let Some(value) = value {
            let ratio = fill_ratio(value, spec.min, spec.max) as f32;
            if ratio > 0.0 {
                done(
                    ArcShape::new(top_left, diameter, start, (spec.sweep * ratio).deg())
                        .into_styled(stroke(spec.color))
                        .draw(&mut target),
                );
            }
        }
    }
    if let Some(label) = label {
        draw_text(frame, area, label, spec.font, Align::Center, spec.text_color);
    }
}

/// Top of the graph scale: the fixed max, or the largest sample.
pub fn graph_top(spec: &GraphSpec, samples: &VecDeque<f64>) -> f64 {
    match spec.max {
        Some(max) => max,
        None => {
            let peak = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if peak > spec.min {
                peak
            } else {
                spec.min + 1.0
            }
        }
    }
}

/// Line graph of `samples`, newest at the right edge.
pub fn draw_graph(frame: &mut Frame, spec: &GraphSpec, samples: &VecDeque<f64>) {
    let area = spec.area.rect();
    if samples.is_empty() || area.width < 2 || area.height < 2 {
        return;
    }
    let top = graph_top(spec, samples);
    let step = (area.width - 1) as f64 / (spec.history.max(2) - 1) as f64;
    let newest = samples.len() - 1;
    let points: Vec<Point> = samples
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let ratio = fill_ratio(*v, spec.min, top);
            let x = (area.right() - 1) as f64 - (newest - i) as f64 * step;
            let y = (area.bottom() - 1) as f64 - ratio * (area.height - 1) as f64;
            Point::new(x.round() as i32, y.round() as i32)
        })
        .collect();

    let clip = rectangle(area);
    let mut target = frame.clipped(&clip);
    let color = spec.color.rgb888();
    if let [only] = points.as_slice() {
        done(Pixel(*only, color).draw(&mut target));
    } else {
        done(
            Polyline::new(&points)
                .into_styled(PrimitiveStyle::with_stroke(color, spec.line_width.max(1)))
                .draw(&mut target),
        );
    }
}
