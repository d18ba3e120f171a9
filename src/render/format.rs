//! Value formatting and gauge math shared by the widgets.

use crate::sensors::{SensorReading, SensorValue};

/// Position of `value` between `min` and `max`, clamped to `[0, 1]`.
/// Non-finite input and degenerate ranges map to 0.
pub fn fill_ratio(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if !value.is_finite() || !span.is_finite() || span <= 0.0 {
        return 0.0;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}

fn binary_prefixed(value: f64, units: &[&str; 5]) -> String {
    let mut value = value.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < units.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", units[0])
    } else {
        format!("{value:.1} {}", units[unit])
    }
}

/// Render a byte rate with a binary prefix, e.g. `1.2 MiB/s`.
pub fn human_rate(bytes_per_sec: f64) -> String {
    binary_prefixed(bytes_per_sec, &["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"])
}

/// Render a byte count with a binary prefix, e.g. `4.7 GiB`.
pub fn human_bytes(bytes: f64) -> String {
    binary_prefixed(bytes, &["B", "KiB", "MiB", "GiB", "TiB"])
}

/// Format a reading for a text label. Text readings pass through verbatim.
pub fn format_reading(reading: &SensorReading, decimals: u8, show_unit: bool) -> String {
    match &reading.value {
        SensorValue::Text(text) => text.clone(),
        SensorValue::Number(v) if show_unit && reading.unit == "B/s" => human_rate(*v),
        SensorValue::Number(v) if show_unit && reading.unit == "B" => human_bytes(*v),
        SensorValue::Number(v) => {
            let number = format!("{:.*}", decimals as usize, v);
            if !show_unit || reading.unit.is_empty() {
                number
            } else if reading.unit.starts_with('%') || reading.unit.starts_with('°') {
                format!("{number}{}", reading.unit)
            } else {
                format!("{number} {}", reading.unit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_clamped() {
        assert_eq!(fill_ratio(50.0, 0.0, 100.0), 0.5);
        assert_eq!(fill_ratio(-5.0, 0.0, 100.0), 0.0);
        assert_eq!(fill_ratio(250.0, 0.0, 100.0), 1.0);
        assert_eq!(fill_ratio(30.0, 20.0, 40.0), 0.5);
    }

    #[test]
    fn ratio_of_nonsense_is_zero() {
        assert_eq!(fill_ratio(f64::NAN, 0.0, 100.0), 0.0);
        assert_eq!(fill_ratio(10.0, 5.0, 5.0), 0.0);
        assert_eq!(fill_ratio(10.0, 50.0, 5.0), 0.0);
    }

    #[test]
    fn units_attach_the_usual_way() {
        let pct = SensorReading::number("cpu.percentage", 42.345, "%");
        assert_eq!(format_reading(&pct, 1, true), "42.3%");
        assert_eq!(format_reading(&pct, 0, false), "42");
        let freq = SensorReading::number("cpu.frequency", 3600.0, "MHz");
        assert_eq!(format_reading(&freq, 0, true), "3600 MHz");
        let temp = SensorReading::number("cpu.temperature", 51.0, "°C");
        assert_eq!(format_reading(&temp, 0, true), "51°C");
    }

    #[test]
    fn rates_are_scaled() {
        assert_eq!(human_rate(512.0), "512 B/s");
        assert_eq!(human_rate(1536.0), "1.5 KiB/s");
        assert_eq!(human_rate(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
        let rate = SensorReading::number("net.eth0.download_rate", 2048.0, "B/s");
        assert_eq!(format_reading(&rate, 0, true), "2.0 KiB/s");
    }

    #[test]
    fn byte_totals_are_scaled() {
        assert_eq!(human_bytes(900.0), "900 B");
        let total = SensorReading::number("net.eth0.downloaded", 5.0 * 1024.0 * 1024.0 * 1024.0, "B");
        assert_eq!(format_reading(&total, 0, true), "5.0 GiB");
        assert_eq!(format_reading(&total, 0, false), "5368709120");
    }

    #[test]
    fn text_is_verbatim() {
        let t = SensorReading::text("date.time", "12:34:56");
        assert_eq!(format_reading(&t, 3, true), "12:34:56");
    }
}
