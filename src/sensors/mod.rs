//! Sensor readings, the snapshot the compositor draws from, and the providers
//! that produce them.

pub mod backend;
pub mod custom;
pub mod gpu;
pub mod hub;
pub mod ping;
pub mod provider;
pub mod stub;
pub mod system;
pub mod weather;

pub use backend::resolve_providers;
pub use hub::{SensorHub, SnapshotReader};
pub use provider::{FnProvider, SensorProvider, SubsetProvider};
pub use stub::StubProvider;

use std::{collections::BTreeMap, fmt, time::Duration, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Dotted metric name such as `cpu.percentage` or `net.eth0.download_rate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(String);

impl MetricId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Poll group the metric belongs to, from its first segment.
    pub fn group(&self) -> Option<StatGroup> {
        let head = self.0.split('.').next().unwrap_or_default();
        StatGroup::ALL.into_iter().find(|g| g.as_str() == head)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub const CPU_PERCENTAGE: &str = "cpu.percentage";
pub const CPU_FREQUENCY: &str = "cpu.frequency";
pub const CPU_LOAD_AVG: &str = "cpu.load_avg";
pub const CPU_TEMPERATURE: &str = "cpu.temperature";
pub const CPU_FAN_SPEED: &str = "cpu.fan_speed";
pub const CPU_VOLTAGE: &str = "cpu.voltage";
pub const CPU_POWER: &str = "cpu.power";
pub const GPU_LOAD: &str = "gpu.load";
pub const GPU_TEMPERATURE: &str = "gpu.temperature";
pub const GPU_MEMORY_PERCENT: &str = "gpu.memory_percent";
pub const GPU_MEMORY_USED: &str = "gpu.memory_used";
pub const GPU_MEMORY_TOTAL: &str = "gpu.memory_total";
pub const GPU_FREQUENCY: &str = "gpu.frequency";
pub const GPU_FAN_PERCENT: &str = "gpu.fan_percent";
pub const GPU_POWER: &str = "gpu.power";
pub const MEMORY_USED_PERCENT: &str = "memory.used_percent";
pub const MEMORY_USED: &str = "memory.used";
pub const MEMORY_FREE: &str = "memory.free";
pub const MEMORY_SWAP_PERCENT: &str = "memory.swap_percent";
pub const DISK_USED_PERCENT: &str = "disk.used_percent";
pub const DISK_USED: &str = "disk.used";
pub const DISK_FREE: &str = "disk.free";
pub const DISK_TOTAL: &str = "disk.total";
pub const PING_LATENCY: &str = "ping.latency";
pub const UPTIME: &str = "uptime";
pub const DATE_TIME: &str = "date.time";
pub const DATE_DATE: &str = "date.date";
pub const WEATHER_TEMPERATURE: &str = "weather.temperature";
pub const WEATHER_FEELS_LIKE: &str = "weather.feels_like";
pub const WEATHER_HUMIDITY: &str = "weather.humidity";
pub const WEATHER_DESCRIPTION: &str = "weather.description";

pub fn net_upload(interface: &str) -> MetricId {
    MetricId::new(format!("net.{interface}.upload_rate"))
}

pub fn net_download(interface: &str) -> MetricId {
    MetricId::new(format!("net.{interface}.download_rate"))
}

/// Bytes sent since the interface came up.
pub fn net_uploaded(interface: &str) -> MetricId {
    MetricId::new(format!("net.{interface}.uploaded"))
}

pub fn net_downloaded(interface: &str) -> MetricId {
    MetricId::new(format!("net.{interface}.downloaded"))
}

/// Every metric published for one network interface.
pub fn net_metrics(interface: &str) -> [MetricId; 4] {
    [
        net_upload(interface),
        net_download(interface),
        net_uploaded(interface),
        net_downloaded(interface),
    ]
}

/// Metric published by the user-defined stat `name`.
pub fn custom_metric(name: &str) -> MetricId {
    MetricId::new(format!("custom.{name}"))
}

/// Metrics polled together on one interval, as named in a theme's `[stats]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatGroup {
    Cpu,
    Gpu,
    Memory,
    Disk,
    Net,
    Ping,
    Weather,
    Uptime,
    Date,
    Custom,
}

impl StatGroup {
    pub const ALL: [StatGroup; 10] = [
        StatGroup::Cpu,
        StatGroup::Gpu,
        StatGroup::Memory,
        StatGroup::Disk,
        StatGroup::Net,
        StatGroup::Ping,
        StatGroup::Weather,
        StatGroup::Uptime,
        StatGroup::Date,
        StatGroup::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatGroup::Cpu => "cpu",
            StatGroup::Gpu => "gpu",
            StatGroup::Memory => "memory",
            StatGroup::Disk => "disk",
            StatGroup::Net => "net",
            StatGroup::Ping => "ping",
            StatGroup::Weather => "weather",
            StatGroup::Uptime => "uptime",
            StatGroup::Date => "date",
            StatGroup::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(v) => Some(*v),
            SensorValue::Text(_) => None,
        }
    }
}

/// One measurement. Immutable; superseded by the next poll of the same metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub metric: MetricId,
    pub value: SensorValue,
    pub unit: String,
    pub timestamp: SystemTime,
    pub valid: bool,
}

impl SensorReading {
    pub fn number(metric: impl Into<MetricId>, value: f64, unit: &str) -> Self {
        Self {
            metric: metric.into(),
            value: SensorValue::Number(value),
            unit: unit.to_string(),
            timestamp: SystemTime::now(),
            valid: value.is_finite(),
        }
    }

    pub fn text(metric: impl Into<MetricId>, value: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value: SensorValue::Text(value.into()),
            unit: String::new(),
            timestamp: SystemTime::now(),
            valid: true,
        }
    }

    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Failure of a single provider read. Never leaves the hub.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("read did not finish within {0:?}")]
    Timeout(Duration),
    #[error("could not parse sensor data: {0}")]
    Parse(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Parse(_) => "parse",
            ProviderError::Backend(_) => "backend",
        }
    }
}

/// What the snapshot knows about one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MetricState {
    /// Latest reading, still within its freshness window.
    Fresh { reading: SensorReading },
    /// The last poll failed or the reading expired; `last` is the last good value, if any.
    Stale {
        last: Option<SensorReading>,
        failures: u32,
    },
    /// Failure threshold reached; drawn as a placeholder until a read succeeds.
    Unavailable { failures: u32 },
}

impl MetricState {
    pub fn fresh(&self) -> Option<&SensorReading> {
        match self {
            MetricState::Fresh { reading } => Some(reading),
            _ => None,
        }
    }

    /// Fresh reading, or the last known one when stale.
    pub fn last_known(&self) -> Option<&SensorReading> {
        match self {
            MetricState::Fresh { reading } => Some(reading),
            MetricState::Stale { last, .. } => last.as_ref(),
            MetricState::Unavailable { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricState::Fresh { .. } => "fresh",
            MetricState::Stale { .. } => "stale",
            MetricState::Unavailable { .. } => "unavailable",
        }
    }
}

/// Immutable view of every tracked metric at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub taken_at: SystemTime,
    metrics: BTreeMap<MetricId, MetricState>,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self {
            taken_at: SystemTime::now(),
            metrics: BTreeMap::new(),
        }
    }

    /// Snapshot where every reading is fresh. Mostly for tests and previews.
    pub fn from_readings(readings: impl IntoIterator<Item = SensorReading>) -> Self {
        let mut snapshot = Self::new();
        for reading in readings {
            snapshot.insert(reading.metric.clone(), MetricState::Fresh { reading });
        }
        snapshot
    }

    pub fn insert(&mut self, metric: MetricId, state: MetricState) {
        self.metrics.insert(metric, state);
    }

    pub fn get(&self, metric: &MetricId) -> Option<&MetricState> {
        self.metrics.get(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricId, &MetricState)> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn fresh_count(&self) -> usize {
        self.metrics.values().filter(|s| s.fresh().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_group_from_prefix() {
        assert_eq!(MetricId::new(CPU_PERCENTAGE).group(), Some(StatGroup::Cpu));
        assert_eq!(net_upload("eth0").group(), Some(StatGroup::Net));
        assert_eq!(MetricId::new(UPTIME).group(), Some(StatGroup::Uptime));
        assert_eq!(MetricId::new("custom.thing").group(), None);
    }

    #[test]
    fn non_finite_numbers_are_invalid() {
        assert!(!SensorReading::number(CPU_PERCENTAGE, f64::NAN, "%").valid);
        assert!(SensorReading::number(CPU_PERCENTAGE, 12.5, "%").valid);
    }

    #[test]
    fn last_known_skips_unavailable() {
        let reading = SensorReading::number(CPU_PERCENTAGE, 50.0, "%");
        let stale = MetricState::Stale {
            last: Some(reading.clone()),
            failures: 1,
        };
        assert_eq!(stale.fresh(), None);
        assert_eq!(stale.last_known(), Some(&reading));
        assert_eq!(MetricState::Unavailable { failures: 3 }.last_known(), None);
    }
}
