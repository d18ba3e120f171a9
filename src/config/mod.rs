use crate::{display::Revision, Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf, str::FromStr};

pub mod loader;

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_BRIGHTNESS: u8 = 20;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 500;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_THEME: &str = "3.5inchTheme2";
pub const DEFAULT_SIMULATED_OUTPUT: &str = "screencap.png";
pub const DEFAULT_PING_TARGET: &str = "8.8.8.8:53";
pub const DEFAULT_WEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Serial port selection: an explicit device path or auto-discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortSetting {
    #[default]
    Auto,
    Path(String),
}

impl TryFrom<String> for PortSetting {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("port must be 'auto' or a device path".into());
        }
        if trimmed.eq_ignore_ascii_case("auto") {
            Ok(PortSetting::Auto)
        } else {
            Ok(PortSetting::Path(trimmed.to_string()))
        }
    }
}

impl From<PortSetting> for String {
    fn from(value: PortSetting) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PortSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSetting::Auto => f.write_str("auto"),
            PortSetting::Path(path) => f.write_str(path),
        }
    }
}

/// Display revision selection. `Auto` probes every serial revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RevisionSetting {
    #[default]
    Auto,
    Fixed(Revision),
}

impl RevisionSetting {
    /// Revisions worth probing during discovery, in probe order.
    pub fn probe_order(&self) -> Vec<Revision> {
        match self {
            RevisionSetting::Auto => Revision::SERIAL.to_vec(),
            RevisionSetting::Fixed(rev) => vec![*rev],
        }
    }
}

impl TryFrom<String> for RevisionSetting {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Ok(RevisionSetting::Auto);
        }
        Revision::from_str(&raw).map(RevisionSetting::Fixed)
    }
}

impl From<RevisionSetting> for String {
    fn from(value: RevisionSetting) -> Self {
        match value {
            RevisionSetting::Auto => "auto".into(),
            RevisionSetting::Fixed(rev) => rev.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    #[default]
    Auto,
    System,
    Stub,
}

/// How readings that went stale (but not yet unavailable) are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    #[default]
    Placeholder,
    LastKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherUnits {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl WeatherUnits {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherUnits::Metric => "metric",
            WeatherUnits::Imperial => "imperial",
            WeatherUnits::Standard => "standard",
        }
    }

    pub fn temperature_unit(&self) -> &'static str {
        match self {
            WeatherUnits::Metric => "°C",
            WeatherUnits::Imperial => "°F",
            WeatherUnits::Standard => "K",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub port: PortSetting,
    pub revision: RevisionSetting,
    pub brightness: u8,
    pub reverse_orientation: bool,
    pub frame_interval_ms: u64,
    pub simulated_output: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            port: PortSetting::Auto,
            revision: RevisionSetting::Auto,
            brightness: DEFAULT_BRIGHTNESS,
            reverse_orientation: false,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            simulated_output: PathBuf::from(DEFAULT_SIMULATED_OUTPUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub baud: u32,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_log: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_log: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    pub backend: SensorBackend,
    pub failure_threshold: u32,
    pub read_timeout_ms: u64,
    pub stale_policy: StalePolicy,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Auto,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            stale_policy: StalePolicy::Placeholder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PingConfig {
    pub target: String,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_PING_TARGET.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: WeatherUnits,
    pub language: String,
    pub base_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            latitude: 45.75,
            longitude: 4.85,
            units: WeatherUnits::Metric,
            language: "en".into(),
            base_url: DEFAULT_WEATHER_URL.into(),
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// A user-defined stat published as `custom.<name>`. The value is read from
/// `file`, or from the standard output of `command`; numeric output is
/// multiplied by `scale`, anything else is shown as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomStatConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThemeConfig {
    pub name: String,
    pub directory: PathBuf,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_THEME.to_string(),
            directory: PathBuf::from("res/themes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// Immutable settings handed to every pipeline component at construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub display: DisplayConfig,
    pub connection: ConnectionConfig,
    pub sensors: SensorConfig,
    pub network: NetworkConfig,
    pub ping: PingConfig,
    pub weather: WeatherConfig,
    pub theme: ThemeConfig,
    pub log: LogConfig,
    pub custom: Vec<CustomStatConfig>,
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        loader::parse(raw)
    }

    /// Reject values the pipeline cannot run with. Called by every loader path.
    pub fn validate(&self) -> Result<()> {
        validate(self)
    }

    /// Weather polling is only meaningful once an API key is configured.
    pub fn weather_enabled(&self) -> bool {
        !self.weather.api_key.trim().is_empty()
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    if cfg.display.brightness > 100 {
        return Err(Error::Config(format!(
            "display.brightness must be between 0 and 100 (got {})",
            cfg.display.brightness
        )));
    }
    if cfg.display.frame_interval_ms == 0 {
        return Err(Error::Config(
            "display.frame_interval_ms must be greater than 0".into(),
        ));
    }
    if cfg.display.revision == RevisionSetting::Fixed(Revision::Simu)
        && cfg.display.simulated_output.as_os_str().is_empty()
    {
        return Err(Error::Config(
            "display.simulated_output must be set for the SIMU revision".into(),
        ));
    }
    if cfg.connection.baud == 0 {
        return Err(Error::Config("connection.baud must be greater than 0".into()));
    }
    if cfg.connection.handshake_timeout_ms == 0 || cfg.connection.write_timeout_ms == 0 {
        return Err(Error::Config(
            "connection timeouts must be greater than 0".into(),
        ));
    }
    if cfg.connection.backoff_initial_ms == 0 {
        return Err(Error::Config(
            "connection.backoff_initial_ms must be greater than 0".into(),
        ));
    }
    if cfg.connection.backoff_initial_ms > cfg.connection.backoff_max_ms {
        return Err(Error::Config(format!(
            "connection.backoff_initial_ms ({}) must not exceed backoff_max_ms ({})",
            cfg.connection.backoff_initial_ms, cfg.connection.backoff_max_ms
        )));
    }
    if cfg.sensors.failure_threshold == 0 {
        return Err(Error::Config(
            "sensors.failure_threshold must be at least 1".into(),
        ));
    }
    if cfg.sensors.read_timeout_ms == 0 {
        return Err(Error::Config(
            "sensors.read_timeout_ms must be greater than 0".into(),
        ));
    }
    if cfg.network.interfaces.iter().any(|name| name.trim().is_empty()) {
        return Err(Error::Config(
            "network.interfaces entries must not be empty".into(),
        ));
    }
    if !(-90.0..=90.0).contains(&cfg.weather.latitude) {
        return Err(Error::Config(format!(
            "weather.latitude must be between -90 and 90 (got {})",
            cfg.weather.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&cfg.weather.longitude) {
        return Err(Error::Config(format!(
            "weather.longitude must be between -180 and 180 (got {})",
            cfg.weather.longitude
        )));
    }
    if cfg.theme.name.trim().is_empty() {
        return Err(Error::Config("theme.name must not be empty".into()));
    }
    let mut names = std::collections::HashSet::new();
    for stat in &cfg.custom {
        let valid_name = !stat.name.is_empty()
            && stat
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(Error::Config(format!(
                "custom stat name '{}' must be non-empty and use only letters, digits and '_'",
                stat.name
            )));
        }
        if !names.insert(stat.name.as_str()) {
            return Err(Error::Config(format!(
                "custom stat '{}' is defined twice",
                stat.name
            )));
        }
        if stat.file.is_some() == !stat.command.is_empty() {
            return Err(Error::Config(format!(
                "custom stat '{}' needs exactly one of `file` or `command`",
                stat.name
            )));
        }
        if !stat.scale.is_finite() {
            return Err(Error::Config(format!(
                "custom stat '{}' has a non-finite scale",
                stat.name
            )));
        }
    }
    Ok(())
}
