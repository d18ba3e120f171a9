//! Current conditions from the OpenWeatherMap `weather` endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{WeatherConfig, WeatherUnits};

use super::{
    MetricId, ProviderError, SensorProvider, SensorReading, WEATHER_DESCRIPTION,
    WEATHER_FEELS_LIKE, WEATHER_HUMIDITY, WEATHER_TEMPERATURE,
};

/// Floor applied to the weather poll interval.
pub const MIN_WEATHER_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    main: MainBlock,
    #[serde(default)]
    weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    feels_like: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

pub struct WeatherProvider {
    client: Client,
    config: WeatherConfig,
    timeout: Duration,
}

impl WeatherProvider {
    pub fn new(config: WeatherConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Backend(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            timeout,
        })
    }
}

fn readings_from(body: &str, units: WeatherUnits) -> Result<Vec<SensorReading>, ProviderError> {
    let current: CurrentWeather =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let unit = units.temperature_unit();
    let description = current
        .weather
        .first()
        .map(|c| c.description.clone())
        .unwrap_or_default();
    Ok(vec![
        SensorReading::number(WEATHER_TEMPERATURE, current.main.temp, unit),
        SensorReading::number(WEATHER_FEELS_LIKE, current.main.feels_like, unit),
        SensorReading::number(WEATHER_HUMIDITY, current.main.humidity, "%"),
        SensorReading::text(WEATHER_DESCRIPTION, description),
    ])
}

impl SensorProvider for WeatherProvider {
    fn name(&self) -> &str {
        "weather"
    }

    fn metrics(&self) -> Vec<MetricId> {
        [
            WEATHER_TEMPERATURE,
            WEATHER_FEELS_LIKE,
            WEATHER_HUMIDITY,
            WEATHER_DESCRIPTION,
        ]
        .into_iter()
        .map(MetricId::from)
        .collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let cfg = &self.config;
        let timeout = self.timeout;
        let response = self
            .client
            .get(&cfg.base_url)
            .query(&[
                ("lat", cfg.latitude.to_string()),
                ("lon", cfg.longitude.to_string()),
                ("appid", cfg.api_key.clone()),
                ("units", cfg.units.as_str().to_string()),
                ("lang", cfg.language.clone()),
            ])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::Unavailable(format!("weather request failed: {e}"))
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Backend(format!("weather API answered {status}")));
        }
        let body = response
            .text()
            .map_err(|e| ProviderError::Parse(format!("weather body: {e}")))?;
        readings_from(&body, cfg.units)
    }
}
