//! NVIDIA GPU load, temperature, clocks, fan, power and memory through NVML.
//!
//! Without the `nvidia` feature the provider still exists but every read
//! reports the GPU as unavailable, so themes that bind GPU metrics show
//! placeholders instead of failing to load.

#[cfg(feature = "nvidia")]
use nvml_wrapper::{
    enum_wrappers::device::{Clock, TemperatureSensor},
    Nvml,
};

use super::{
    MetricId, ProviderError, SensorProvider, SensorReading, GPU_FAN_PERCENT, GPU_FREQUENCY,
    GPU_LOAD, GPU_MEMORY_PERCENT, GPU_MEMORY_TOTAL, GPU_MEMORY_USED, GPU_POWER, GPU_TEMPERATURE,
};

#[cfg(feature = "nvidia")]
const MIB: f64 = 1024.0 * 1024.0;

pub struct GpuProvider {
    #[cfg(feature = "nvidia")]
    nvml: Option<Nvml>,
    index: u32,
}

impl GpuProvider {
    #[cfg(feature = "nvidia")]
    pub fn new(index: u32) -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => Some(nvml),
            Err(err) => {
                log::warn!("NVML init failed, GPU metrics unavailable: {err}");
                None
            }
        };
        Self { nvml, index }
    }

    #[cfg(not(feature = "nvidia"))]
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    #[cfg(feature = "nvidia")]
    fn sample(&self) -> Result<Vec<SensorReading>, ProviderError> {
        let nvml = self
            .nvml
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable("NVML not initialised".into()))?;
        let device = nvml
            .device_by_index(self.index)
            .map_err(|e| ProviderError::Unavailable(format!("GPU {}: {e}", self.index)))?;
        let mut readings = Vec::new();
        if let Ok(util) = device.utilization_rates() {
            readings.push(SensorReading::number(GPU_LOAD, util.gpu as f64, "%"));
        }
        if let Ok(temp) = device.temperature(TemperatureSensor::Gpu) {
            readings.push(SensorReading::number(GPU_TEMPERATURE, temp as f64, "°C"));
        }
        if let Ok(mem) = device.memory_info() {
            if mem.total > 0 {
                let pct = mem.used as f64 * 100.0 / mem.total as f64;
                readings.push(SensorReading::number(GPU_MEMORY_PERCENT, pct, "%"));
                readings.push(SensorReading::number(GPU_MEMORY_USED, mem.used as f64 / MIB, "MiB"));
                readings.push(SensorReading::number(GPU_MEMORY_TOTAL, mem.total as f64 / MIB, "MiB"));
            }
        }
        if let Ok(mhz) = device.clock_info(Clock::Graphics) {
            readings.push(SensorReading::number(GPU_FREQUENCY, mhz as f64, "MHz"));
        }
        // Passively cooled boards have no fan 0.
        if let Ok(pct) = device.fan_speed(0) {
            readings.push(SensorReading::number(GPU_FAN_PERCENT, pct as f64, "%"));
        }
        if let Ok(milliwatts) = device.power_usage() {
            readings.push(SensorReading::number(GPU_POWER, milliwatts as f64 / 1000.0, "W"));
        }
        if readings.is_empty() {
            return Err(ProviderError::Backend(format!(
                "GPU {} returned no metrics",
                self.index
            )));
        }
        Ok(readings)
    }

    #[cfg(not(feature = "nvidia"))]
    fn sample(&self) -> Result<Vec<SensorReading>, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "GPU {} metrics need the `nvidia` feature",
            self.index
        )))
    }
}

impl SensorProvider for GpuProvider {
    fn name(&self) -> &str {
        "gpu"
    }

    fn metrics(&self) -> Vec<MetricId> {
        [
            GPU_LOAD,
            GPU_TEMPERATURE,
            GPU_MEMORY_PERCENT,
            GPU_MEMORY_USED,
            GPU_MEMORY_TOTAL,
            GPU_FREQUENCY,
            GPU_FAN_PERCENT,
            GPU_POWER,
        ]
        .into_iter()
        .map(MetricId::from)
        .collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        self.sample()
    }
}
