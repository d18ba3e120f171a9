//! Deterministic synthetic readings for demos and hardware-free runs.

use super::{
    net_download, net_downloaded, net_metrics, net_upload, net_uploaded, MetricId, ProviderError,
    SensorProvider, SensorReading, StatGroup, CPU_FAN_SPEED, CPU_FREQUENCY, CPU_LOAD_AVG,
    CPU_PERCENTAGE, CPU_POWER, CPU_TEMPERATURE, CPU_VOLTAGE, DATE_DATE, DATE_TIME, DISK_FREE,
    DISK_TOTAL, DISK_USED, DISK_USED_PERCENT, GPU_FAN_PERCENT, GPU_FREQUENCY, GPU_LOAD,
    GPU_MEMORY_PERCENT, GPU_MEMORY_TOTAL, GPU_MEMORY_USED, GPU_POWER, GPU_TEMPERATURE,
    MEMORY_FREE, MEMORY_SWAP_PERCENT, MEMORY_USED, MEMORY_USED_PERCENT, PING_LATENCY, UPTIME,
    WEATHER_DESCRIPTION, WEATHER_FEELS_LIKE, WEATHER_HUMIDITY, WEATHER_TEMPERATURE,
};

/// Stands in for every provider of one stat group. The n-th read always
/// yields the same values. User-defined `custom` stats have no stand-in.
pub struct StubProvider {
    group: StatGroup,
    interfaces: Vec<String>,
    tick: u64,
}

impl StubProvider {
    pub fn new(group: StatGroup) -> Self {
        Self::with_interfaces(group, Vec::new())
    }

    pub fn with_interfaces(group: StatGroup, interfaces: Vec<String>) -> Self {
        Self {
            group,
            interfaces,
            tick: 0,
        }
    }
}

/// Triangle wave between `low` and `high` with a period of `2 * steps` ticks.
fn wave(tick: u64, low: f64, high: f64, steps: u64) -> f64 {
    let steps = steps.max(1);
    let phase = tick % (2 * steps);
    let pos = if phase < steps { phase } else { 2 * steps - phase };
    low + (high - low) * pos as f64 / steps as f64
}

impl SensorProvider for StubProvider {
    fn name(&self) -> &str {
        self.group.as_str()
    }

    fn metrics(&self) -> Vec<MetricId> {
        let fixed: &[&str] = match self.group {
            StatGroup::Cpu => &[
                CPU_PERCENTAGE,
                CPU_FREQUENCY,
                CPU_LOAD_AVG,
                CPU_TEMPERATURE,
                CPU_FAN_SPEED,
                CPU_VOLTAGE,
                CPU_POWER,
            ],
            StatGroup::Gpu => &[
                GPU_LOAD,
                GPU_TEMPERATURE,
                GPU_MEMORY_PERCENT,
                GPU_MEMORY_USED,
                GPU_MEMORY_TOTAL,
                GPU_FREQUENCY,
                GPU_FAN_PERCENT,
                GPU_POWER,
            ],
            StatGroup::Memory => &[MEMORY_USED_PERCENT, MEMORY_USED, MEMORY_FREE, MEMORY_SWAP_PERCENT],
            StatGroup::Disk => &[DISK_USED_PERCENT, DISK_USED, DISK_FREE, DISK_TOTAL],
            StatGroup::Custom => &[],
            StatGroup::Ping => &[PING_LATENCY],
            StatGroup::Weather => &[
                WEATHER_TEMPERATURE,
                WEATHER_FEELS_LIKE,
                WEATHER_HUMIDITY,
                WEATHER_DESCRIPTION,
            ],
            StatGroup::Uptime => &[UPTIME],
            StatGroup::Date => &[DATE_TIME, DATE_DATE],
            StatGroup::Net => {
                return self.interfaces.iter().flat_map(|iface| net_metrics(iface)).collect();
            }
        };
        fixed.iter().copied().map(MetricId::from).collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let t = self.tick;
        self.tick += 1;
        let readings = match self.group {
            StatGroup::Cpu => vec![
                SensorReading::number(CPU_PERCENTAGE, wave(t, 5.0, 95.0, 9), "%"),
                SensorReading::number(CPU_FREQUENCY, wave(t, 1200.0, 3600.0, 6), "MHz"),
                SensorReading::number(CPU_LOAD_AVG, wave(t, 0.2, 3.0, 7), ""),
                SensorReading::number(CPU_TEMPERATURE, wave(t, 38.0, 72.0, 8), "°C"),
                SensorReading::number(CPU_FAN_SPEED, wave(t, 800.0, 2200.0, 5), "RPM"),
                SensorReading::number(CPU_VOLTAGE, wave(t, 0.9, 1.35, 6), "V"),
                SensorReading::number(CPU_POWER, wave(t, 12.0, 88.0, 9), "W"),
            ],
            StatGroup::Gpu => {
                let memory_pct = wave(t, 10.0, 60.0, 15);
                vec![
                    SensorReading::number(GPU_LOAD, wave(t, 0.0, 100.0, 10), "%"),
                    SensorReading::number(GPU_TEMPERATURE, wave(t, 35.0, 80.0, 12), "°C"),
                    SensorReading::number(GPU_MEMORY_PERCENT, memory_pct, "%"),
                    SensorReading::number(GPU_MEMORY_USED, 8192.0 * memory_pct / 100.0, "MiB"),
                    SensorReading::number(GPU_MEMORY_TOTAL, 8192.0, "MiB"),
                    SensorReading::number(GPU_FREQUENCY, wave(t, 300.0, 1900.0, 10), "MHz"),
                    SensorReading::number(GPU_FAN_PERCENT, wave(t, 0.0, 70.0, 12), "%"),
                    SensorReading::number(GPU_POWER, wave(t, 15.0, 220.0, 10), "W"),
                ]
            }
            StatGroup::Memory => {
                let used = wave(t, 4800.0, 11200.0, 20);
                vec![
                    SensorReading::number(MEMORY_USED_PERCENT, used * 100.0 / 16_000.0, "%"),
                    SensorReading::number(MEMORY_USED, used, "MiB"),
                    SensorReading::number(MEMORY_FREE, 16_000.0 - used, "MiB"),
                    SensorReading::number(MEMORY_SWAP_PERCENT, wave(t, 0.0, 12.0, 20), "%"),
                ]
            }
            StatGroup::Disk => vec![
                SensorReading::number(DISK_USED_PERCENT, 61.0, "%"),
                SensorReading::number(DISK_USED, 285.3, "GiB"),
                SensorReading::number(DISK_FREE, 182.4, "GiB"),
                SensorReading::number(DISK_TOTAL, 467.7, "GiB"),
            ],
            StatGroup::Net => self
                .interfaces
                .iter()
                .flat_map(|iface| {
                    [
                        SensorReading::number(net_upload(iface), wave(t, 0.0, 250_000.0, 4), "B/s"),
                        SensorReading::number(
                            net_download(iface),
                            wave(t, 0.0, 2_500_000.0, 6),
                            "B/s",
                        ),
                        SensorReading::number(net_uploaded(iface), 125_000.0 * t as f64, "B"),
                        SensorReading::number(net_downloaded(iface), 1_250_000.0 * t as f64, "B"),
                    ]
                })
                .collect(),
            StatGroup::Ping => vec![SensorReading::number(PING_LATENCY, wave(t, 8.0, 40.0, 5), "ms")],
            StatGroup::Weather => vec![
                SensorReading::number(WEATHER_TEMPERATURE, wave(t, 12.0, 24.0, 6), "°C"),
                SensorReading::number(WEATHER_FEELS_LIKE, wave(t, 10.0, 23.0, 6), "°C"),
                SensorReading::number(WEATHER_HUMIDITY, 55.0, "%"),
                SensorReading::text(WEATHER_DESCRIPTION, "scattered clouds"),
            ],
            StatGroup::Uptime => {
                let secs = 3 * 86_400 + 4 * 3_600 + t * 60;
                vec![SensorReading::text(
                    UPTIME,
                    humantime::format_duration(std::time::Duration::from_secs(secs)).to_string(),
                )]
            }
            StatGroup::Date => {
                let minutes = t % (24 * 60);
                vec![
                    SensorReading::text(DATE_TIME, format!("{:02}:{:02}", minutes / 60, minutes % 60)),
                    SensorReading::text(DATE_DATE, "2024-01-01"),
                ]
            }
            StatGroup::Custom => Vec::new(),
        };
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_stays_in_range_and_repeats() {
        for t in 0..50 {
            let v = wave(t, 5.0, 95.0, 9);
            assert!((5.0..=95.0).contains(&v));
        }
        assert_eq!(wave(0, 5.0, 95.0, 9), wave(18, 5.0, 95.0, 9));
        assert_eq!(wave(9, 5.0, 95.0, 9), 95.0);
    }

    #[test]
    fn stub_covers_its_metrics() {
        for group in StatGroup::ALL {
            let mut stub = StubProvider::with_interfaces(group, vec!["eth0".into()]);
            let metrics = stub.metrics();
            let readings = stub.read().unwrap();
            for metric in &metrics {
                assert!(
                    readings.iter().any(|r| &r.metric == metric),
                    "{metric} missing from stub {group:?}"
                );
            }
        }
    }

    #[test]
    fn stub_covers_the_extended_catalogue() {
        let mut memory = StubProvider::new(StatGroup::Memory);
        let readings = memory.read().unwrap();
        let value = |id: &str| {
            readings
                .iter()
                .find(|r| r.metric.as_str() == id)
                .and_then(|r| r.value.as_f64())
                .unwrap()
        };
        assert!((value(MEMORY_USED) + value(MEMORY_FREE) - 16_000.0).abs() < 1e-9);
        assert!(StubProvider::new(StatGroup::Gpu).metrics().contains(&GPU_POWER.into()));
        assert!(StubProvider::new(StatGroup::Custom).metrics().is_empty());
        let net = StubProvider::with_interfaces(StatGroup::Net, vec!["eth0".into()]);
        assert!(net.metrics().contains(&net_downloaded("eth0")));
    }

    #[test]
    fn same_tick_same_values() {
        let mut a = StubProvider::new(StatGroup::Cpu);
        let mut b = StubProvider::new(StatGroup::Cpu);
        let va: Vec<_> = a.read().unwrap().into_iter().map(|r| r.value).collect();
        let vb: Vec<_> = b.read().unwrap().into_iter().map(|r| r.value).collect();
        assert_eq!(va, vb);
    }
}
