//! Startup-time selection of the provider set.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    config::{Config, SensorBackend},
    theme::StatIntervals,
};

use super::{
    custom::custom_provider,
    gpu::GpuProvider,
    ping::PingProvider,
    stub::StubProvider,
    system::{ClockProvider, CpuProvider, DiskProvider, MemoryProvider, NetworkProvider, UptimeProvider},
    weather::{WeatherProvider, MIN_WEATHER_INTERVAL},
    MetricId, SensorProvider, StatGroup, SubsetProvider,
};

/// Backend actually used once `auto` is settled.
pub fn effective_backend(requested: SensorBackend) -> SensorBackend {
    match requested {
        SensorBackend::Auto if sysinfo::IS_SUPPORTED_SYSTEM => SensorBackend::System,
        SensorBackend::Auto => {
            log::warn!("sysinfo does not support this platform, using stub sensors");
            SensorBackend::Stub
        }
        other => other,
    }
}

/// Build one provider instance for `group`, or `None` when the group cannot
/// run with this configuration.
fn build_provider(group: StatGroup, config: &Config) -> Option<Box<dyn SensorProvider>> {
    let backend = effective_backend(config.sensors.backend);
    let read_timeout = Duration::from_millis(config.sensors.read_timeout_ms);
    let interfaces = config.network.interfaces.clone();
    if group == StatGroup::Custom {
        return custom_provider(&config.custom);
    }
    if backend == SensorBackend::Stub {
        return Some(Box::new(StubProvider::with_interfaces(group, interfaces)));
    }
    let provider: Box<dyn SensorProvider> = match group {
        StatGroup::Cpu => Box::new(CpuProvider::new()),
        StatGroup::Gpu => Box::new(GpuProvider::new(0)),
        StatGroup::Memory => Box::new(MemoryProvider::new()),
        StatGroup::Disk => Box::new(DiskProvider::new()),
        StatGroup::Net => Box::new(NetworkProvider::new(interfaces)),
        StatGroup::Ping => Box::new(PingProvider::new(config.ping.target.clone(), read_timeout)),
        StatGroup::Weather => match WeatherProvider::new(config.weather.clone(), read_timeout) {
            Ok(provider) => Box::new(provider),
            Err(err) => {
                log::warn!("weather provider disabled: {err}");
                return None;
            }
        },
        StatGroup::Uptime => Box::new(UptimeProvider),
        StatGroup::Date => Box::new(ClockProvider::new()),
        StatGroup::Custom => return None,
    };
    Some(provider)
}

/// Providers for every polled stat group, paired with their poll interval.
///
/// A group polls on its `[stats]` interval. Metrics with an interval of
/// their own (a `[stats]` metric key or a widget `interval`) are split off
/// into a separate provider per distinct interval, so each provider owns a
/// disjoint set of metrics. The set is fixed for the lifetime of the process.
pub fn resolve_providers(
    config: &Config,
    stats: &StatIntervals,
) -> Vec<(Box<dyn SensorProvider>, Duration)> {
    let real_weather = effective_backend(config.sensors.backend) != SensorBackend::Stub;
    let mut providers: Vec<(Box<dyn SensorProvider>, Duration)> = Vec::new();

    for group in stats.polled() {
        if group == StatGroup::Weather && !config.weather_enabled() {
            log::info!("weather stats requested but no API key configured; skipping");
            continue;
        }
        if group == StatGroup::Net && config.network.interfaces.is_empty() {
            log::warn!("net stats requested but network.interfaces is empty; skipping");
            continue;
        }
        if group == StatGroup::Custom && config.custom.is_empty() {
            log::info!("custom stats requested but no [[custom]] entries configured; skipping");
            continue;
        }
        let Some(first) = build_provider(group, config) else {
            continue;
        };
        let floor = |interval: Duration| {
            if group == StatGroup::Weather && real_weather {
                interval.max(MIN_WEATHER_INTERVAL)
            } else {
                interval
            }
        };

        let base = stats.get(group);
        let overrides: BTreeMap<&MetricId, Duration> = stats.metric_overrides(group).collect();
        let owned = first.metrics();
        for metric in overrides.keys().filter(|m| !owned.contains(**m)) {
            log::warn!("{metric} has an interval but no {} provider publishes it", group.as_str());
        }
        let mut buckets: BTreeMap<Duration, Vec<MetricId>> = BTreeMap::new();
        for metric in &owned {
            if let Some(interval) = overrides.get(metric).copied().or(base) {
                buckets.entry(floor(interval)).or_default().push(metric.clone());
            }
        }

        let mut spare = Some(first);
        for (interval, metrics) in buckets {
            let provider = if metrics.len() == owned.len() {
                spare.take()
            } else {
                spare
                    .take()
                    .or_else(|| build_provider(group, config))
                    .map(|inner| Box::new(SubsetProvider::new(inner, metrics)) as Box<dyn SensorProvider>)
            };
            let Some(provider) = provider else {
                continue;
            };
            log::debug!(
                "sensor group {} -> provider {} every {}",
                group.as_str(),
                provider.name(),
                humantime::format_duration(interval)
            );
            providers.push((provider, interval));
        }
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{CPU_FAN_SPEED, CPU_FREQUENCY, CPU_PERCENTAGE, CPU_TEMPERATURE};

    fn stub_config() -> Config {
        let mut cfg = Config::default();
        cfg.sensors.backend = SensorBackend::Stub;
        cfg
    }

    #[test]
    fn only_enabled_groups_are_polled() {
        let mut stats = StatIntervals::default();
        stats
            .set(StatGroup::Cpu, 1.0)
            .set(StatGroup::Memory, 0.0)
            .set(StatGroup::Date, 60.0);
        let providers = resolve_providers(&stub_config(), &stats);
        let names: Vec<_> = providers.iter().map(|(p, _)| p.name().to_string()).collect();
        assert_eq!(names, vec!["cpu", "date"]);
        assert_eq!(providers[0].1, Duration::from_secs(1));
    }

    #[test]
    fn net_needs_interfaces() {
        let mut stats = StatIntervals::default();
        stats.set(StatGroup::Net, 2.0);
        assert!(resolve_providers(&stub_config(), &stats).is_empty());

        let mut cfg = stub_config();
        cfg.network.interfaces = vec!["eth0".into()];
        let providers = resolve_providers(&cfg, &stats);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0.metrics().len(), 4);
    }

    #[test]
    fn cpu_metrics_poll_at_their_own_intervals() {
        let mut stats = StatIntervals::default();
        stats
            .set(StatGroup::Cpu, 1.0)
            .set_metric(CPU_FREQUENCY, 5.0)
            .set_metric(CPU_TEMPERATURE, 0.25);
        let mut providers = resolve_providers(&stub_config(), &stats);
        let intervals: Vec<_> = providers.iter().map(|(_, interval)| *interval).collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_millis(250),
                Duration::from_secs(1),
                Duration::from_secs(5)
            ]
        );
        assert_eq!(providers[0].0.metrics(), vec![MetricId::from(CPU_TEMPERATURE)]);
        assert_eq!(providers[2].0.metrics(), vec![MetricId::from(CPU_FREQUENCY)]);
        let rest = providers[1].0.metrics();
        assert!(rest.contains(&CPU_PERCENTAGE.into()));
        assert!(!rest.contains(&CPU_FREQUENCY.into()));
        assert!(!rest.contains(&CPU_TEMPERATURE.into()));

        let slow = providers[2].0.read().unwrap();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].metric, MetricId::from(CPU_FREQUENCY));
    }

    #[test]
    fn metric_interval_alone_enables_its_group() {
        let mut stats = StatIntervals::default();
        stats.set_metric(CPU_FAN_SPEED, 3.0);
        let providers = resolve_providers(&stub_config(), &stats);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0.metrics(), vec![MetricId::from(CPU_FAN_SPEED)]);
        assert_eq!(providers[0].1, Duration::from_secs(3));
    }

    #[test]
    fn custom_group_needs_entries() {
        let mut stats = StatIntervals::default();
        stats.set(StatGroup::Custom, 5.0);
        assert!(resolve_providers(&stub_config(), &stats).is_empty());

        let mut cfg = stub_config();
        cfg.custom.push(crate::config::CustomStatConfig {
            name: "answer".into(),
            file: None,
            command: vec!["echo".into(), "42".into()],
            unit: String::new(),
            scale: 1.0,
        });
        let providers = resolve_providers(&cfg, &stats);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0.metrics(), vec![MetricId::from("custom.answer")]);
    }

    #[test]
    fn weather_needs_api_key() {
        let mut stats = StatIntervals::default();
        stats.set(StatGroup::Weather, 10.0);
        assert!(resolve_providers(&stub_config(), &stats).is_empty());

        let mut cfg = stub_config();
        cfg.weather.api_key = "k".into();
        assert_eq!(resolve_providers(&cfg, &stats).len(), 1);
    }

    #[test]
    fn real_weather_interval_is_floored() {
        let mut stats = StatIntervals::default();
        stats.set(StatGroup::Weather, 10.0);
        let mut cfg = Config::default();
        cfg.sensors.backend = SensorBackend::System;
        cfg.weather.api_key = "k".into();
        let providers = resolve_providers(&cfg, &stats);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].1, MIN_WEATHER_INTERVAL);
    }

    #[test]
    fn explicit_backends_are_kept() {
        assert_eq!(effective_backend(SensorBackend::Stub), SensorBackend::Stub);
        assert_eq!(effective_backend(SensorBackend::System), SensorBackend::System);
    }
}
