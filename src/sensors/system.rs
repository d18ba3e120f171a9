//! Providers backed by the host OS through `sysinfo`, plus hwmon fans and the clock.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::Local;
use sysinfo::{Components, Disks, Networks, System};

use super::{
    net_download, net_downloaded, net_metrics, net_upload, net_uploaded, MetricId,
    ProviderError, SensorProvider, SensorReading, CPU_FAN_SPEED, CPU_FREQUENCY, CPU_LOAD_AVG,
    CPU_PERCENTAGE, CPU_POWER, CPU_TEMPERATURE, CPU_VOLTAGE, DATE_DATE, DATE_TIME, DISK_FREE,
    DISK_TOTAL, DISK_USED, DISK_USED_PERCENT, MEMORY_FREE, MEMORY_SWAP_PERCENT, MEMORY_USED,
    MEMORY_USED_PERCENT, UPTIME,
};

const HWMON_ROOT: &str = "/sys/class/hwmon";
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = MIB * 1024.0;

pub struct CpuProvider {
    system: System,
    components: Components,
    hwmon_root: PathBuf,
}

impl CpuProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system,
            components: Components::new_with_refreshed_list(),
            hwmon_root: PathBuf::from(HWMON_ROOT),
        }
    }

    fn temperature(&mut self) -> Option<f32> {
        self.components.refresh(false);
        let mut fallback = None;
        for component in self.components.list() {
            let label = component.label().to_lowercase();
            let Some(temp) = component.temperature() else {
                continue;
            };
            if label.contains("cpu") || label.contains("package") || label.contains("tctl") {
                return Some(temp);
            }
            if fallback.is_none() && label.contains("core") {
                fallback = Some(temp);
            }
        }
        fallback
    }
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for CpuProvider {
    fn name(&self) -> &str {
        "cpu"
    }

    fn metrics(&self) -> Vec<MetricId> {
        [
            CPU_PERCENTAGE,
            CPU_FREQUENCY,
            CPU_LOAD_AVG,
            CPU_TEMPERATURE,
            CPU_FAN_SPEED,
            CPU_VOLTAGE,
            CPU_POWER,
        ]
        .into_iter()
        .map(MetricId::from)
        .collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        self.system.refresh_cpu_usage();
        self.system.refresh_cpu_frequency();
        if self.system.cpus().is_empty() {
            return Err(ProviderError::Unavailable("no CPUs reported".into()));
        }
        let mut readings = vec![
            SensorReading::number(
                CPU_PERCENTAGE,
                self.system.global_cpu_usage().clamp(0.0, 100.0) as f64,
                "%",
            ),
            SensorReading::number(CPU_LOAD_AVG, System::load_average().one, ""),
        ];
        if let Some(cpu) = self.system.cpus().first() {
            readings.push(SensorReading::number(CPU_FREQUENCY, cpu.frequency() as f64, "MHz"));
        }
        if let Some(temp) = self.temperature() {
            readings.push(SensorReading::number(CPU_TEMPERATURE, temp as f64, "°C"));
        }
        if let Some(rpm) = first_fan_rpm(&self.hwmon_root) {
            readings.push(SensorReading::number(CPU_FAN_SPEED, rpm as f64, "RPM"));
        }
        if let Some(volts) = cpu_voltage(&self.hwmon_root) {
            readings.push(SensorReading::number(CPU_VOLTAGE, volts, "V"));
        }
        if let Some(watts) = cpu_power(&self.hwmon_root) {
            readings.push(SensorReading::number(CPU_POWER, watts, "W"));
        }
        Ok(readings)
    }
}

/// One `<kind>N_<suffix>` value file of a hwmon chip.
struct HwmonInput {
    chip: String,
    label: String,
    value: i64,
}

/// `<kind>N_<suffix>` inputs of every chip under `root`, chips and files in
/// name order. Labels and chip names are lowercased.
fn hwmon_inputs(root: &Path, kind: &str, suffix: &str) -> Vec<HwmonInput> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut chips: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    chips.sort();
    let read_trimmed = |path: PathBuf| {
        fs::read_to_string(path)
            .map(|raw| raw.trim().to_lowercase())
            .unwrap_or_default()
    };

    let mut found = Vec::new();
    for chip in chips {
        let Ok(entries) = fs::read_dir(&chip) else {
            continue;
        };
        let tail = format!("_{suffix}");
        let mut inputs: Vec<String> = entries
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .filter(|n| n.starts_with(kind) && n.ends_with(&tail))
            .collect();
        inputs.sort();
        let chip_name = read_trimmed(chip.join("name"));
        for input in inputs {
            let Some(value) = fs::read_to_string(chip.join(&input))
                .ok()
                .and_then(|raw| raw.trim().parse::<i64>().ok())
            else {
                continue;
            };
            let stem = &input[..input.len() - tail.len()];
            found.push(HwmonInput {
                chip: chip_name.clone(),
                label: read_trimmed(chip.join(format!("{stem}_label"))),
                value,
            });
        }
    }
    found
}

/// First spinning `fan*_input` under a hwmon tree.
pub fn first_fan_rpm(root: &Path) -> Option<u64> {
    hwmon_inputs(root, "fan", "input")
        .into_iter()
        .find(|input| input.value > 0)
        .map(|input| input.value as u64)
}

/// Core voltage in volts, from an `in*_input` labelled for the CPU.
pub fn cpu_voltage(root: &Path) -> Option<f64> {
    hwmon_inputs(root, "in", "input")
        .into_iter()
        .find(|input| input.label.contains("vcore") || input.label.contains("cpu"))
        .map(|input| input.value as f64 / 1000.0)
}

/// Package power in watts, from a CPU chip's `power*_average` or `power*_input`.
pub fn cpu_power(root: &Path) -> Option<f64> {
    const CPU_CHIPS: [&str; 3] = ["zenpower", "k10temp", "coretemp"];
    const CPU_LABELS: [&str; 4] = ["cpu", "package", "ppt", "socket"];
    ["average", "input"]
        .into_iter()
        .flat_map(|suffix| hwmon_inputs(root, "power", suffix))
        .find(|input| {
            CPU_CHIPS.contains(&input.chip.as_str())
                || CPU_LABELS.iter().any(|l| input.label.contains(*l))
        })
        .map(|input| input.value as f64 / 1_000_000.0)
}

pub struct MemoryProvider {
    system: System,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn metrics(&self) -> Vec<MetricId> {
        [MEMORY_USED_PERCENT, MEMORY_USED, MEMORY_FREE, MEMORY_SWAP_PERCENT]
            .into_iter()
            .map(MetricId::from)
            .collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProviderError::Unavailable("total memory reported as 0".into()));
        }
        let used = self.system.used_memory();
        let swap_total = self.system.total_swap();
        // No swap configured reads as an empty swap.
        let swap_pct = if swap_total == 0 {
            0.0
        } else {
            self.system.used_swap() as f64 * 100.0 / swap_total as f64
        };
        Ok(vec![
            SensorReading::number(MEMORY_USED_PERCENT, used as f64 * 100.0 / total as f64, "%"),
            SensorReading::number(MEMORY_USED, used as f64 / MIB, "MiB"),
            SensorReading::number(MEMORY_FREE, self.system.available_memory() as f64 / MIB, "MiB"),
            SensorReading::number(MEMORY_SWAP_PERCENT, swap_pct, "%"),
        ])
    }
}

/// Usage of the root filesystem, or the first disk when `/` is not listed.
pub struct DiskProvider {
    disks: Disks,
}

impl DiskProvider {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for DiskProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for DiskProvider {
    fn name(&self) -> &str {
        "disk"
    }

    fn metrics(&self) -> Vec<MetricId> {
        [DISK_USED_PERCENT, DISK_USED, DISK_FREE, DISK_TOTAL]
            .into_iter()
            .map(MetricId::from)
            .collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        self.disks.refresh(true);
        let disk = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| self.disks.list().first())
            .ok_or_else(|| ProviderError::Unavailable("no disks reported".into()))?;
        let total = disk.total_space();
        let available = disk.available_space();
        if total == 0 {
            return Err(ProviderError::Unavailable(format!(
                "{} reports zero capacity",
                disk.mount_point().display()
            )));
        }
        let used = total.saturating_sub(available);
        let used_pct = used as f64 * 100.0 / total as f64;
        Ok(vec![
            SensorReading::number(DISK_USED_PERCENT, used_pct.min(100.0), "%"),
            SensorReading::number(DISK_USED, used as f64 / GIB, "GiB"),
            SensorReading::number(DISK_FREE, available as f64 / GIB, "GiB"),
            SensorReading::number(DISK_TOTAL, total as f64 / GIB, "GiB"),
        ])
    }
}

/// Upload/download rates (bytes per second) and byte totals for the
/// configured interfaces.
pub struct NetworkProvider {
    networks: Networks,
    interfaces: Vec<String>,
    previous: HashMap<String, (u64, u64)>,
    last_sample: Option<Instant>,
}

impl NetworkProvider {
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            interfaces,
            previous: HashMap::new(),
            last_sample: None,
        }
    }
}

impl SensorProvider for NetworkProvider {
    fn name(&self) -> &str {
        "net"
    }

    fn metrics(&self) -> Vec<MetricId> {
        self.interfaces.iter().flat_map(|iface| net_metrics(iface)).collect()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        self.networks.refresh(true);
        let now = Instant::now();
        let elapsed = self
            .last_sample
            .map(|at| now.duration_since(at))
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        self.last_sample = Some(now);

        let mut readings = Vec::new();
        for iface in &self.interfaces {
            let Some(data) = self.networks.get(iface.as_str()) else {
                continue;
            };
            let totals = (data.total_transmitted(), data.total_received());
            let rates = match self.previous.insert(iface.clone(), totals) {
                Some((tx, rx)) if elapsed > 0.0 => (
                    totals.0.saturating_sub(tx) as f64 / elapsed,
                    totals.1.saturating_sub(rx) as f64 / elapsed,
                ),
                _ => (0.0, 0.0),
            };
            readings.push(SensorReading::number(net_upload(iface), rates.0, "B/s"));
            readings.push(SensorReading::number(net_download(iface), rates.1, "B/s"));
            readings.push(SensorReading::number(net_uploaded(iface), totals.0 as f64, "B"));
            readings.push(SensorReading::number(net_downloaded(iface), totals.1 as f64, "B"));
        }
        if readings.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "none of the interfaces {:?} exist",
                self.interfaces
            )));
        }
        Ok(readings)
    }
}

pub struct UptimeProvider;

impl SensorProvider for UptimeProvider {
    fn name(&self) -> &str {
        "uptime"
    }

    fn metrics(&self) -> Vec<MetricId> {
        vec![UPTIME.into()]
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let uptime = Duration::from_secs(System::uptime());
        Ok(vec![SensorReading::text(
            UPTIME,
            humantime::format_duration(uptime).to_string(),
        )])
    }
}

pub struct ClockProvider {
    time_format: String,
    date_format: String,
}

impl ClockProvider {
    pub fn new() -> Self {
        Self {
            time_format: "%H:%M:%S".into(),
            date_format: "%Y-%m-%d".into(),
        }
    }
}

impl Default for ClockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for ClockProvider {
    fn name(&self) -> &str {
        "date"
    }

    fn metrics(&self) -> Vec<MetricId> {
        vec![DATE_TIME.into(), DATE_DATE.into()]
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let now = Local::now();
        Ok(vec![
            SensorReading::text(DATE_TIME, now.format(&self.time_format).to_string()),
            SensorReading::text(DATE_DATE, now.format(&self.date_format).to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_rpm_from_hwmon_tree() {
        let dir = tempfile::tempdir().unwrap();
        let idle = dir.path().join("hwmon0");
        let busy = dir.path().join("hwmon1");
        fs::create_dir_all(&idle).unwrap();
        fs::create_dir_all(&busy).unwrap();
        fs::write(idle.join("fan1_input"), "0\n").unwrap();
        fs::write(busy.join("fan1_label"), "cpu_fan\n").unwrap();
        fs::write(busy.join("fan2_input"), "1450\n").unwrap();
        assert_eq!(first_fan_rpm(dir.path()), Some(1450));
    }

    #[test]
    fn cpu_voltage_and_power_from_labelled_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let board = dir.path().join("hwmon0");
        let cpu = dir.path().join("hwmon1");
        fs::create_dir_all(&board).unwrap();
        fs::create_dir_all(&cpu).unwrap();
        fs::write(board.join("name"), "nct6775\n").unwrap();
        fs::write(board.join("in0_input"), "3312\n").unwrap();
        fs::write(board.join("in0_label"), "3VCC\n").unwrap();
        fs::write(board.join("in1_input"), "1248\n").unwrap();
        fs::write(board.join("in1_label"), "Vcore\n").unwrap();
        fs::write(board.join("power1_input"), "9000000\n").unwrap();
        fs::write(cpu.join("name"), "zenpower\n").unwrap();
        fs::write(cpu.join("power1_input"), "64500000\n").unwrap();

        assert_eq!(cpu_voltage(dir.path()), Some(1.248));
        assert_eq!(cpu_power(dir.path()), Some(64.5));
    }

    #[test]
    fn no_hwmon_means_no_fan() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(first_fan_rpm(&dir.path().join("missing")), None);
        assert_eq!(cpu_voltage(&dir.path().join("missing")), None);
    }

    #[test]
    fn clock_readings_are_text() {
        let readings = ClockProvider::new().read().unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.value.as_f64().is_none()));
    }

    #[test]
    fn network_metrics_follow_interfaces() {
        let provider = NetworkProvider::new(vec!["eth0".into(), "wlan0".into()]);
        let names: Vec<String> = provider.metrics().iter().map(|m| m.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "net.eth0.upload_rate",
                "net.eth0.download_rate",
                "net.eth0.uploaded",
                "net.eth0.downloaded",
                "net.wlan0.upload_rate",
                "net.wlan0.download_rate",
                "net.wlan0.uploaded",
                "net.wlan0.downloaded"
            ]
        );
    }
}
