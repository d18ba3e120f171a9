//! User-defined stats from `[[custom]]` config entries.

use std::{fs, process::Command};

use crate::config::CustomStatConfig;

use super::{custom_metric, FnProvider, ProviderError, SensorProvider, SensorReading};

/// One provider polling every configured custom stat, or `None` when there
/// are none. A stat that fails to read is left out of that poll; the read
/// only fails when every stat failed.
pub fn custom_provider(stats: &[CustomStatConfig]) -> Option<Box<dyn SensorProvider>> {
    if stats.is_empty() {
        return None;
    }
    let stats = stats.to_vec();
    let metrics = stats.iter().map(|s| custom_metric(&s.name)).collect();
    Some(Box::new(FnProvider::new("custom", metrics, move || {
        let mut readings = Vec::new();
        let mut last_err = None;
        for stat in &stats {
            match read_stat(stat) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    log::debug!("custom stat {}: {err}", stat.name);
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) if readings.is_empty() => Err(err),
            _ => Ok(readings),
        }
    })))
}

/// Read one stat: numbers are scaled, anything else is kept as text.
pub fn read_stat(stat: &CustomStatConfig) -> Result<SensorReading, ProviderError> {
    let raw = match (&stat.file, stat.command.split_first()) {
        (Some(path), _) => fs::read_to_string(path)
            .map_err(|e| ProviderError::Unavailable(format!("{}: {e}", path.display())))?,
        (None, Some((program, args))) => {
            let output = Command::new(program)
                .args(args)
                .output()
                .map_err(|e| ProviderError::Unavailable(format!("{program}: {e}")))?;
            if !output.status.success() {
                return Err(ProviderError::Backend(format!(
                    "{program} exited with {}",
                    output.status
                )));
            }
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        (None, None) => {
            return Err(ProviderError::Unavailable(format!(
                "custom stat {} has no source",
                stat.name
            )))
        }
    };
    let text = raw.lines().next().unwrap_or_default().trim();
    let metric = custom_metric(&stat.name);
    Ok(match text.parse::<f64>() {
        Ok(value) => SensorReading::number(metric, value * stat.scale, &stat.unit),
        Err(_) => SensorReading::text(metric, text),
    })
}
