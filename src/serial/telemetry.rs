use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::LinkFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPhase {
    Attempt,
    Success,
    Failure,
}

#[derive(Serialize)]
struct BackoffEntry<'a> {
    ts_ms: u128,
    event: &'static str,
    phase: BackoffPhase,
    attempt: u64,
    delay_ms: u64,
    max_ms: u64,
    port: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<LinkFault>,
}

/// Optional JSON-lines sink for reconnect events. Disabled when no path is configured.
#[derive(Debug, Default)]
pub struct BackoffLog {
    file: Option<Mutex<std::fs::File>>,
}

impl BackoffLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::disabled());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub fn record(
        &self,
        phase: BackoffPhase,
        attempt: u64,
        delay_ms: u64,
        max_ms: u64,
        port: &str,
        reason: Option<LinkFault>,
    ) -> io::Result<()> {
        let Some(handle) = self.file.as_ref() else {
            return Ok(());
        };
        let entry = BackoffEntry {
            ts_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
            event: "serial_backoff",
            phase,
            attempt,
            delay_ms,
            max_ms,
            port,
            reason,
        };
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        if let Ok(mut file) = handle.lock() {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_is_silent() {
        BackoffLog::disabled()
            .record(BackoffPhase::Attempt, 1, 500, 10_000, "auto", None)
            .unwrap();
    }

    #[test]
    fn writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("backoff.jsonl");
        let log = BackoffLog::open(Some(&path)).unwrap();
        log.record(
            BackoffPhase::Failure,
            2,
            1_000,
            10_000,
            "/dev/ttyACM0",
            Some(LinkFault::Blocked),
        )
        .unwrap();
        log.record(BackoffPhase::Success, 3, 0, 10_000, "/dev/ttyACM0", None)
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["phase"], "failure");
        assert_eq!(lines[0]["delay_ms"], 1_000);
        assert_eq!(lines[0]["reason"], "blocked");
        assert_eq!(lines[1]["port"], "/dev/ttyACM0");
        assert!(lines[1].get("reason").is_none());
    }
}
