use std::time::SystemTime;

use serde::Serialize;

use crate::{
    display::{DriverState, Revision},
    sensors::hub::MetricReport,
};

use super::connection::{ConnectionManager, ConnectionPhase};

/// Display side of the status, published by the display thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub driver_state: DriverState,
    pub phase: ConnectionPhase,
    pub revision: Option<Revision>,
    pub port: Option<String>,
    pub partial_update: bool,
    pub last_frame_at: Option<SystemTime>,
    pub frames_sent: u64,
    pub reconnect_attempts: u64,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            driver_state: DriverState::Disconnected,
            phase: ConnectionPhase::Closed,
            revision: None,
            port: None,
            partial_update: false,
            last_frame_at: None,
            frames_sent: 0,
            reconnect_attempts: 0,
        }
    }
}

impl LinkStatus {
    /// Current view of `manager`. Frame counters carry over from `previous`,
    /// since each new connection starts a fresh driver.
    pub fn observe(manager: &ConnectionManager, previous: &LinkStatus, sent_now: bool) -> Self {
        let connection = manager.connection();
        let driver = connection.map(|c| c.driver());
        Self {
            driver_state: manager.driver_state(),
            phase: manager.phase(),
            revision: connection.map(|c| c.revision()),
            port: manager.port_name().map(str::to_string),
            partial_update: driver.is_some_and(|d| d.capabilities().partial_update),
            last_frame_at: driver
                .and_then(|d| d.last_frame_at())
                .or(previous.last_frame_at),
            frames_sent: previous.frames_sent + u64::from(sent_now),
            reconnect_attempts: manager.reconnect_attempts(),
        }
    }
}

/// Health answer for the outer layer: connection, frame flow and sensors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    #[serde(flatten)]
    pub link: LinkStatus,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub sensors: Vec<MetricReport>,
}

impl PipelineStatus {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat() {
        let status = PipelineStatus {
            running: true,
            link: LinkStatus {
                revision: Some(Revision::Simu),
                port: Some("simulated".into()),
                frames_sent: 3,
                ..LinkStatus::default()
            },
            frames_rendered: 5,
            frames_dropped: 2,
            sensors: Vec::new(),
        };
        let json: serde_json::Value = serde_json::from_str(&status.to_json()).unwrap();
        assert_eq!(json["revision"], "SIMU");
        assert_eq!(json["driver_state"], "disconnected");
        assert_eq!(json["phase"], "closed");
        assert_eq!(json["frames_sent"], 3);
        assert_eq!(json["frames_dropped"], 2);
    }
}
