use std::time::Duration;

use smartscreen::{
    app::{ConnectionManager, ConnectionPhase, ReconnectOutcome, Shutdown},
    config::{Config, PortSetting},
    display::{DriverOptions, DriverState, Revision},
    serial::{
        fake::{FakeLink, FakePorts},
        PortCandidate,
    },
};

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.connection.backoff_initial_ms = 1;
    cfg.connection.backoff_max_ms = 16;
    cfg
}

fn options() -> DriverOptions {
    DriverOptions {
        handshake_timeout: Duration::from_millis(5),
        width: 16,
        height: 16,
        ..DriverOptions::default()
    }
}

#[test]
fn brightness_is_clamped_to_percent_range() {
    let link = FakeLink::device("/dev/ttyACM0", Revision::C);
    let ports = FakePorts::new().with_device(PortCandidate::plain("/dev/ttyACM0"), link);
    let mut mgr =
        ConnectionManager::new(&config(), Box::new(ports), options(), Shutdown::new()).unwrap();
    mgr.connect().unwrap();

    mgr.set_brightness(150).unwrap();
    assert_eq!(mgr.connection().unwrap().driver().brightness(), 100);
    mgr.set_brightness(-20).unwrap();
    assert_eq!(mgr.connection().unwrap().driver().brightness(), 0);
    assert_eq!(mgr.driver_state(), DriverState::Ready);
}

#[test]
fn reconnect_events_are_logged_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("backoff.jsonl");
    let mut cfg = config();
    cfg.display.port = PortSetting::Path("/dev/ttyUSB3".into());
    cfg.connection.backoff_log = Some(log.clone());

    let ports = FakePorts::new();
    let mut mgr =
        ConnectionManager::new(&cfg, Box::new(ports.clone()), options(), Shutdown::new()).unwrap();
    assert!(mgr.connect().is_err());

    let mut delays = Vec::new();
    for _ in 0..3 {
        match mgr.reconnect_once().unwrap() {
            ReconnectOutcome::Failed { delay } => delays.push(delay),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    ports.plug(
        PortCandidate::plain("/dev/ttyUSB3"),
        FakeLink::device("/dev/ttyUSB3", Revision::A),
    );
    assert_eq!(mgr.reconnect_once().unwrap(), ReconnectOutcome::Connected);
    assert_eq!(mgr.phase(), ConnectionPhase::Handshaked);

    let raw = std::fs::read_to_string(&log).unwrap();
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // attempt + failure three times, then attempt + success.
    assert_eq!(events.len(), 8);
    assert!(events.iter().all(|e| e["event"] == "serial_backoff"));
    assert!(events.iter().all(|e| e["port"] == "/dev/ttyUSB3"));
    assert_eq!(events.last().unwrap()["phase"], "success");
    // The port was missing on every failed attempt.
    let reasons: Vec<_> = events
        .iter()
        .filter(|e| e["phase"] == "failure")
        .map(|e| e["reason"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(reasons, vec!["gone"; 3]);
    assert!(events.last().unwrap().get("reason").is_none());
}

#[test]
fn shutdown_during_backoff_cancels_quickly() {
    let mut cfg = config();
    cfg.connection.backoff_initial_ms = 5_000;
    cfg.connection.backoff_max_ms = 5_000;
    let shutdown = Shutdown::new();
    let mut mgr =
        ConnectionManager::new(&cfg, Box::new(FakePorts::new()), options(), shutdown.clone())
            .unwrap();

    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
    });
    let started = std::time::Instant::now();
    assert!(!mgr.reconnect().unwrap());
    assert!(started.elapsed() < Duration::from_secs(2));
    trigger.join().unwrap();
}
