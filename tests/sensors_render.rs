use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use smartscreen::{
    config::StalePolicy,
    render::Compositor,
    sensors::{
        MetricId, MetricState, ProviderError, SensorHub, SensorReading, SensorSnapshot,
        CPU_PERCENTAGE,
    },
    theme::Theme,
};

const THEME: &str = r##"
    placeholder = "n/a"

    [display]
    width = 160
    height = 80

    [[widget]]
    type = "bar"
    x = 0
    y = 0
    width = 100
    height = 10
    metric = "cpu.percentage"

    [[widget]]
    type = "text"
    x = 0
    y = 20
    width = 160
    height = 20
    metric = "cpu.percentage"
    decimals = 1

    [[widget]]
    type = "graph"
    x = 0
    y = 44
    width = 160
    height = 36
    metric = "net.eth0.download_rate"
    history = 8
"##;

fn compositor(policy: StalePolicy) -> Compositor {
    let theme = Theme::from_toml("it", THEME, Path::new(".")).unwrap();
    Compositor::new(Arc::new(theme), policy)
}

fn cpu() -> MetricId {
    MetricId::from(CPU_PERCENTAGE)
}

#[test]
fn two_providers_fill_the_snapshot() {
    let mut hub = SensorHub::new(3, Duration::from_millis(500));
    let cpu_polls = Arc::new(AtomicU64::new(0));
    let polls = Arc::clone(&cpu_polls);
    hub.register_provider(vec![cpu()], Duration::from_millis(100), move || {
        let n = polls.fetch_add(1, Ordering::SeqCst);
        let value = (n * 37 % 100) as f64;
        Ok(vec![SensorReading::number(CPU_PERCENTAGE, value, "%")])
    })
    .unwrap();
    let net_polls = Arc::new(AtomicU64::new(0));
    let polls = Arc::clone(&net_polls);
    hub.register_provider(
        vec!["net.eth0.download_rate".into()],
        Duration::from_millis(200),
        move || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            let value = 1024.0 * (n + 1) as f64;
            Ok(vec![SensorReading::number("net.eth0.download_rate", value, "B/s")])
        },
    )
    .unwrap();
    hub.start().unwrap();

    let mut compositor = compositor(StalePolicy::Placeholder);
    let mut seen_cpu = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
        let snapshot = hub.snapshot();
        compositor.render(&snapshot, None, false);
        if let Some(value) = snapshot
            .get(&cpu())
            .and_then(MetricState::fresh)
            .and_then(|r| r.value.as_f64())
        {
            if seen_cpu.last() != Some(&value) {
                seen_cpu.push(value);
            }
        }
    }
    let snapshot = hub.snapshot();
    assert!(hub.stop(Duration::from_secs(2)));

    assert!(cpu_polls.load(Ordering::SeqCst) >= 10);
    assert!(net_polls.load(Ordering::SeqCst) >= 5);
    assert!(seen_cpu.len() > 1, "cpu reading never changed: {seen_cpu:?}");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.fresh_count(), 2);

    let latest = snapshot
        .get(&cpu())
        .and_then(MetricState::fresh)
        .and_then(|r| r.value.as_f64())
        .unwrap();
    let frame = compositor.render(&snapshot, None, false);
    let background = frame.pixel(159, 5).unwrap();
    let lit = (0..100)
        .filter(|&x| frame.pixel(x, 5).unwrap() != background)
        .count();
    assert_eq!(lit, latest as usize);

    let mut samples = compositor.graph_samples(2);
    assert!(samples.len() > 1);
    samples.dedup();
    assert!(samples.len() > 1, "graph history never changed");
}

#[test]
fn failing_provider_becomes_unavailable() {
    let mut hub = SensorHub::new(2, Duration::from_millis(200));
    hub.register_provider(vec![cpu()], Duration::from_millis(20), || {
        Err(ProviderError::Unavailable("no sensor".into()))
    })
    .unwrap();
    hub.start().unwrap();

    let reader = hub.reader();
    let deadline = Instant::now() + Duration::from_secs(2);
    let unavailable = loop {
        let state = reader.snapshot().get(&cpu()).cloned();
        if let Some(MetricState::Unavailable { failures }) = state {
            break Some(failures);
        }
        if Instant::now() > deadline {
            break None;
        }
        thread::sleep(Duration::from_millis(10));
    };
    assert!(hub.stop(Duration::from_secs(1)));
    assert!(unavailable.is_some_and(|failures| failures >= 2));

    let snapshot = reader.snapshot();
    let compositor = compositor(StalePolicy::LastKnown);
    assert_eq!(compositor.resolve(&snapshot, &cpu()), None);
    assert_eq!(compositor.gauge_ratio(0, &snapshot), None);
}

#[test]
fn stale_reading_follows_the_policy() {
    let reading = SensorReading::number(CPU_PERCENTAGE, 80.0, "%");
    let mut stale = SensorSnapshot::new();
    stale.insert(
        cpu(),
        MetricState::Stale {
            last: Some(reading.clone()),
            failures: 1,
        },
    );
    let fresh = SensorSnapshot::from_readings([reading]);
    let empty = SensorSnapshot::new();

    let mut last_known = compositor(StalePolicy::LastKnown);
    assert_eq!(last_known.gauge_ratio(0, &stale), Some(0.8));
    assert_eq!(
        last_known.render(&stale, None, false),
        compositor(StalePolicy::LastKnown).render(&fresh, None, false)
    );

    let mut placeholder = compositor(StalePolicy::Placeholder);
    assert_eq!(placeholder.gauge_ratio(0, &stale), None);
    assert_eq!(
        placeholder.render(&stale, None, false),
        compositor(StalePolicy::Placeholder).render(&empty, None, false)
    );
}

#[test]
fn same_snapshot_renders_same_pixels() {
    let snapshot = SensorSnapshot::from_readings([
        SensorReading::number(CPU_PERCENTAGE, 12.5, "%"),
        SensorReading::number("net.eth0.download_rate", 1500.0, "B/s"),
    ]);
    let mut a = compositor(StalePolicy::Placeholder);
    let mut b = compositor(StalePolicy::Placeholder);
    let first = a.render(&snapshot, None, false);
    assert_eq!(first, b.render(&snapshot, None, false));
    assert_eq!(first.checksum(), a.render(&snapshot, None, false).checksum());
    // The repeated snapshot carries no new sample for the graph.
    assert_eq!(a.graph_samples(2), vec![1500.0]);
}
