//! Polling scheduler and the shared snapshot.
//!
//! Each provider gets a scheduler thread and a reader thread. The scheduler
//! hands the reader a request, waits at most the read timeout for the answer
//! and publishes the outcome into a copy-on-write table, so readers of the
//! snapshot never wait on a poll in flight.

use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::{Duration, Instant, SystemTime},
};

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{config::SensorConfig, Error, Result};

use super::{
    provider::FnProvider, MetricId, MetricState, ProviderError, SensorProvider, SensorReading,
    SensorSnapshot,
};

/// A fresh reading expires after this many poll intervals without a successful read.
pub const FRESHNESS_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Default)]
struct Entry {
    last: Option<SensorReading>,
    expires_at: Option<Instant>,
    failures: u32,
    last_read_at: Option<SystemTime>,
}

impl Entry {
    fn state(&self, now: Instant, threshold: u32) -> MetricState {
        if self.failures >= threshold {
            return MetricState::Unavailable {
                failures: self.failures,
            };
        }
        if self.failures == 0 {
            if let Some(reading) = &self.last {
                if self.expires_at.map_or(true, |at| now < at) {
                    return MetricState::Fresh {
                        reading: reading.clone(),
                    };
                }
            }
        }
        MetricState::Stale {
            last: self.last.clone(),
            failures: self.failures,
        }
    }
}

type Table = HashMap<MetricId, Entry>;

/// Per-metric health for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub metric: MetricId,
    pub state: &'static str,
    pub last_read_at: Option<SystemTime>,
    pub consecutive_failures: u32,
}

struct Registration {
    provider: Box<dyn SensorProvider>,
    metrics: Vec<MetricId>,
    interval: Duration,
}

struct Running {
    /// Never sent on; dropping it tells every scheduler to stop.
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    done_tx: Sender<String>,
    done_rx: Receiver<String>,
    schedulers: usize,
}

pub struct SensorHub {
    failure_threshold: u32,
    read_timeout: Duration,
    table: Arc<ArcSwap<Table>>,
    pending: Vec<Registration>,
    running: Option<Running>,
}

impl SensorHub {
    pub fn new(failure_threshold: u32, read_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            read_timeout,
            table: Arc::new(ArcSwap::from_pointee(Table::new())),
            pending: Vec::new(),
            running: None,
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_millis(config.read_timeout_ms),
        )
    }

    /// Poll `read` every `interval` and publish the readings it returns for `metrics`.
    pub fn register_provider<F>(
        &mut self,
        metrics: Vec<MetricId>,
        interval: Duration,
        read: F,
    ) -> Result<()>
    where
        F: FnMut() -> std::result::Result<Vec<SensorReading>, ProviderError> + Send + 'static,
    {
        let name = metrics
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "anonymous".into());
        self.register(Box::new(FnProvider::new(name, metrics, read)), interval)
    }

    pub fn register(&mut self, provider: Box<dyn SensorProvider>, interval: Duration) -> Result<()> {
        let metrics = provider.metrics();
        if interval.is_zero() {
            return Err(Error::Config(format!(
                "poll interval for provider '{}' must be greater than 0",
                provider.name()
            )));
        }
        if metrics.is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' publishes no metrics",
                provider.name()
            )));
        }
        let table = self.table.load();
        if let Some(taken) = metrics.iter().find(|m| table.contains_key(*m)) {
            return Err(Error::Config(format!(
                "metric {taken} is already published by another provider"
            )));
        }
        let mut next = Table::clone(&table);
        for metric in &metrics {
            next.insert(metric.clone(), Entry::default());
        }
        self.table.store(Arc::new(next));

        debug!(
            "registered sensor provider '{}' every {} for {} metric(s)",
            provider.name(),
            humantime::format_duration(interval),
            metrics.len()
        );
        let registration = Registration {
            provider,
            metrics,
            interval,
        };
        match self.running.as_mut() {
            Some(running) => {
                spawn_scheduler(
                    registration,
                    self.read_timeout,
                    self.failure_threshold,
                    &self.table,
                    running,
                )?;
            }
            None => self.pending.push(registration),
        }
        Ok(())
    }

    /// Start polling every registered provider. Calling it again is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = channel::bounded(0);
        let (done_tx, done_rx) = channel::unbounded();
        let mut running = Running {
            stop_tx,
            stop_rx,
            done_tx,
            done_rx,
            schedulers: 0,
        };
        for registration in self.pending.drain(..) {
            spawn_scheduler(
                registration,
                self.read_timeout,
                self.failure_threshold,
                &self.table,
                &mut running,
            )?;
        }
        info!("sensor polling started with {} provider(s)", running.schedulers);
        self.running = Some(running);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Signal every scheduler and wait up to `timeout` for them to finish.
    /// Stragglers are detached. Returns `true` when all stopped in time.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(running) = self.running.take() else {
            return true;
        };
        let Running {
            stop_tx,
            done_tx,
            done_rx,
            schedulers,
            ..
        } = running;
        drop(stop_tx);
        drop(done_tx);

        let deadline = Instant::now() + timeout;
        let mut finished = 0;
        while finished < schedulers {
            match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(name) => {
                    debug!("sensor provider '{name}' stopped");
                    finished += 1;
                }
                Err(_) => break,
            }
        }
        if finished < schedulers {
            warn!(
                "{} sensor provider(s) still busy after {}; detaching",
                schedulers - finished,
                humantime::format_duration(timeout)
            );
            return false;
        }
        true
    }

    /// Consistent copy of every metric. Never blocks on a poll in flight.
    pub fn snapshot(&self) -> SensorSnapshot {
        snapshot_of(&self.table, self.failure_threshold)
    }

    /// Handle for threads that read snapshots without owning the hub.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            table: Arc::clone(&self.table),
            failure_threshold: self.failure_threshold,
        }
    }

    pub fn metric_reports(&self) -> Vec<MetricReport> {
        let table = self.table.load();
        let now = Instant::now();
        let mut reports: Vec<MetricReport> = table
            .iter()
            .map(|(metric, entry)| MetricReport {
                metric: metric.clone(),
                state: entry.state(now, self.failure_threshold).label(),
                last_read_at: entry.last_read_at,
                consecutive_failures: entry.failures,
            })
            .collect();
        reports.sort_by(|a, b| a.metric.cmp(&b.metric));
        reports
    }
}

/// Cloneable read-only view of a hub's table.
#[derive(Clone)]
pub struct SnapshotReader {
    table: Arc<ArcSwap<Table>>,
    failure_threshold: u32,
}

impl SnapshotReader {
    pub fn snapshot(&self) -> SensorSnapshot {
        snapshot_of(&self.table, self.failure_threshold)
    }
}

fn snapshot_of(table: &ArcSwap<Table>, threshold: u32) -> SensorSnapshot {
    let table = table.load();
    let now = Instant::now();
    let mut snapshot = SensorSnapshot::new();
    for (metric, entry) in table.iter() {
        snapshot.insert(metric.clone(), entry.state(now, threshold));
    }
    snapshot
}

impl Drop for SensorHub {
    fn drop(&mut self) {
        // Dropping the stop sender releases the schedulers without waiting.
        self.running.take();
    }
}

type ReadOutcome = std::result::Result<Vec<SensorReading>, ProviderError>;

struct Poller {
    name: String,
    metrics: Vec<MetricId>,
    interval: Duration,
    read_timeout: Duration,
    threshold: u32,
    table: Arc<ArcSwap<Table>>,
    requests: Sender<()>,
    results: Receiver<ReadOutcome>,
}

fn spawn_scheduler(
    registration: Registration,
    read_timeout: Duration,
    threshold: u32,
    table: &Arc<ArcSwap<Table>>,
    running: &mut Running,
) -> Result<()> {
    let Registration {
        mut provider,
        metrics,
        interval,
    } = registration;
    let name = provider.name().to_string();
    let (request_tx, request_rx) = channel::bounded::<()>(0);
    let (result_tx, result_rx) = channel::unbounded::<ReadOutcome>();

    thread::Builder::new()
        .name(format!("sensor-read-{name}"))
        .spawn(move || {
            for () in request_rx.iter() {
                if result_tx.send(provider.read()).is_err() {
                    break;
                }
            }
        })?;

    let poller = Poller {
        name: name.clone(),
        metrics,
        interval,
        read_timeout,
        threshold,
        table: Arc::clone(table),
        requests: request_tx,
        results: result_rx,
    };
    let stop = running.stop_rx.clone();
    let done = running.done_tx.clone();
    thread::Builder::new()
        .name(format!("sensor-{name}"))
        .spawn(move || {
            poller.run(&stop);
            let _ = done.send(poller.name);
        })?;
    running.schedulers += 1;
    Ok(())
}

impl Poller {
    fn run(&self, stop: &Receiver<()>) {
        loop {
            let started = Instant::now();
            self.poll_once();
            let wait = self.interval.saturating_sub(started.elapsed());
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }
    }

    fn poll_once(&self) {
        let deadline = Instant::now() + self.read_timeout;
        while self.results.try_recv().is_ok() {
            debug!("{}: discarded a read that finished after its timeout", self.name);
        }
        let outcome = match self.requests.send_timeout((), self.read_timeout) {
            Ok(()) => match self
                .results
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout(self.read_timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(ProviderError::Backend("reader thread exited".into()))
                }
            },
            // Reader still stuck in the previous read.
            Err(SendTimeoutError::Timeout(())) => Err(ProviderError::Timeout(self.read_timeout)),
            Err(SendTimeoutError::Disconnected(())) => {
                Err(ProviderError::Backend("reader thread exited".into()))
            }
        };
        self.publish(outcome);
    }

    fn publish(&self, outcome: ReadOutcome) {
        let updates: Vec<(MetricId, std::result::Result<SensorReading, ProviderError>)> =
            match outcome {
                Ok(readings) => self
                    .metrics
                    .iter()
                    .map(|metric| {
                        let found = readings.iter().rev().find(|r| &r.metric == metric);
                        let update = match found {
                            Some(reading) if reading.valid => Ok(reading.clone()),
                            Some(_) => Err(ProviderError::Parse("reading flagged invalid".into())),
                            None => Err(ProviderError::Unavailable("no reading returned".into())),
                        };
                        (metric.clone(), update)
                    })
                    .collect(),
                Err(err) => self
                    .metrics
                    .iter()
                    .map(|metric| (metric.clone(), Err(err.clone())))
                    .collect(),
            };

        let now = Instant::now();
        let wall = SystemTime::now();
        let expires_at = now.checked_add(self.interval.saturating_mul(FRESHNESS_INTERVALS));
        let previous = self.table.rcu(|current| {
            let mut next = Table::clone(current);
            for (metric, update) in &updates {
                let entry = next.entry(metric.clone()).or_default();
                match update {
                    Ok(reading) => {
                        entry.last = Some(reading.clone());
                        entry.expires_at = expires_at;
                        entry.failures = 0;
                        entry.last_read_at = Some(wall);
                    }
                    Err(_) => entry.failures = entry.failures.saturating_add(1),
                }
            }
            next
        });

        for (metric, update) in &updates {
            let before = previous.get(metric).map_or(0, |e| e.failures);
            match update {
                Ok(_) if before >= self.threshold => info!("{metric} recovered"),
                Ok(_) => {}
                Err(err) => {
                    let failures = before.saturating_add(1);
                    if failures == self.threshold {
                        warn!(
                            "{metric} unavailable after {failures} consecutive failures ({}): {err}",
                            err.kind()
                        );
                    } else if failures == 1 {
                        warn!("{}: {metric} read failed ({}): {err}", self.name, err.kind());
                    } else {
                        debug!("{}: {metric} read failed again ({}): {err}", self.name, err.kind());
                    }
                }
            }
        }
    }
}
