//! Wires sensors, compositor and display into the running daemon.
//!
//! Two threads besides the sensor schedulers: the render thread ticks at the
//! configured frame interval and hands each frame to the display thread over
//! a rendezvous channel. When the display thread is still writing (or
//! reconnecting) the hand-over fails and the frame is dropped, so the panel
//! never lags behind by more than one frame.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use crossbeam::{
    channel::{self, Receiver, Sender, TrySendError},
    select,
};
use log::{debug, error, info, warn};

use crate::{
    config::{Config, PortSetting},
    display::DriverOptions,
    render::{Compositor, Frame},
    sensors::{resolve_providers, SensorHub, SensorProvider, SnapshotReader},
    serial::{PortBackend, SystemPorts},
    theme::Theme,
    Error, Result,
};

use super::{
    connection::ConnectionManager,
    lifecycle::Shutdown,
    status::{LinkStatus, PipelineStatus},
};

/// Upper bound on an orderly stop before remaining threads are detached.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Counters {
    rendered: AtomicU64,
    dropped: AtomicU64,
}

struct Workers {
    render_stop: Shutdown,
    done_rx: Receiver<&'static str>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct Pipeline {
    config: Config,
    theme: Arc<Theme>,
    hub: SensorHub,
    manager: Option<ConnectionManager>,
    shutdown: Shutdown,
    link: Arc<ArcSwap<LinkStatus>>,
    counters: Arc<Counters>,
    workers: Option<Workers>,
}

impl Pipeline {
    /// Build a pipeline over an explicit port backend and provider set.
    pub fn new(
        config: Config,
        theme: Theme,
        backend: Box<dyn PortBackend>,
        providers: Vec<(Box<dyn SensorProvider>, Duration)>,
    ) -> Result<Self> {
        config.validate()?;
        let options = DriverOptions::from_config(&config, theme.orientation, theme.width, theme.height);
        let shutdown = Shutdown::new();
        let manager = ConnectionManager::new(&config, backend, options, shutdown.clone())?;
        let mut hub = SensorHub::from_config(&config.sensors);
        for (provider, interval) in providers {
            hub.register(provider, interval)?;
        }
        Ok(Self {
            config,
            theme: Arc::new(theme),
            hub,
            manager: Some(manager),
            shutdown,
            link: Arc::new(ArcSwap::from_pointee(LinkStatus::default())),
            counters: Arc::new(Counters::default()),
            workers: None,
        })
    }

    /// Production wiring: OS serial ports and providers chosen from the theme's stats.
    pub fn from_config(config: Config, theme: Theme) -> Result<Self> {
        let providers = resolve_providers(&config, &theme.stats);
        Self::new(config, theme, Box::new(SystemPorts), providers)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn hub(&self) -> &SensorHub {
        &self.hub
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    /// Connect, start polling, then start rendering.
    ///
    /// Fails when auto-discovery finds no display. A configured port that
    /// cannot be opened yet is retried in the background instead.
    pub fn start(&mut self) -> Result<()> {
        if self.workers.is_some() {
            return Ok(());
        }
        let Some(mut manager) = self.manager.take() else {
            return Err(Error::Config("a stopped pipeline cannot be restarted".into()));
        };

        if let Err(err) = manager.connect() {
            let fatal = match &err {
                Error::NoDeviceFound(_) => self.config.display.port == PortSetting::Auto,
                Error::Config(_) | Error::Theme(_) => true,
                _ => false,
            };
            if fatal {
                self.manager = Some(manager);
                return Err(err);
            }
            warn!("display not reachable yet ({err}); retrying in the background");
        }
        self.link
            .store(Arc::new(LinkStatus::observe(&manager, &LinkStatus::default(), false)));

        if let Err(err) = self.hub.start() {
            self.manager = Some(manager);
            return Err(err);
        }

        let (frames_tx, frames_rx) = channel::bounded::<Frame>(0);
        let (done_tx, done_rx) = channel::unbounded();
        let render_stop = Shutdown::new();
        let mut handles = Vec::new();

        let display = {
            let link = Arc::clone(&self.link);
            let done = done_tx.clone();
            thread::Builder::new()
                .name("smartscreen-display".into())
                .spawn(move || {
                    display_loop(manager, frames_rx, &link);
                    let _ = done.send("display");
                })?
        };
        handles.push(("display", display));

        let render = {
            let reader = self.hub.reader();
            let compositor = Compositor::new(Arc::clone(&self.theme), self.config.sensors.stale_policy);
            let link = Arc::clone(&self.link);
            let counters = Arc::clone(&self.counters);
            let interval = Duration::from_millis(self.config.display.frame_interval_ms);
            let stop = render_stop.clone();
            thread::Builder::new()
                .name("smartscreen-render".into())
                .spawn(move || {
                    render_loop(compositor, reader, interval, frames_tx, &link, &counters, &stop);
                    let _ = done_tx.send("render");
                })?
        };
        handles.push(("render", render));

        info!(
            "pipeline started: theme {} ({}x{}), frame every {} ms",
            self.theme.name,
            self.theme.width,
            self.theme.height,
            self.config.display.frame_interval_ms
        );
        self.workers = Some(Workers {
            render_stop,
            done_rx,
            handles,
        });
        Ok(())
    }

    /// Stop rendering, stop polling, then disconnect, all within `timeout`.
    /// Returns `false` when something had to be detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(workers) = self.workers.take() else {
            self.shutdown.trigger();
            if let Some(manager) = self.manager.as_mut() {
                manager.shutdown();
            }
            return true;
        };
        let deadline = Instant::now() + timeout;
        let Workers {
            render_stop,
            done_rx,
            mut handles,
        } = workers;

        render_stop.trigger();
        let mut clean = wait_for(&done_rx, &mut handles, "render", deadline);
        clean &= self
            .hub
            .stop(deadline.saturating_duration_since(Instant::now()));
        // The display thread leaves once the render side hung up; this also
        // cancels a reconnect backoff in progress.
        self.shutdown.trigger();
        clean &= wait_for(&done_rx, &mut handles, "display", deadline);

        if clean {
            info!("pipeline stopped");
        } else {
            warn!("pipeline stop hit the {} ceiling", humantime::format_duration(timeout));
        }
        clean
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.is_running(),
            link: LinkStatus::clone(&self.link.load()),
            frames_rendered: self.counters.rendered.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            sensors: self.hub.metric_reports(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.workers.is_some() {
            self.stop(STOP_TIMEOUT);
        }
    }
}

/// Wait for the worker called `name` to report, then join it. Gives up at `deadline`.
fn wait_for(
    done_rx: &Receiver<&'static str>,
    handles: &mut Vec<(&'static str, JoinHandle<()>)>,
    name: &'static str,
    deadline: Instant,
) -> bool {
    loop {
        if !handles.iter().any(|(n, _)| *n == name) {
            return true;
        }
        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(finished) => {
                if let Some(pos) = handles.iter().position(|(n, _)| *n == finished) {
                    let (_, handle) = handles.swap_remove(pos);
                    if handle.join().is_err() {
                        error!("{finished} thread panicked");
                    }
                }
                if finished == name {
                    return true;
                }
            }
            Err(_) => {
                warn!("{name} thread did not stop in time; detaching");
                return false;
            }
        }
    }
}

fn render_loop(
    mut compositor: Compositor,
    reader: SnapshotReader,
    interval: Duration,
    frames: Sender<Frame>,
    link: &ArcSwap<LinkStatus>,
    counters: &Counters,
    stop: &Shutdown,
) {
    let ticker = channel::tick(interval);
    let mut previous: Option<Frame> = None;
    loop {
        select! {
            recv(stop.signal()) -> _ => break,
            recv(ticker) -> _ => {
                let snapshot = reader.snapshot();
                let partial = link.load().partial_update;
                let frame = compositor.render(&snapshot, previous.as_ref(), partial);
                counters.rendered.fetch_add(1, Ordering::Relaxed);
                match frames.try_send(frame.clone()) {
                    Ok(()) => previous = Some(frame.into_full()),
                    Err(TrySendError::Full(_)) => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("display busy, frame dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
    debug!("render loop finished");
}

fn display_loop(mut manager: ConnectionManager, frames: Receiver<Frame>, link: &ArcSwap<LinkStatus>) {
    let publish = |manager: &ConnectionManager, sent: bool| {
        let previous = link.load();
        link.store(Arc::new(LinkStatus::observe(manager, &previous, sent)));
    };
    loop {
        if !manager.is_ready() {
            publish(&manager, false);
            match manager.reconnect() {
                Ok(true) => publish(&manager, false),
                Ok(false) => break,
                Err(err) => {
                    error!("giving up on the display: {err}");
                    break;
                }
            }
        }
        let Ok(frame) = frames.recv() else {
            break;
        };
        let sent = match manager.send_frame(&frame) {
            Ok(sent) => sent,
            Err(err) if err.is_connection_fault() => false,
            Err(err) => {
                warn!("frame not sent: {err}");
                false
            }
        };
        publish(&manager, sent);
    }
    manager.shutdown();
    publish(&manager, false);
    debug!("display loop finished");
}
