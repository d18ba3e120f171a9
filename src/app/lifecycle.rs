use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::{Error, Result};

/// Process-wide stop request. Clones share one signal; triggering is idempotent.
///
/// Waiting threads block on a channel whose only sender is dropped by
/// [`Shutdown::trigger`], so every `wait` and `select!` on [`Shutdown::signal`]
/// wakes at once.
#[derive(Debug, Clone)]
pub struct Shutdown {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    pub fn trigger(&self) {
        let mut guard = self
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            log::debug!("shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }

    /// Sleep for up to `timeout`. Returns `true` as soon as shutdown is requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.signal.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Becomes ready (disconnected) once shutdown is requested. For `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Install a ctrl-c handler that requests an orderly shutdown instead of exiting.
pub fn install_ctrlc(shutdown: &Shutdown) -> Result<()> {
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        handle.trigger();
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}
