//! # Serial Manager
//!
//! Owns the event loop. All registered sources (dongle readers, the
//! rtl_wmbus pipe, the simulator) push events into one channel; the loop
//! runs on a single thread and serializes every frame callback, so meter
//! state is never touched concurrently.
//!
//! The manager also owns the global stop signal and the one-shot exit
//! timer. `stop()` is idempotent and wakes the loop from any blocking wait.

use crate::error::MetersError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// Identifies a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceToken(u32);

/// Events a source can push into the loop.
#[derive(Debug)]
pub enum SourceEvent {
    /// A complete, envelope-validated raw wM-Bus frame.
    Frame { token: SourceToken, bytes: Vec<u8> },
    /// The source hit EOF or an unrecoverable read error.
    Closed { token: SourceToken, reason: String },
}

/// Clonable handle that stops the event loop.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop. Idempotent.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Blocks until `stop()` has been called.
    pub async fn wait_for_stop(&self) {
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent stop()
            // cannot slip between the check and the wait
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// The single-threaded event loop over all registered I/O sources.
pub struct SerialManager {
    event_tx: mpsc::UnboundedSender<SourceEvent>,
    event_rx: mpsc::UnboundedReceiver<SourceEvent>,
    stop: StopHandle,
    exit_after: Option<Duration>,
    next_token: u32,
    sources: HashMap<SourceToken, String>,
}

impl Default for SerialManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialManager {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        SerialManager {
            event_tx,
            event_rx,
            stop: StopHandle::new(),
            exit_after: None,
            next_token: 0,
            sources: HashMap::new(),
        }
    }

    /// Register a source by name. The returned sender delivers the source's
    /// events into the loop; the token identifies it in logs and `Closed`
    /// events.
    pub fn register_source(&mut self, name: &str) -> (SourceToken, mpsc::UnboundedSender<SourceEvent>) {
        let token = SourceToken(self.next_token);
        self.next_token += 1;
        self.sources.insert(token, name.to_string());
        log::debug!("(manager) registered source \"{name}\"");
        (token, self.event_tx.clone())
    }

    /// Arm the one-shot exit timer; when it fires the loop stops.
    pub fn schedule_exit_after(&mut self, duration: Duration) {
        self.exit_after = Some(duration);
    }

    /// Handle used by callbacks and signal handlers to stop the loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the loop until stopped. Every complete frame is handed to
    /// `on_frame` on this thread.
    ///
    /// Returns an error when the last remaining source closed before any
    /// stop was requested, so the caller can exit nonzero.
    pub async fn run<F>(&mut self, mut on_frame: F) -> Result<(), MetersError>
    where
        F: FnMut(SourceToken, Vec<u8>),
    {
        let exit_deadline = self.exit_after.map(|d| Instant::now() + d);
        let stop = self.stop.clone();

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(|e| MetersError::ConfigInvalid(format!("cannot install SIGTERM handler: {e}")))?;
        let mut sigchld = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child())
            .map_err(|e| MetersError::ConfigInvalid(format!("cannot install SIGCHLD handler: {e}")))?;

        loop {
            let exit_timer = async {
                match exit_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = stop.wait_for_stop() => {
                    log::debug!("(manager) stop requested");
                    return Ok(());
                }
                _ = exit_timer => {
                    log::info!("(manager) exit timer fired, stopping");
                    stop.stop();
                    return Ok(());
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("(manager) SIGINT received, stopping");
                    stop.stop();
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    log::info!("(manager) SIGTERM received, stopping");
                    stop.stop();
                    return Ok(());
                }
                _ = sigchld.recv() => {
                    log::warn!("(manager) child process state changed");
                }
                event = self.event_rx.recv() => {
                    match event {
                        Some(SourceEvent::Frame { token, bytes }) => on_frame(token, bytes),
                        Some(SourceEvent::Closed { token, reason }) => {
                            let name = self
                                .sources
                                .remove(&token)
                                .unwrap_or_else(|| "unknown".to_string());
                            log::warn!("(manager) source \"{name}\" closed: {reason}");
                            if self.sources.is_empty() {
                                stop.stop();
                                return Err(MetersError::ChildProcessExited(format!(
                                    "last source \"{name}\" closed: {reason}"
                                )));
                            }
                        }
                        None => {
                            // All senders dropped; nothing can arrive anymore
                            stop.stop();
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
