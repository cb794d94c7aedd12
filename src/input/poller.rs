//! Button poll loop
//!
//! Samples the button lines on a fixed cadence from a dedicated thread and
//! forwards classified events to the session controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::buttons::{Button, ButtonLines};
use super::debounce::Debouncer;
use crate::events::ButtonEvent;

/// Decides whether a long hold on a button may fire at this moment
pub type HoldGate = Arc<dyn Fn(Button) -> bool + Send + Sync>;

/// Polls button lines and sends events to the controller
pub struct ButtonPoller {
    event_tx: mpsc::Sender<ButtonEvent>,
    running: Arc<AtomicBool>,
}

impl ButtonPoller {
    /// Create a new button poller
    pub fn new(event_tx: mpsc::Sender<ButtonEvent>) -> Self {
        Self {
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the poll loop
    ///
    /// This spawns a dedicated thread that owns the lines and the
    /// debouncer. The loop runs until `stop()` is called or the event
    /// channel closes.
    pub fn start<L>(
        &self,
        lines: L,
        debouncer: Debouncer,
        hold_gate: HoldGate,
        interval: Duration,
    ) -> Result<(), InputError>
    where
        L: ButtonLines + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(InputError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("button-poller".to_string())
            .spawn(move || {
                info!(?interval, "button poller thread started");
                run_poll_loop(lines, debouncer, hold_gate, interval, event_tx, &running);
                running.store(false, Ordering::SeqCst);
                info!("button poller thread stopped");
            });

        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            error!(?e, "failed to spawn button poller");
            return Err(InputError::ThreadSpawn(e.to_string()));
        }

        Ok(())
    }

    /// Stop the poll loop; it exits after the current poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the poller is currently running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the button poller
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("button poller is already running")]
    AlreadyRunning,

    #[error("failed to spawn poller thread: {0}")]
    ThreadSpawn(String),
}

fn run_poll_loop<L: ButtonLines>(
    mut lines: L,
    mut debouncer: Debouncer,
    hold_gate: HoldGate,
    interval: Duration,
    event_tx: mpsc::Sender<ButtonEvent>,
    running: &AtomicBool,
) {
    let gate = |button: Button| hold_gate(button);

    while running.load(Ordering::SeqCst) {
        for event in debouncer.poll(&mut lines, Instant::now(), &gate) {
            debug!(%event, "button event");
            if event_tx.blocking_send(event).is_err() {
                warn!("failed to send button event - channel closed?");
                return;
            }
        }

        thread::sleep(interval);
    }
}
