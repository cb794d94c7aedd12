//! Speech request dispatch
//!
//! Three ways to speak:
//! - `enqueue`: ordered FIFO served by a single worker thread, so queued
//!   utterances never overlap each other
//! - `speak_blocking`: synchronous on the caller's thread, bypassing the
//!   queue
//! - `speak_detached`: a one-shot thread with no ordering against the
//!   queue or other detached calls
//!
//! Detached speech can overlap queued speech. That is accepted for
//! low-latency interim audio (one word while its braille is being
//! written); the number of detached utterances in flight is capped so a
//! fast writer cannot pile up synthesis processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::engine::{SpeechEngine, VoiceError};
use super::text::normalize;

/// One queued utterance
pub struct SpeechRequest {
    pub text: String,
    pub rate: f32,
    /// Fired with `true` once played, `false` if dropped
    pub done: Option<oneshot::Sender<bool>>,
}

enum Job {
    Speak(SpeechRequest),
    Stop,
}

/// Limits applied to every utterance
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub max_chars: usize,
    pub detached_limit: usize,
}

/// Front door to the speech engine
#[derive(Clone)]
pub struct VoiceDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn SpeechEngine>,
    queue: mpsc::UnboundedSender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    settings: DispatchSettings,
    detached_in_flight: AtomicUsize,
}

impl VoiceDispatcher {
    /// Start the FIFO worker thread
    pub fn start(
        engine: Arc<dyn SpeechEngine>,
        settings: DispatchSettings,
    ) -> Result<Self, VoiceError> {
        let (queue, rx) = mpsc::unbounded_channel();

        let worker_engine = Arc::clone(&engine);
        let worker = thread::Builder::new()
            .name("speech-worker".to_string())
            .spawn(move || run_worker(worker_engine, rx, settings.max_chars))
            .map_err(|e| VoiceError::Worker(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                queue,
                worker: Mutex::new(Some(worker)),
                settings,
                detached_in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Queue an utterance; returns immediately
    pub fn enqueue(&self, text: impl Into<String>, rate: f32) {
        self.submit(SpeechRequest {
            text: text.into(),
            rate,
            done: None,
        });
    }

    /// Queue an utterance and get notified when it has been handled
    #[cfg(test)]
    pub fn enqueue_with_signal(&self, text: impl Into<String>, rate: f32) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.submit(SpeechRequest {
            text: text.into(),
            rate,
            done: Some(tx),
        });
        rx
    }

    fn submit(&self, request: SpeechRequest) {
        if self.inner.queue.send(Job::Speak(request)).is_err() {
            warn!("speech worker stopped, request dropped");
        }
    }

    /// Speak on the calling thread, bypassing the queue
    pub fn speak_blocking(&self, text: &str, rate: f32) -> bool {
        speak_now(
            self.inner.engine.as_ref(),
            text,
            rate,
            self.inner.settings.max_chars,
        )
    }

    /// Speak on a throwaway thread; nothing waits for it
    pub fn speak_detached(&self, text: impl Into<String>, rate: f32) {
        let text = text.into();
        let limit = self.inner.settings.detached_limit;

        let claimed = self
            .inner
            .detached_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok();
        if !claimed {
            debug!(limit, "detached speech busy, dropping utterance");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("speech-detached".to_string())
            .spawn(move || {
                speak_now(inner.engine.as_ref(), &text, rate, inner.settings.max_chars);
                inner.detached_in_flight.fetch_sub(1, Ordering::SeqCst);
            });

        if let Err(e) = spawned {
            self.inner.detached_in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!(?e, "failed to spawn detached speech");
        }
    }

    /// Let the worker drain what is already queued, then exit
    ///
    /// An utterance that is already playing runs to completion.
    pub fn stop(&self) {
        let _ = self.inner.queue.send(Job::Stop);
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("speech worker panicked");
            }
        }
    }
}

fn run_worker(engine: Arc<dyn SpeechEngine>, mut rx: mpsc::UnboundedReceiver<Job>, max_chars: usize) {
    info!("speech worker started");

    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Speak(request) => {
                let spoken = speak_now(engine.as_ref(), &request.text, request.rate, max_chars);
                if let Some(done) = request.done {
                    let _ = done.send(spoken);
                }
            }
            Job::Stop => break,
        }
    }

    info!("speech worker stopped");
}

fn speak_now(engine: &dyn SpeechEngine, text: &str, rate: f32, max_chars: usize) -> bool {
    let text = normalize(text, max_chars);
    if text.is_empty() {
        return false;
    }

    match engine.say(&text, rate) {
        Ok(()) => true,
        Err(e) => {
            let preview: String = text.chars().take(40).collect();
            warn!(error = %e, text = %preview, "utterance dropped");
            false
        }
    }
}
