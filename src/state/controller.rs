//! Session controller
//!
//! Turns button events into session transitions:
//! - Idle: no book selected
//! - Selected: a book is chosen, waiting for confirm to start
//! - Playing: a mode loop is running on the mode thread
//! - Paused: the mode loop is parked in its pause check
//!
//! Event handling never blocks on output. Announcements are queued after
//! the session lock is released, and mode loops run on their own thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::modes::{CancelFlag, CancelToken, ModeContext, Outcome, SharedTactile};
use super::session::{PlaybackState, ReadingMode, Session};
use crate::config::{Adjustable, Config, ModeConfig};
use crate::events::ButtonEvent;
use crate::input::{Button, HoldGate};
use crate::library::{ContentItem, LibraryUpdater, TextExtractor};
use crate::progress::ProgressStore;
use crate::voice::VoiceDispatcher;

/// Limits and locations the controller needs beyond the mode loops
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub speech_rate: Adjustable,
    pub tactile_dwell_ms: Adjustable,
    pub books_dir: PathBuf,
    pub min_text_chars: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            speech_rate: config.voice.rate,
            tactile_dwell_ms: config.tactile.dwell_ms,
            books_dir: config.books_dir(),
            min_text_chars: config.library.min_text_chars,
        }
    }
}

/// Collaborators handed to [`Controller::new`]
pub struct ControllerParts {
    pub library: Vec<ContentItem>,
    pub tactile: SharedTactile,
    pub voice: VoiceDispatcher,
    pub progress: ProgressStore,
    pub extractor: Arc<dyn TextExtractor>,
    pub updater: Option<Arc<LibraryUpdater>>,
}

/// Owns the session and drives the mode thread
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: ModeContext,
    extractor: Arc<dyn TextExtractor>,
    updater: Option<Arc<LibraryUpdater>>,
    settings: ControllerSettings,
    cancel: CancelFlag,
    mode_thread: Mutex<Option<JoinHandle<()>>>,
    updating: AtomicBool,
}

impl Controller {
    pub fn new(
        parts: ControllerParts,
        settings: ControllerSettings,
        modes: ModeConfig,
    ) -> Self {
        let session = Session::new(
            parts.library,
            settings.speech_rate.clamp(settings.speech_rate.initial),
            settings.tactile_dwell_ms.clamp(settings.tactile_dwell_ms.initial),
        );

        let ctx = ModeContext {
            session: Arc::new(Mutex::new(session)),
            tactile: parts.tactile,
            voice: parts.voice,
            progress: Arc::new(Mutex::new(parts.progress)),
            settings: modes,
        };

        Self {
            inner: Arc::new(Inner {
                ctx,
                extractor: parts.extractor,
                updater: parts.updater,
                settings,
                cancel: CancelFlag::new(),
                mode_thread: Mutex::new(None),
                updating: AtomicBool::new(false),
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.ctx.lock_session()
    }

    /// Current playback state
    pub fn state(&self) -> PlaybackState {
        self.session().state()
    }

    /// Held-next may only fire while a book is actively playing
    pub fn hold_gate(&self) -> HoldGate {
        let session = Arc::clone(&self.inner.ctx.session);
        Arc::new(move |button: Button| {
            if button != Button::Next {
                return false;
            }
            let session = session.lock().unwrap_or_else(PoisonError::into_inner);
            session.is_playing && !session.is_paused
        })
    }

    /// Process button events until the channel closes
    pub async fn run(&self, mut event_rx: mpsc::Receiver<ButtonEvent>) {
        info!("controller started in Idle state");

        while let Some(event) = event_rx.recv().await {
            self.handle_event(event);
        }

        info!("controller stopped");
    }

    /// Queue the startup announcements
    pub fn greet(&self) {
        let (count, first) = {
            let session = self.session();
            (
                session.library().len(),
                session.current().map(|item| item.display_name.clone()),
            )
        };

        self.announce("Braille reader ready.");
        match first {
            Some(name) => {
                self.announce(format!("{} books in the library.", count));
                self.announce(format!("First book: {}.", name));
                self.announce("Press next to browse and confirm to select.");
            }
            None => self.announce("No books yet. Press update to download books."),
        }
    }

    /// Apply one button event
    pub fn handle_event(&self, event: ButtonEvent) {
        debug!(%event, "handling button event");
        match event {
            ButtonEvent::Pressed { button } => match button {
                Button::Next => self.next_book(),
                Button::Confirm => self.confirm(),
                Button::Mode => self.cycle_mode(),
                Button::SpeedUp => self.change_speed(true),
                Button::SpeedDown => self.change_speed(false),
                Button::Update => self.request_update(),
            },
            ButtonEvent::HeldThreshold {
                button: Button::Next,
                duration_ms,
            } => {
                info!(duration_ms, "next held, restarting book");
                self.restart();
            }
            ButtonEvent::HeldThreshold { .. } | ButtonEvent::Released { .. } => {}
        }
    }

    fn announce(&self, text: impl Into<String>) {
        self.inner.ctx.announce(text);
    }

    fn next_book(&self) {
        let message = {
            let mut session = self.session();
            let playing = session.is_playing;
            let name = session.advance_cursor().map(|item| item.display_name.clone());
            if !playing {
                session.selected = None;
            }
            match name {
                Some(name) => name,
                None => "No books in the library.".to_string(),
            }
        };
        self.announce(message);
    }

    fn confirm(&self) {
        let (old, new, message) = {
            let mut session = self.session();
            let old = session.state();
            let message = match old {
                PlaybackState::Idle => match session.current().cloned() {
                    Some(item) => {
                        let message = format!(
                            "{} selected. {}. Press confirm to start.",
                            item.display_name,
                            session.mode.label()
                        );
                        session.selected = Some(item);
                        Some(message)
                    }
                    None => Some("No books in the library.".to_string()),
                },
                PlaybackState::Selected => {
                    session.is_playing = true;
                    session.is_paused = false;
                    None
                }
                PlaybackState::Playing => {
                    session.is_paused = true;
                    Some("Paused.".to_string())
                }
                PlaybackState::Paused => {
                    session.is_paused = false;
                    Some("Resuming.".to_string())
                }
            };
            (old, session.state(), message)
        };

        if new != old {
            info!(from = %old, to = %new, "state transition");
        }

        match message {
            Some(message) => self.announce(message),
            None => self.launch(false),
        }
    }

    fn cycle_mode(&self) {
        let message = {
            let mut session = self.session();
            if session.selected.is_none() {
                debug!("mode change without a selection");
                "Select a book first."
            } else if session.is_playing {
                debug!(state = %session.state(), "mode change while playing");
                "Stop playback to change the mode."
            } else {
                session.mode = session.mode.next();
                info!(mode = %session.mode, "mode changed");
                session.mode.label()
            }
        };
        self.announce(message);
    }

    fn change_speed(&self, faster: bool) {
        let settings = &self.inner.settings;
        let (rate, dwell) = {
            let mut session = self.session();
            if faster {
                session.speech_rate = settings.speech_rate.raise(session.speech_rate);
                session.tactile_dwell_ms = settings.tactile_dwell_ms.lower(session.tactile_dwell_ms);
            } else {
                session.speech_rate = settings.speech_rate.lower(session.speech_rate);
                session.tactile_dwell_ms = settings.tactile_dwell_ms.raise(session.tactile_dwell_ms);
            }
            (session.speech_rate, session.tactile_dwell_ms)
        };

        info!(rate, dwell_ms = dwell, "speed changed");
        self.announce(format!(
            "Speech {}, writing {}.",
            speech_speed_word(rate),
            writing_speed_word(dwell)
        ));
    }

    fn restart(&self) {
        {
            let session = self.session();
            if !(session.is_playing && !session.is_paused) {
                debug!(state = %session.state(), "restart ignored");
                return;
            }
            // cancel under the lock so a finishing loop sees it before it
            // clears is_playing
            self.inner.cancel.cancel();
        }
        self.launch(true);
    }

    /// Cancel any running mode loop and start the selected mode on a new
    /// mode thread
    ///
    /// The new thread first waits for the old one to exit, so two loops
    /// never drive the outputs at once.
    fn launch(&self, restart: bool) {
        self.inner.cancel.cancel();
        let token = self.inner.cancel.token();

        let mut slot = self
            .inner
            .mode_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = slot.take();

        let controller = self.clone();
        let spawned = thread::Builder::new()
            .name("mode-loop".to_string())
            .spawn(move || {
                if let Some(previous) = previous {
                    if previous.join().is_err() {
                        warn!("previous mode loop panicked");
                    }
                }
                controller.run_session(&token, restart);
            });

        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(e) => {
                warn!(?e, "failed to spawn mode loop");
                drop(slot);
                self.stop_playing();
                self.announce("Could not start playback.");
            }
        }
    }

    /// Body of the mode thread
    fn run_session(&self, token: &CancelToken, restart: bool) {
        if token.is_cancelled() {
            return;
        }

        let ctx = &self.inner.ctx;
        let (mode, selected) = {
            let session = self.session();
            (session.mode, session.selected.clone())
        };
        let Some(item) = selected else {
            self.stop_playing();
            return;
        };

        if mode.uses_content() {
            if !self.load_content(&item) {
                self.stop_playing();
                return;
            }
            if restart {
                ctx.set_position(0);
                ctx.checkpoint();
                ctx.announce("Starting from the beginning.");
            }
        }

        if token.is_cancelled() {
            return;
        }

        ctx.clear_outputs();
        ctx.say(&format!("Starting {}.", mode.label()));
        let outcome = mode.run(ctx, token);
        self.finish(mode, outcome, token);
    }

    /// Make sure the selected book's text is loaded and positioned
    fn load_content(&self, item: &ContentItem) -> bool {
        let ctx = &self.inner.ctx;
        let loaded = self.session().content_id() == Some(item.id.as_str());
        if loaded {
            return true;
        }

        ctx.say("Loading book.");
        let path = item.local_path(&self.inner.settings.books_dir);
        if !path.is_file() {
            warn!(id = %item.id, path = ?path, "selected book is missing");
            ctx.say("The book file could not be found.");
            return false;
        }

        let text = self.inner.extractor.extract(&path);
        if text.chars().count() < self.inner.settings.min_text_chars {
            warn!(id = %item.id, "book text empty or unreadable");
            ctx.say("The book could not be read or is empty.");
            return false;
        }

        let stored = {
            let progress = ctx
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            progress.get(&item.id).map(|record| record.position)
        };

        let percent = {
            let mut session = self.session();
            session.set_content(&item.id, text.chars().collect());
            session.set_position(stored.unwrap_or(0));
            (session.position() > 0).then(|| session.percent_complete())
        };

        info!(id = %item.id, resume_percent = ?percent, "book loaded");
        if let Some(percent) = percent {
            ctx.say(&format!(
                "Book loaded. {} percent complete. Continuing where you left off.",
                percent
            ));
        }
        true
    }

    fn finish(&self, mode: ReadingMode, outcome: Outcome, token: &CancelToken) {
        let ctx = &self.inner.ctx;
        ctx.clear_outputs();

        // Superseded by a restart or shutdown; whoever cancelled owns the
        // session from here
        if token.is_cancelled() {
            ctx.checkpoint();
            return;
        }

        {
            let mut session = self.session();
            // a restart may have landed since the check above
            if token.is_cancelled() {
                drop(session);
                ctx.checkpoint();
                return;
            }
            session.is_playing = false;
            session.is_paused = false;
            if outcome == Outcome::Completed && mode.uses_content() {
                session.set_position(0);
            }
        }
        ctx.checkpoint();
        info!(mode = %mode, ?outcome, "playback ended");

        let message = match outcome {
            Outcome::Completed => match mode {
                ReadingMode::WriteOnly => "The whole book has been written. Well done!",
                ReadingMode::ReadOnly => "The whole book has been read. Well done!",
                ReadingMode::ReadAndWrite => "The whole book has been read and written.",
                ReadingMode::Education => "Lesson complete.",
            },
            Outcome::Stopped => "Playback stopped. Press confirm to continue.",
        };
        ctx.announce(message);
    }

    fn stop_playing(&self) {
        let mut session = self.session();
        session.is_playing = false;
        session.is_paused = false;
    }

    fn request_update(&self) {
        let Some(updater) = self.inner.updater.clone() else {
            self.announce("Library updates are not configured.");
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let controller = self.clone();
                runtime.spawn(async move {
                    controller.update_library(&updater, true).await;
                });
            }
            Err(e) => warn!(error = %e, "no runtime for library update"),
        }
    }

    /// Refresh the library; `announce` speaks progress and results
    pub async fn update_library(&self, updater: &LibraryUpdater, announce: bool) {
        if self.inner.updating.swap(true, Ordering::SeqCst) {
            debug!("library update already running");
            return;
        }

        if announce {
            self.announce("Updating the library.");
        }

        match updater.refresh().await {
            Ok(summary) => {
                info!(
                    found = summary.found(),
                    added = summary.added,
                    "library refreshed"
                );
                self.replace_library(summary.items.clone());
                if announce {
                    self.announce(format!("{} books found.", summary.found()));
                    if summary.added > 0 {
                        self.announce(format!("{} new books added.", summary.added));
                    } else {
                        self.announce("All books are up to date.");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "library refresh failed");
                if announce {
                    self.announce("Could not get the book list.");
                }
            }
        }

        self.inner.updating.store(false, Ordering::SeqCst);
    }

    /// Swap in a new book list without disturbing playback
    pub fn replace_library(&self, items: Vec<ContentItem>) {
        self.session().replace_library(items);
    }

    /// Stop playback and release every output
    ///
    /// Blocks until the mode thread has exited.
    pub fn shutdown(&self) {
        info!("controller shutting down");
        self.stop_playing();
        self.inner.cancel.cancel();

        let handle = self
            .inner
            .mode_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("mode loop panicked");
            }
        }

        let ctx = &self.inner.ctx;
        ctx.clear_outputs();
        ctx.checkpoint();
        ctx.voice.stop();
    }
}

fn speech_speed_word(rate: f32) -> &'static str {
    if rate > 1.3 {
        "fast"
    } else if rate > 0.8 {
        "normal"
    } else {
        "slow"
    }
}

fn writing_speed_word(dwell_ms: f32) -> &'static str {
    if dwell_ms < 400.0 {
        "fast"
    } else if dwell_ms < 700.0 {
        "normal"
    } else {
        "slow"
    }
}
