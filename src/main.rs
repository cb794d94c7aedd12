//! braille-reader: playback controller for a braille and speech book reader
//!
//! Runs on the reader device and provides:
//! - Debounced front-panel buttons polled on a dedicated thread
//! - A session controller with four reading modes
//! - Braille output on a six-dot actuator cell
//! - Speech through a Piper synthesis pipeline
//! - Resume positions per book and a remotely refreshed library

mod config;
mod events;
mod hardware;
mod input;
mod library;
mod lifecycle;
mod process;
mod progress;
mod state;
mod tactile;
mod voice;

#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::input::{ButtonPoller, Debouncer, PinBank};
use crate::library::{load_catalog, CommandExtractor, LibraryUpdater, TextExtractor};
use crate::lifecycle::ShutdownSignal;
use crate::progress::ProgressStore;
use crate::state::{Controller, ControllerParts, ControllerSettings, SharedTactile};
use crate::tactile::{TactileDriver, TactileOutput};
use crate::voice::{PiperEngine, SpeechEngine, VoiceDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "braille-reader starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(data_dir = ?config.data_dir, "configuration loaded");

    // Without speech the device cannot tell the reader anything
    let engine = PiperEngine::new(config.voice.clone());
    engine.verify()?;
    let engine: Arc<dyn SpeechEngine> = Arc::new(engine);
    let voice = VoiceDispatcher::start(engine, config.voice.dispatch_settings())?;

    let board = hardware::open(&config.pins)?;
    let cell: Box<dyn TactileOutput> =
        Box::new(TactileDriver::new(board.actuators, config.tactile.timing()));
    let tactile: SharedTactile = Arc::new(Mutex::new(cell));
    let buttons = PinBank::new(board.buttons);

    let progress = ProgressStore::load(config.progress_path());
    let library = load_catalog(&config.catalog_path());
    info!(books = library.len(), "library loaded");

    let extractor: Arc<dyn TextExtractor> = Arc::new(CommandExtractor::new(
        &config.library,
        config.voice.scratch_dir.clone(),
    ));
    let updater = Some(LibraryUpdater::new(
        config.library.clone(),
        config.books_dir(),
        config.catalog_path(),
    ))
    .filter(LibraryUpdater::is_configured)
    .map(Arc::new);

    let controller = Controller::new(
        ControllerParts {
            library,
            tactile,
            voice,
            progress,
            extractor,
            updater: updater.clone(),
        },
        ControllerSettings::from_config(&config),
        config.modes.clone(),
    );

    let shutdown = ShutdownSignal::new();

    // Button poller -> controller
    let (button_tx, button_rx) = mpsc::channel(32);
    let poller = ButtonPoller::new(button_tx);
    if let Err(e) = poller.start(
        buttons,
        Debouncer::new(config.input.debounce_settings()),
        controller.hold_gate(),
        config.input.poll_interval(),
    ) {
        error!(?e, "failed to start button poller");
        return Err(e.into());
    }

    controller.greet();

    let refresher = updater.map(|updater| {
        let controller = controller.clone();
        let every = Duration::from_secs(config.library.refresh_interval_secs.max(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                controller.update_library(&updater, false).await;
            }
        })
    });

    info!("reader initialized, entering main loop");

    tokio::select! {
        _ = controller.run(button_rx) => {
            warn!("button channel closed");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!(state = %controller.state(), "shutting down...");

    poller.stop();
    if let Some(refresher) = refresher {
        refresher.abort();
    }
    let closing = controller.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || closing.shutdown()).await {
        error!(?e, "controller shutdown panicked");
    }

    info!("braille-reader stopped");

    Ok(())
}
