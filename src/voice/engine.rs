//! Speech synthesis through Piper plus a command-line audio player
//!
//! Piper reads the utterance on stdin and writes a WAV file, which is
//! then handed to the player. Both steps run under their own timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use super::text::length_scale;
use crate::config::VoiceConfig;
use crate::process::{run_with_timeout, ProcessError};

/// Something that can turn text into audible speech
pub trait SpeechEngine: Send + Sync {
    /// Synthesize and play one utterance; returns once playback ends
    fn say(&self, text: &str, rate: f32) -> Result<(), VoiceError>;
}

/// Errors from the speech pipeline
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("speech engine not found at {0}")]
    MissingBinary(PathBuf),

    #[error("voice model not found at {0}")]
    MissingModel(PathBuf),

    #[error("synthesis failed: {0}")]
    Synthesis(#[source] ProcessError),

    #[error("no audio produced at {0}")]
    EmptyAudio(PathBuf),

    #[error("playback failed: {0}")]
    Playback(#[source] ProcessError),

    #[error("failed to spawn speech worker: {0}")]
    Worker(String),
}

/// Piper text-to-speech engine
pub struct PiperEngine {
    config: VoiceConfig,
    next_id: AtomicU64,
}

impl PiperEngine {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
        }
    }

    /// Check that the engine binary and voice model are present
    ///
    /// The device cannot operate without a voice, so callers treat a
    /// failure here as fatal.
    pub fn verify(&self) -> Result<(), VoiceError> {
        if !self.config.piper_bin.is_file() {
            return Err(VoiceError::MissingBinary(self.config.piper_bin.clone()));
        }
        if !self.config.model.is_file() {
            return Err(VoiceError::MissingModel(self.config.model.clone()));
        }
        info!(
            bin = ?self.config.piper_bin,
            model = ?self.config.model,
            "speech engine ready"
        );
        Ok(())
    }

    fn scratch_wav(&self) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.config
            .scratch_dir
            .join(format!("utterance-{}-{}.wav", std::process::id(), id))
    }

    fn synthesize(&self, text: &str, rate: f32, wav: &Path) -> Result<(), VoiceError> {
        let cfg = &self.config;
        let mut command = Command::new(&cfg.piper_bin);
        command
            .arg("--model")
            .arg(&cfg.model)
            .arg("--output_file")
            .arg(wav)
            .arg("--length_scale")
            .arg(format!("{:.2}", length_scale(rate, cfg.min_length_scale)))
            .arg("--noise_scale")
            .arg(cfg.noise_scale.to_string())
            .arg("--noise_w")
            .arg(cfg.noise_w.to_string())
            .arg("--sentence_silence")
            .arg(cfg.sentence_silence.to_string());

        run_with_timeout(
            command,
            Some(text.as_bytes()),
            Duration::from_millis(cfg.synth_timeout_ms),
        )
        .map_err(VoiceError::Synthesis)
    }

    fn play(&self, wav: &Path) -> Result<(), VoiceError> {
        let produced = fs::metadata(wav).map(|m| m.len() > 0).unwrap_or(false);
        if !produced {
            return Err(VoiceError::EmptyAudio(wav.to_owned()));
        }

        let mut command = Command::new(&self.config.player);
        command.args(&self.config.player_args).arg(wav);

        run_with_timeout(
            command,
            None,
            Duration::from_millis(self.config.playback_timeout_ms),
        )
        .map_err(VoiceError::Playback)
    }
}

impl SpeechEngine for PiperEngine {
    fn say(&self, text: &str, rate: f32) -> Result<(), VoiceError> {
        let wav = self.scratch_wav();
        debug!(chars = text.chars().count(), rate, "synthesizing");

        let result = self
            .synthesize(text, rate, &wav)
            .and_then(|_| self.play(&wav));

        let _ = fs::remove_file(&wav);
        result
    }
}
