//! Configuration loading and management
//!
//! Defaults are overlaid by an optional JSON file and then by a handful of
//! environment variables. Every field in the file is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::input::{Button, DebounceSettings};
use crate::tactile::TactileTiming;
use crate::voice::DispatchSettings;

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for books, the catalog and progress; taken from the
    /// environment, never from the file
    #[serde(skip)]
    pub data_dir: PathBuf,

    pub pins: PinConfig,
    pub input: InputConfig,
    pub tactile: TactileConfig,
    pub voice: VoiceConfig,
    pub modes: ModeConfig,
    pub library: LibraryConfig,
}

/// BCM line numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Actuator lines in dot order (dot 1 first)
    pub actuators: Vec<u8>,
    pub buttons: ButtonPins,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            actuators: vec![4, 17, 27, 22, 23, 24],
            buttons: ButtonPins::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonPins {
    pub next: u8,
    pub confirm: u8,
    pub mode: u8,
    pub speed_up: u8,
    pub speed_down: u8,
    pub update: u8,
}

impl Default for ButtonPins {
    fn default() -> Self {
        Self {
            next: 5,
            confirm: 6,
            mode: 13,
            speed_up: 19,
            speed_down: 26,
            update: 21,
        }
    }
}

impl ButtonPins {
    /// Every button paired with its line
    pub fn lines(&self) -> Vec<(Button, u8)> {
        Button::ALL
            .iter()
            .map(|&button| {
                let line = match button {
                    Button::Next => self.next,
                    Button::Confirm => self.confirm,
                    Button::Mode => self.mode,
                    Button::SpeedUp => self.speed_up,
                    Button::SpeedDown => self.speed_down,
                    Button::Update => self.update,
                };
                (button, line)
            })
            .collect()
    }
}

/// Button sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub poll_ms: u64,
    pub debounce_ms: u64,
    pub repeat_guard_ms: u64,
    pub hold_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_ms: 20,
            debounce_ms: 50,
            repeat_guard_ms: 300,
            hold_ms: 2000,
        }
    }
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn debounce_settings(&self) -> DebounceSettings {
        DebounceSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            repeat_guard: Duration::from_millis(self.repeat_guard_ms),
            hold_threshold: Duration::from_millis(self.hold_ms),
        }
    }
}

/// A user-adjustable value with fixed bounds and step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustable {
    pub initial: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Adjustable {
    pub fn raise(&self, value: f32) -> f32 {
        round3((value + self.step).min(self.max))
    }

    pub fn lower(&self, value: f32) -> f32 {
        round3((value - self.step).max(self.min))
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Actuator cell timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TactileConfig {
    /// Symbol dwell in milliseconds; lower is faster writing
    pub dwell_ms: Adjustable,
    pub settle_up_ms: u64,
    pub settle_down_ms: u64,
    pub min_hold_ms: u64,
    pub symbol_gap_ms: u64,
    pub word_gap_factor: f32,
}

impl Default for TactileConfig {
    fn default() -> Self {
        Self {
            dwell_ms: Adjustable {
                initial: 500.0,
                min: 300.0,
                max: 1000.0,
                step: 100.0,
            },
            settle_up_ms: 100,
            settle_down_ms: 50,
            min_hold_ms: 100,
            symbol_gap_ms: 30,
            word_gap_factor: 3.0,
        }
    }
}

impl TactileConfig {
    pub fn timing(&self) -> TactileTiming {
        TactileTiming {
            dwell: dwell_duration(self.dwell_ms.initial),
            settle_up: Duration::from_millis(self.settle_up_ms),
            settle_down: Duration::from_millis(self.settle_down_ms),
            min_hold: Duration::from_millis(self.min_hold_ms),
            symbol_gap: Duration::from_millis(self.symbol_gap_ms),
            word_gap_factor: self.word_gap_factor,
        }
    }
}

/// Convert a dwell in milliseconds to a duration, treating junk as zero
pub fn dwell_duration(ms: f32) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_millis(ms.round() as u64)
    } else {
        Duration::ZERO
    }
}

/// Speech synthesis and playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Piper binary; relative paths are resolved against the data dir
    pub piper_bin: PathBuf,
    /// Piper voice model (.onnx)
    pub model: PathBuf,
    /// Audio player command, looked up on PATH
    pub player: String,
    pub player_args: Vec<String>,
    /// Where intermediate WAV files are written
    pub scratch_dir: PathBuf,
    pub synth_timeout_ms: u64,
    pub playback_timeout_ms: u64,
    pub noise_scale: f32,
    pub noise_w: f32,
    pub sentence_silence: f32,
    pub min_length_scale: f32,
    /// Longest utterance in characters, ellipsis included
    pub max_chars: usize,
    /// Detached utterances allowed in flight at once
    pub detached_limit: usize,
    pub rate: Adjustable,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            piper_bin: PathBuf::from("piper/piper"),
            model: PathBuf::from("voices/tr_TR-fettah-medium.onnx"),
            player: "aplay".to_string(),
            player_args: vec!["-q".to_string()],
            scratch_dir: std::env::temp_dir(),
            synth_timeout_ms: 30_000,
            playback_timeout_ms: 90_000,
            noise_scale: 0.667,
            noise_w: 0.8,
            sentence_silence: 0.05,
            min_length_scale: 0.6,
            max_chars: 500,
            detached_limit: 2,
            rate: Adjustable {
                initial: 1.0,
                min: 0.5,
                max: 2.0,
                step: 0.2,
            },
        }
    }
}

impl VoiceConfig {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_chars: self.max_chars,
            detached_limit: self.detached_limit,
        }
    }
}

/// Mode loop tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Write-only checkpoints after this many symbols
    pub write_checkpoint_every: usize,
    /// Longest spoken chunk in read-only mode
    pub read_chunk_chars: usize,
    /// A chunk may end early at a sentence end only past this length
    pub sentence_break_after: usize,
    /// Read-and-write checkpoints whenever the position crosses a
    /// multiple of this
    pub mixed_checkpoint_every: usize,
    pub pause_poll_ms: u64,
    pub education_hold_ms: u64,
    pub education_gap_ms: u64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            write_checkpoint_every: 100,
            read_chunk_chars: 480,
            sentence_break_after: 120,
            mixed_checkpoint_every: 500,
            pause_poll_ms: 50,
            education_hold_ms: 1500,
            education_gap_ms: 300,
        }
    }
}

/// Remote library and text extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// JSON directory listing; refresh is disabled without one
    pub listing_url: Option<String>,
    /// File extensions kept from the listing, lower case, no dot
    pub extensions: Vec<String>,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub user_agent: String,
    /// PDF to text converter, looked up on PATH
    pub extractor: String,
    pub extraction_timeout_secs: u64,
    /// Texts shorter than this are rejected as unreadable
    pub min_text_chars: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            listing_url: None,
            extensions: vec!["pdf".to_string(), "txt".to_string()],
            refresh_interval_secs: 3600,
            request_timeout_secs: 15,
            download_timeout_secs: 60,
            user_agent: concat!("braille-reader/", env!("CARGO_PKG_VERSION")).to_string(),
            extractor: "pdftotext".to_string(),
            extraction_timeout_secs: 60,
            min_text_chars: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment, the config file and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("BRAILLE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("braille-reader")
            }
        };

        let file = std::env::var_os("BRAILLE_READER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.json"));

        let mut config = Self::from_file(&file, data_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.resolve_paths();
        Ok(config)
    }

    /// Read `path` if it exists, otherwise start from defaults
    pub fn from_file(path: &Path, data_dir: PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<Config>(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            Config::default()
        };
        config.data_dir = data_dir;
        Ok(config)
    }

    /// Overlay environment variables
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("BRAILLE_LIBRARY_URL") {
            self.library.listing_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(bin) = var("PIPER_BIN") {
            self.voice.piper_bin = PathBuf::from(bin);
        }
        if let Some(model) = var("PIPER_MODEL") {
            self.voice.model = PathBuf::from(model);
        }
        if let Some(player) = var("BRAILLE_AUDIO_PLAYER") {
            self.voice.player = player;
        }
    }

    /// Anchor relative voice paths at the data dir
    pub fn resolve_paths(&mut self) {
        for path in [&mut self.voice.piper_bin, &mut self.voice.model] {
            if path.is_relative() {
                *path = self.data_dir.join(&*path);
            }
        }
    }

    pub fn books_dir(&self) -> PathBuf {
        self.data_dir.join("books")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }

    /// Ensure the data and books directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.books_dir())?;
        Ok(())
    }
}
