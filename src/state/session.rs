//! The playback session shared by the controller and the mode loops

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::library::ContentItem;

/// Presentation strategies, cycled by the mode button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Every character on the braille cell, no speech
    #[default]
    WriteOnly,
    /// Spoken in chunks, no braille
    ReadOnly,
    /// Each word written on the cell and spoken
    ReadAndWrite,
    /// Guided tour of the braille alphabet
    Education,
}

impl ReadingMode {
    #[cfg(test)]
    pub const ALL: [ReadingMode; 4] = [
        ReadingMode::WriteOnly,
        ReadingMode::ReadOnly,
        ReadingMode::ReadAndWrite,
        ReadingMode::Education,
    ];

    /// The following mode, wrapping around
    pub fn next(self) -> Self {
        match self {
            ReadingMode::WriteOnly => ReadingMode::ReadOnly,
            ReadingMode::ReadOnly => ReadingMode::ReadAndWrite,
            ReadingMode::ReadAndWrite => ReadingMode::Education,
            ReadingMode::Education => ReadingMode::WriteOnly,
        }
    }

    /// Spoken name
    pub fn label(self) -> &'static str {
        match self {
            ReadingMode::WriteOnly => "write only mode",
            ReadingMode::ReadOnly => "read only mode",
            ReadingMode::ReadAndWrite => "read and write mode",
            ReadingMode::Education => "braille lesson mode",
        }
    }

    /// Whether the mode walks the book text and keeps progress
    pub fn uses_content(self) -> bool {
        !matches!(self, ReadingMode::Education)
    }
}

impl std::fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadingMode::WriteOnly => write!(f, "WriteOnly"),
            ReadingMode::ReadOnly => write!(f, "ReadOnly"),
            ReadingMode::ReadAndWrite => write!(f, "ReadAndWrite"),
            ReadingMode::Education => write!(f, "Education"),
        }
    }
}

/// Where the session is, derived from its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing selected
    Idle,
    /// A book is chosen, mode not started
    Selected,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Selected => write!(f, "Selected"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
        }
    }
}

/// Mutable session fields, always accessed under the session lock
#[derive(Debug)]
pub struct Session {
    library: Vec<ContentItem>,
    cursor: usize,
    pub selected: Option<ContentItem>,
    pub mode: ReadingMode,
    content_id: Option<String>,
    content: Arc<[char]>,
    /// Character offset into `content`, never past its end
    position: usize,
    pub is_playing: bool,
    pub is_paused: bool,
    pub speech_rate: f32,
    /// Braille symbol dwell in milliseconds
    pub tactile_dwell_ms: f32,
}

impl Session {
    pub fn new(library: Vec<ContentItem>, speech_rate: f32, tactile_dwell_ms: f32) -> Self {
        Self {
            library,
            cursor: 0,
            selected: None,
            mode: ReadingMode::default(),
            content_id: None,
            content: Arc::from(Vec::new()),
            position: 0,
            is_playing: false,
            is_paused: false,
            speech_rate,
            tactile_dwell_ms,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match (self.is_playing, self.is_paused, &self.selected) {
            (true, true, _) => PlaybackState::Paused,
            (true, false, _) => PlaybackState::Playing,
            (false, _, Some(_)) => PlaybackState::Selected,
            (false, _, None) => PlaybackState::Idle,
        }
    }

    pub fn library(&self) -> &[ContentItem] {
        &self.library
    }

    /// The book under the cursor
    pub fn current(&self) -> Option<&ContentItem> {
        self.library.get(self.cursor)
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor forward, wrapping at the end of the library
    pub fn advance_cursor(&mut self) -> Option<&ContentItem> {
        if self.library.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.library.len();
        self.library.get(self.cursor)
    }

    /// Swap in a refreshed library; the cursor is kept in range and the
    /// selection is left alone
    pub fn replace_library(&mut self, library: Vec<ContentItem>) {
        self.library = library;
        if self.cursor >= self.library.len() {
            self.cursor = 0;
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn content(&self) -> Arc<[char]> {
        Arc::clone(&self.content)
    }

    #[cfg(test)]
    pub fn content_len(&self) -> usize {
        self.content.len()
    }

    /// Load new text and rewind to its start
    pub fn set_content(&mut self, id: &str, content: Arc<[char]>) {
        self.content_id = Some(id.to_string());
        self.content = content;
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to `position`, clamped to the text; returns where it landed
    pub fn set_position(&mut self, position: usize) -> usize {
        self.position = position.min(self.content.len());
        self.position
    }

    /// Progress through the text in whole percent
    pub fn percent_complete(&self) -> usize {
        match self.content.len() {
            0 => 0,
            len => self.position * 100 / len,
        }
    }
}
