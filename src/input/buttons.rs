//! Button definitions and the bank of input lines that backs them
//!
//! Every button sits on its own pull-up input line, so a pressed button
//! reads low.

use embedded_hal::digital::InputPin;
use serde::{Deserialize, Serialize};

/// The six front-panel buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    /// Move to the next book; held while playing restarts the book
    Next,
    /// Select, start, or pause/resume
    Confirm,
    /// Cycle the reading mode
    Mode,
    /// Faster speech and writing
    SpeedUp,
    /// Slower speech and writing
    SpeedDown,
    /// Refresh the library from the remote listing
    Update,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::Next,
        Button::Confirm,
        Button::Mode,
        Button::SpeedUp,
        Button::SpeedDown,
        Button::Update,
    ];
}

impl std::fmt::Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Button::Next => write!(f, "next"),
            Button::Confirm => write!(f, "confirm"),
            Button::Mode => write!(f, "mode"),
            Button::SpeedUp => write!(f, "speed_up"),
            Button::SpeedDown => write!(f, "speed_down"),
            Button::Update => write!(f, "update"),
        }
    }
}

/// A failed read on a single input line
#[derive(Debug, thiserror::Error)]
#[error("failed to read {button} line: {detail}")]
pub struct LineFault {
    pub button: Button,
    pub detail: String,
}

/// Source of raw button levels, one read per button per poll
pub trait ButtonLines {
    /// Buttons this source can report on
    fn buttons(&self) -> Vec<Button>;

    /// Returns `true` while the button is physically pressed
    fn is_pressed(&mut self, button: Button) -> Result<bool, LineFault>;
}

/// Buttons wired to `embedded-hal` input pins with pull-up polarity
pub struct PinBank<P> {
    lines: Vec<(Button, P)>,
}

impl<P: InputPin> PinBank<P> {
    pub fn new(lines: Vec<(Button, P)>) -> Self {
        Self { lines }
    }
}

impl<P: InputPin> ButtonLines for PinBank<P> {
    fn buttons(&self) -> Vec<Button> {
        self.lines.iter().map(|(button, _)| *button).collect()
    }

    fn is_pressed(&mut self, button: Button) -> Result<bool, LineFault> {
        let (_, pin) = self
            .lines
            .iter_mut()
            .find(|(b, _)| *b == button)
            .ok_or_else(|| LineFault {
                button,
                detail: "no line wired".to_string(),
            })?;

        pin.is_low().map_err(|e| LineFault {
            button,
            detail: format!("{:?}", e),
        })
    }
}
