//! Events module for button input
//!
//! Discrete events produced by the input debouncer and consumed by the
//! session controller.

use serde::{Deserialize, Serialize};

use crate::input::Button;

/// Events emitted by the debouncer for a single input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonEvent {
    /// Line went from idle to active
    Pressed { button: Button },

    /// Line has been held past the hold threshold
    HeldThreshold {
        button: Button,
        /// Time since the press (or the previous hold event) in milliseconds
        duration_ms: u64,
    },

    /// Line went back to idle
    Released {
        button: Button,
        /// Total time the line was active in milliseconds
        duration_ms: u64,
    },
}

impl ButtonEvent {
    #[cfg(test)]
    pub fn button(&self) -> Button {
        match self {
            ButtonEvent::Pressed { button }
            | ButtonEvent::HeldThreshold { button, .. }
            | ButtonEvent::Released { button, .. } => *button,
        }
    }
}

impl std::fmt::Display for ButtonEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ButtonEvent::Pressed { button } => write!(f, "PRESSED {}", button),
            ButtonEvent::HeldThreshold {
                button,
                duration_ms,
            } => write!(f, "HELD {} ({}ms)", button, duration_ms),
            ButtonEvent::Released {
                button,
                duration_ms,
            } => write!(f, "RELEASED {} ({}ms)", button, duration_ms),
        }
    }
}
