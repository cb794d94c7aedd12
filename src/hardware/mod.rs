//! Digital I/O boundary
//!
//! Opens the actuator output lines and the button input lines. With the
//! `rpi` feature the lines are real BCM GPIOs; otherwise they are
//! in-memory [`SimPin`]s so the controller can run on a desktop.

#[cfg(feature = "rpi")]
mod rpi;
#[cfg(any(test, not(feature = "rpi")))]
mod sim;

#[cfg(any(test, not(feature = "rpi")))]
pub use sim::SimPin;

use crate::config::PinConfig;
use crate::input::Button;

/// Opened output and input lines
pub struct Board<O, I> {
    /// One line per actuator channel, in dot order
    pub actuators: Vec<O>,
    pub buttons: Vec<(Button, I)>,
}

/// Errors opening GPIO lines
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO controller unavailable: {0}")]
    Unavailable(String),

    #[error("failed to open GPIO line {line}: {detail}")]
    Line { line: u8, detail: String },
}

#[cfg(feature = "rpi")]
pub use rpi::{open, InPin, OutPin};

#[cfg(not(feature = "rpi"))]
pub type OutPin = SimPin;
#[cfg(not(feature = "rpi"))]
pub type InPin = SimPin;

/// Open simulated lines named after their BCM numbers
#[cfg(not(feature = "rpi"))]
pub fn open(pins: &PinConfig) -> Result<Board<OutPin, InPin>, HardwareError> {
    let actuators = pins
        .actuators
        .iter()
        .map(|line| SimPin::output_low(&format!("gpio{}", line)))
        .collect();
    let buttons = pins
        .buttons
        .lines()
        .into_iter()
        .map(|(button, line)| (button, SimPin::input_pull_up(&format!("gpio{}", line))))
        .collect();

    tracing::info!("using simulated GPIO lines");
    Ok(Board { actuators, buttons })
}
