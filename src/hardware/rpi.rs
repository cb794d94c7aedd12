//! Raspberry Pi GPIO lines through `rppal`

use rppal::gpio::Gpio;
use tracing::info;

use super::{Board, HardwareError};
use crate::config::PinConfig;

pub type OutPin = rppal::gpio::OutputPin;
pub type InPin = rppal::gpio::InputPin;

pub fn open(pins: &PinConfig) -> Result<Board<OutPin, InPin>, HardwareError> {
    let gpio = Gpio::new().map_err(|e| HardwareError::Unavailable(e.to_string()))?;

    let mut actuators = Vec::with_capacity(pins.actuators.len());
    for &line in &pins.actuators {
        let pin = gpio.get(line).map_err(|e| HardwareError::Line {
            line,
            detail: e.to_string(),
        })?;
        // relays start released so no solenoid is energised at boot
        actuators.push(pin.into_output_low());
    }

    let mut buttons = Vec::new();
    for (button, line) in pins.buttons.lines() {
        let pin = gpio.get(line).map_err(|e| HardwareError::Line {
            line,
            detail: e.to_string(),
        })?;
        buttons.push((button, pin.into_input_pullup()));
    }

    info!(
        actuators = actuators.len(),
        buttons = buttons.len(),
        "GPIO lines opened"
    );

    Ok(Board { actuators, buttons })
}
