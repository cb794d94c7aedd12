//! Actuator driver for one braille cell
//!
//! Each channel is a relay-driven solenoid on its own output line. A
//! symbol is written by asserting its pattern, holding it for the dwell
//! time plus a settle margin, and releasing every channel again.

use std::thread;
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use tracing::{trace, warn};

use super::braille::{self, ActivationPattern};

/// Timing knobs for the actuator cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TactileTiming {
    /// How long a symbol is presented; the user-facing speed knob
    pub dwell: Duration,
    /// Time a solenoid needs to rise after its relay closes
    pub settle_up: Duration,
    /// Time a solenoid needs to drop after its relay opens
    pub settle_down: Duration,
    /// Floor on the hold after `settle_up`, however fast the dwell
    pub min_hold: Duration,
    /// Pause between two symbols
    pub symbol_gap: Duration,
    /// A space is a silent gap of `dwell * word_gap_factor`
    pub word_gap_factor: f32,
}

impl Default for TactileTiming {
    fn default() -> Self {
        Self {
            dwell: Duration::from_millis(500),
            settle_up: Duration::from_millis(100),
            settle_down: Duration::from_millis(50),
            min_hold: Duration::from_millis(100),
            symbol_gap: Duration::from_millis(30),
            word_gap_factor: 3.0,
        }
    }
}

impl TactileTiming {
    /// Total time a symbol stays asserted
    pub fn symbol_hold(&self) -> Duration {
        self.settle_up + self.min_hold.max(self.dwell.saturating_sub(self.settle_up))
    }

    pub fn word_gap(&self) -> Duration {
        self.dwell.mul_f32(self.word_gap_factor.max(0.0))
    }
}

/// Anything that can present symbols on the actuator cell
pub trait TactileOutput: Send {
    /// Write one symbol; `false` when nothing was raised
    ///
    /// Whitespace produces a silent word gap. Unmapped symbols and line
    /// faults return immediately with every channel released.
    fn write_symbol(&mut self, symbol: char) -> bool;

    /// Raise an explicit pattern for `hold`, then release it
    fn present(&mut self, pattern: ActivationPattern, hold: Duration) -> bool;

    /// Release every channel; safe to call at any time
    fn clear(&mut self);

    fn set_dwell(&mut self, dwell: Duration);
}

/// Drives a bank of output lines, one per dot
pub struct TactileDriver<P> {
    channels: Vec<P>,
    timing: TactileTiming,
}

impl<P: OutputPin> TactileDriver<P> {
    pub fn new(channels: Vec<P>, timing: TactileTiming) -> Self {
        let mut driver = Self { channels, timing };
        driver.release_all();
        driver
    }

    fn assert_pattern(&mut self, pattern: ActivationPattern) -> Result<(), String> {
        for (index, pin) in self.channels.iter_mut().enumerate() {
            let result = if pattern.channel(index) {
                pin.set_high()
            } else {
                pin.set_low()
            };
            result.map_err(|e| format!("channel {}: {:?}", index, e))?;
        }
        Ok(())
    }

    fn release_all(&mut self) {
        for (index, pin) in self.channels.iter_mut().enumerate() {
            if let Err(e) = pin.set_low() {
                warn!(channel = index, error = ?e, "failed to release actuator");
            }
        }
    }

    fn raise_for(&mut self, pattern: ActivationPattern, hold: Duration) -> bool {
        if let Err(detail) = self.assert_pattern(pattern) {
            warn!(%detail, dots = ?pattern.dots(), "actuator write failed");
            self.release_all();
            return false;
        }

        thread::sleep(hold);
        self.release_all();
        true
    }
}

impl<P: OutputPin + Send> TactileOutput for TactileDriver<P> {
    fn write_symbol(&mut self, symbol: char) -> bool {
        if symbol.is_whitespace() {
            self.release_all();
            thread::sleep(self.timing.word_gap());
            return false;
        }

        let Some(pattern) = braille::lookup(symbol) else {
            trace!(?symbol, "no braille pattern");
            return false;
        };

        let hold = self.timing.symbol_hold();
        if !self.raise_for(pattern, hold) {
            return false;
        }

        thread::sleep(self.timing.settle_down + self.timing.symbol_gap);
        true
    }

    fn present(&mut self, pattern: ActivationPattern, hold: Duration) -> bool {
        let raised = self.raise_for(pattern, hold);
        thread::sleep(self.timing.settle_down);
        raised
    }

    fn clear(&mut self) {
        self.release_all();
    }

    fn set_dwell(&mut self, dwell: Duration) {
        self.timing.dwell = dwell;
    }
}
