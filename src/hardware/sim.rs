//! In-memory GPIO lines
//!
//! Used when the binary runs off-device and by every test that needs a
//! pin. Clones share the same line, so a test can hold one clone and
//! drive or inspect the level the driver sees.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::digital::{Error, ErrorKind, ErrorType, InputPin, OutputPin};
use tracing::trace;

/// A simulated digital line
#[derive(Debug, Clone)]
pub struct SimPin {
    name: Arc<str>,
    level: Arc<AtomicBool>,
    faulty: Arc<AtomicBool>,
}

impl SimPin {
    fn with_level(name: &str, high: bool) -> Self {
        Self {
            name: Arc::from(name),
            level: Arc::new(AtomicBool::new(high)),
            faulty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Input line with a pull-up, idle high
    pub fn input_pull_up(name: &str) -> Self {
        Self::with_level(name, true)
    }

    /// Output line starting deasserted
    pub fn output_low(name: &str) -> Self {
        Self::with_level(name, false)
    }

    /// Force the line level from outside (a button press pulls it low)
    #[cfg(test)]
    pub fn drive(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_asserted(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Make every subsequent access fail until cleared
    #[cfg(test)]
    pub fn inject_fault(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SimPinFault> {
        if self.faulty.load(Ordering::SeqCst) {
            Err(SimPinFault {
                line: self.name.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Injected line fault
#[derive(Debug)]
pub struct SimPinFault {
    pub line: String,
}

impl Error for SimPinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl ErrorType for SimPin {
    type Error = SimPinFault;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.check()?;
        Ok(self.level.load(Ordering::SeqCst))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for SimPin {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        trace!(line = %self.name, "asserted");
        self.level.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        trace!(line = %self.name, "released");
        self.level.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_line() {
        let mut pin = SimPin::output_low("dot1");
        let probe = pin.clone();
        pin.set_high().unwrap();
        assert!(probe.is_asserted());
        pin.set_low().unwrap();
        assert!(!probe.is_asserted());
    }

    #[test]
    fn test_injected_fault() {
        let mut pin = SimPin::input_pull_up("next");
        pin.inject_fault(true);
        assert!(pin.is_high().is_err());
        pin.inject_fault(false);
        assert!(pin.is_high().unwrap());
    }
}
