//! Tactile output: braille encoding and the actuator cell driver

mod braille;
mod driver;

pub use braille::{lookup, ActivationPattern};
pub use driver::{TactileDriver, TactileOutput, TactileTiming};
