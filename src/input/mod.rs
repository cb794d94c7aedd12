//! Input module for the front-panel buttons
//!
//! Polls pull-up input lines on a dedicated thread and classifies them
//! into press, hold and release events for the session controller.

mod buttons;
mod debounce;
mod poller;

pub use buttons::{Button, PinBank};
pub use debounce::{DebounceSettings, Debouncer};
pub use poller::{ButtonPoller, HoldGate};
