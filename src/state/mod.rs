//! Playback session and its controller
//!
//! The controller owns a single [`Session`] and moves it between four
//! states:
//! - Idle: nothing selected, next browses the library
//! - Selected: a book is chosen, mode can be changed
//! - Playing: the selected mode loop runs on the mode thread
//! - Paused: the mode loop is parked and the outputs are released

mod controller;
mod modes;
mod session;

pub use controller::{Controller, ControllerParts, ControllerSettings};
pub use modes::SharedTactile;
pub use session::ReadingMode;
