//! Voice output: text cleanup, the Piper engine and request dispatch

mod dispatcher;
mod engine;
mod text;

pub use dispatcher::{DispatchSettings, VoiceDispatcher};
pub use engine::{PiperEngine, SpeechEngine, VoiceError};
