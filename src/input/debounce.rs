//! Button debouncing and press classification
//!
//! Turns raw line levels sampled on a fixed cadence into discrete
//! press/hold/release events. Time is passed in by the caller so the
//! classification can be exercised without sleeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::buttons::{Button, ButtonLines};
use crate::events::ButtonEvent;

/// Timing windows used to classify presses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceSettings {
    /// Minimum spacing between accepted edges on one line
    pub debounce: Duration,
    /// Minimum spacing between two `Pressed` events on one line
    pub repeat_guard: Duration,
    /// Hold duration that produces a `HeldThreshold` event
    pub hold_threshold: Duration,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            repeat_guard: Duration::from_millis(300),
            hold_threshold: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Default)]
struct LineState {
    active: bool,
    press_started: Option<Instant>,
    /// Reference point for the next hold event
    hold_started: Option<Instant>,
    last_edge: Option<Instant>,
    last_press_event: Option<Instant>,
}

/// Per-line press classifier
pub struct Debouncer {
    settings: DebounceSettings,
    lines: HashMap<Button, LineState>,
}

impl Debouncer {
    pub fn new(settings: DebounceSettings) -> Self {
        Self {
            settings,
            lines: HashMap::new(),
        }
    }

    /// Sample every line once and return the events produced at `now`
    ///
    /// `hold_eligible` decides, per button, whether a long hold may fire
    /// right now. A line that fails to read is logged and skipped for
    /// this poll only.
    pub fn poll<L>(
        &mut self,
        lines: &mut L,
        now: Instant,
        hold_eligible: &dyn Fn(Button) -> bool,
    ) -> Vec<ButtonEvent>
    where
        L: ButtonLines + ?Sized,
    {
        let mut events = Vec::new();

        for button in lines.buttons() {
            let pressed = match lines.is_pressed(button) {
                Ok(pressed) => pressed,
                Err(fault) => {
                    warn!(%fault, "input line fault, skipping for this poll");
                    continue;
                }
            };

            if let Some(event) = self.update(button, pressed, now, || hold_eligible(button)) {
                events.push(event);
            }
        }

        events
    }

    fn update(
        &mut self,
        button: Button,
        pressed: bool,
        now: Instant,
        hold_eligible: impl FnOnce() -> bool,
    ) -> Option<ButtonEvent> {
        let settings = self.settings;
        let line = self.lines.entry(button).or_default();

        if let Some(last) = line.last_edge {
            if now.saturating_duration_since(last) < settings.debounce {
                return None;
            }
        }

        match (line.active, pressed) {
            (false, true) => {
                line.active = true;
                line.press_started = Some(now);
                line.hold_started = Some(now);
                line.last_edge = Some(now);

                let too_soon = line
                    .last_press_event
                    .is_some_and(|t| now.saturating_duration_since(t) < settings.repeat_guard);
                if too_soon {
                    debug!(%button, "press suppressed by repeat guard");
                    return None;
                }

                line.last_press_event = Some(now);
                Some(ButtonEvent::Pressed { button })
            }
            (true, true) => {
                let held = now.saturating_duration_since(line.hold_started.unwrap_or(now));
                if held >= settings.hold_threshold && hold_eligible() {
                    line.hold_started = Some(now);
                    Some(ButtonEvent::HeldThreshold {
                        button,
                        duration_ms: held.as_millis() as u64,
                    })
                } else {
                    None
                }
            }
            (true, false) => {
                let held = now.saturating_duration_since(line.press_started.unwrap_or(now));
                line.active = false;
                line.press_started = None;
                line.hold_started = None;
                line.last_edge = Some(now);
                Some(ButtonEvent::Released {
                    button,
                    duration_ms: held.as_millis() as u64,
                })
            }
            (false, false) => None,
        }
    }
}
