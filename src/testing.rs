//! Recording fakes for the output devices

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::tactile::{lookup, ActivationPattern, TactileOutput};
use crate::voice::{SpeechEngine, VoiceError};

/// One utterance the fake engine played
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
    pub started: Instant,
    pub finished: Instant,
}

/// Speech engine that records what it was asked to say
#[derive(Default)]
pub struct RecordingEngine {
    delay: Duration,
    fail_on: Option<String>,
    heard: Mutex<Vec<Utterance>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Fails every utterance equal to `text`
    pub fn failing_on(text: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(text.to_string()),
            ..Self::default()
        })
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.heard.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.utterances().into_iter().map(|u| u.text).collect()
    }

    /// Wait until at least `count` utterances were played
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.heard.lock().unwrap().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl SpeechEngine for RecordingEngine {
    fn say(&self, text: &str, rate: f32) -> Result<(), VoiceError> {
        if self.fail_on.as_deref() == Some(text) {
            return Err(VoiceError::Worker(format!("refused {}", text)));
        }

        let started = Instant::now();
        thread::sleep(self.delay);
        self.heard.lock().unwrap().push(Utterance {
            text: text.to_string(),
            rate,
            started,
            finished: Instant::now(),
        });
        Ok(())
    }
}

/// Everything a [`RecordingTactile`] was asked to do
#[derive(Debug, Default, Clone)]
pub struct TactileLog {
    pub symbols: Vec<char>,
    pub presented: Vec<ActivationPattern>,
    pub clears: usize,
    pub dwell: Option<Duration>,
}

type Probe = Arc<dyn Fn() + Send + Sync>;

/// Tactile output that records calls instead of moving actuators
#[derive(Clone, Default)]
pub struct RecordingTactile {
    pub log: Arc<Mutex<TactileLog>>,
    delay: Duration,
    probe: Option<Probe>,
}

impl RecordingTactile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every symbol write takes `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Run `probe` at the start of every output call
    pub fn with_probe(mut self, probe: impl Fn() + Send + Sync + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn snapshot(&self) -> TactileLog {
        self.log.lock().unwrap().clone()
    }

    fn touch(&self) {
        if let Some(probe) = &self.probe {
            probe();
        }
    }
}

impl TactileOutput for RecordingTactile {
    fn write_symbol(&mut self, symbol: char) -> bool {
        self.touch();
        self.log.lock().unwrap().symbols.push(symbol);
        thread::sleep(self.delay);
        lookup(symbol).is_some()
    }

    fn present(&mut self, pattern: ActivationPattern, _hold: Duration) -> bool {
        self.touch();
        self.log.lock().unwrap().presented.push(pattern);
        true
    }

    fn clear(&mut self) {
        self.log.lock().unwrap().clears += 1;
    }

    fn set_dwell(&mut self, dwell: Duration) {
        self.log.lock().unwrap().dwell = Some(dwell);
    }
}
