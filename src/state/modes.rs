//! Mode loops
//!
//! Each loop runs on the mode thread until it finishes, is cancelled or
//! playback stops. The session lock is only held to read or move the
//! position; actuator and speech calls always run with it released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::session::{ReadingMode, Session};
use crate::config::{dwell_duration, ModeConfig};
use crate::progress::{ProgressRecord, ProgressStore};
use crate::tactile::{lookup, ActivationPattern, TactileOutput};
use crate::voice::VoiceDispatcher;

/// The actuator cell shared between the controller and the mode thread
pub type SharedTactile = Arc<Mutex<Box<dyn TactileOutput>>>;

/// How a mode loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reached the end of its material
    Completed,
    /// Cancelled, or playback was switched off
    Stopped,
}

/// Shared cancellation signal for the running mode loop
///
/// Cancelling bumps a generation counter. A token remembers the
/// generation it was taken at and reports cancellation once the counter
/// has moved on, so taking a fresh token is what clears the signal.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    generation: Arc<AtomicU64>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            generation: Arc::clone(&self.generation),
            taken_at: self.generation.load(Ordering::SeqCst),
        }
    }
}

/// One loop's view of the [`CancelFlag`]
#[derive(Debug, Clone)]
pub struct CancelToken {
    generation: Arc<AtomicU64>,
    taken_at: u64,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.taken_at
    }
}

/// Everything a mode loop touches
#[derive(Clone)]
pub struct ModeContext {
    pub session: Arc<Mutex<Session>>,
    pub tactile: SharedTactile,
    pub voice: VoiceDispatcher,
    pub progress: Arc<Mutex<ProgressStore>>,
    pub settings: ModeConfig,
}

impl ModeContext {
    pub fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tactile(&self) -> MutexGuard<'_, Box<dyn TactileOutput>> {
        self.tactile.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn position(&self) -> usize {
        self.lock_session().position()
    }

    pub fn set_position(&self, position: usize) -> usize {
        self.lock_session().set_position(position)
    }

    pub fn speech_rate(&self) -> f32 {
        self.lock_session().speech_rate
    }

    /// Queue an announcement at the current speech rate
    pub fn announce(&self, text: impl Into<String>) {
        let rate = self.speech_rate();
        self.voice.enqueue(text, rate);
    }

    /// Speak and wait until the utterance has played
    pub fn say(&self, text: &str) -> bool {
        let rate = self.speech_rate();
        self.voice.speak_blocking(text, rate)
    }

    /// Write one symbol at the current dwell
    pub fn write_symbol(&self, symbol: char) -> bool {
        let dwell = dwell_duration(self.lock_session().tactile_dwell_ms);
        let mut tactile = self.lock_tactile();
        tactile.set_dwell(dwell);
        tactile.write_symbol(symbol)
    }

    pub fn present(&self, pattern: ActivationPattern, hold: Duration) -> bool {
        self.lock_tactile().present(pattern, hold)
    }

    pub fn clear_outputs(&self) {
        self.lock_tactile().clear();
    }

    /// Block while paused
    ///
    /// Returns `false` once the loop should stop: cancelled, or playback
    /// switched off. The cell is released when a pause begins.
    pub fn wait_while_paused(&self, token: &CancelToken) -> bool {
        let mut cleared = false;
        loop {
            {
                let session = self.lock_session();
                if token.is_cancelled() || !session.is_playing {
                    return false;
                }
                if !session.is_paused {
                    return true;
                }
            }

            if !cleared {
                debug!("paused, releasing actuators");
                self.clear_outputs();
                cleared = true;
            }
            thread::sleep(Duration::from_millis(self.settings.pause_poll_ms));
        }
    }

    /// Persist the current position of the loaded book
    pub fn checkpoint(&self) {
        let (id, record) = {
            let session = self.lock_session();
            if !session.mode.uses_content() {
                return;
            }
            let Some(id) = session.content_id() else {
                return;
            };
            (
                id.to_string(),
                ProgressRecord::now(session.position(), session.mode),
            )
        };

        debug!(id = %id, position = record.position, "checkpoint");
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = progress.save(&id, record) {
            warn!(error = %e, "failed to save progress");
        }
    }
}

impl ReadingMode {
    /// Run this mode until it completes or is stopped
    pub fn run(self, ctx: &ModeContext, token: &CancelToken) -> Outcome {
        info!(mode = %self, "mode loop started");
        let outcome = match self {
            ReadingMode::WriteOnly => write_only(ctx, token),
            ReadingMode::ReadOnly => read_only(ctx, token),
            ReadingMode::ReadAndWrite => read_and_write(ctx, token),
            ReadingMode::Education => education(ctx, token),
        };
        info!(mode = %self, ?outcome, "mode loop finished");
        outcome
    }
}

fn write_only(ctx: &ModeContext, token: &CancelToken) -> Outcome {
    let content = ctx.lock_session().content();
    let total = content.len();
    let every = ctx.settings.write_checkpoint_every.max(1);

    let mut since_checkpoint = 0;
    let mut milestone = percent(ctx.position(), total) / 10;

    loop {
        if !ctx.wait_while_paused(token) {
            return Outcome::Stopped;
        }

        let position = ctx.position();
        let Some(&symbol) = content.get(position) else {
            break;
        };

        // A failed or unmapped symbol is still consumed
        ctx.write_symbol(symbol);
        let position = ctx.set_position(position + 1);

        since_checkpoint += 1;
        if since_checkpoint >= every {
            ctx.checkpoint();
            since_checkpoint = 0;
        }

        let reached = percent(position, total) / 10;
        if reached > milestone {
            milestone = reached;
            if reached < 10 {
                ctx.announce(format!("{} percent complete", reached * 10));
            }
        }
    }

    ctx.checkpoint();
    Outcome::Completed
}

fn read_only(ctx: &ModeContext, token: &CancelToken) -> Outcome {
    let content = ctx.lock_session().content();
    let total = content.len();

    loop {
        if !ctx.wait_while_paused(token) {
            return Outcome::Stopped;
        }

        let start = ctx.position();
        if start >= total {
            break;
        }

        let end = chunk_end(
            &content,
            start,
            ctx.settings.read_chunk_chars,
            ctx.settings.sentence_break_after,
        );
        let chunk: String = content[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            ctx.say(&chunk);
        }

        ctx.set_position(end);
        ctx.checkpoint();
    }

    Outcome::Completed
}

/// End of the next spoken chunk starting at `start`
///
/// Prefers the last sentence end in the window, then the last space, as
/// long as it lies more than `min_break` characters in.
pub fn chunk_end(content: &[char], start: usize, max_len: usize, min_break: usize) -> usize {
    let limit = start.saturating_add(max_len.max(1)).min(content.len());
    if limit == content.len() {
        return limit;
    }

    let window = &content[start..limit];
    let last_of = |pred: &dyn Fn(char) -> bool| {
        window
            .iter()
            .rposition(|&c| pred(c))
            .filter(|&offset| offset > min_break)
    };

    if let Some(offset) = last_of(&|c| matches!(c, '.' | '!' | '?')) {
        return start + offset + 1;
    }
    if let Some(offset) = last_of(&char::is_whitespace) {
        return start + offset + 1;
    }
    limit
}

fn read_and_write(ctx: &ModeContext, token: &CancelToken) -> Outcome {
    let content = ctx.lock_session().content();
    let total = content.len();
    let every = ctx.settings.mixed_checkpoint_every.max(1);

    if content.iter().all(|c| c.is_whitespace()) {
        return Outcome::Completed;
    }

    loop {
        if !ctx.wait_while_paused(token) {
            return Outcome::Stopped;
        }

        let position = ctx.position();
        let Some(start) = (position..total).find(|&i| !content[i].is_whitespace()) else {
            // Continuous mode: run out, start over
            ctx.set_position(0);
            ctx.checkpoint();
            ctx.announce("Starting again from the beginning");
            continue;
        };
        let end = (start..total)
            .find(|&i| content[i].is_whitespace())
            .unwrap_or(total);

        for &symbol in &content[start..end] {
            if !ctx.wait_while_paused(token) {
                return Outcome::Stopped;
            }
            ctx.write_symbol(symbol);
        }

        // The word counts as read only once it is fully written and the
        // reader is not paused
        if !ctx.wait_while_paused(token) {
            return Outcome::Stopped;
        }

        let word: String = content[start..end].iter().collect();
        let rate = ctx.speech_rate();
        ctx.voice.speak_detached(word, rate);

        if let Some(&separator) = content.get(end) {
            ctx.write_symbol(separator);
        }

        let next = ctx.set_position(end + 1);
        if next / every > position / every {
            ctx.checkpoint();
        }
    }
}

/// Letters in Turkish alphabet order
const LESSON_LETTERS: &str = "abcçdefgğhıijklmnoöprsştuüvyz";

const LESSON_DIGITS: [(char, &str); 10] = [
    ('0', "zero"),
    ('1', "one"),
    ('2', "two"),
    ('3', "three"),
    ('4', "four"),
    ('5', "five"),
    ('6', "six"),
    ('7', "seven"),
    ('8', "eight"),
    ('9', "nine"),
];

const LESSON_PUNCTUATION: [(char, &str); 4] = [
    ('.', "period"),
    (',', "comma"),
    ('!', "exclamation mark"),
    ('?', "question mark"),
];

/// One lesson section: an introduction and its symbols with labels
fn lesson() -> Vec<(&'static str, Vec<(char, String)>)> {
    vec![
        (
            "Let us learn the letters.",
            LESSON_LETTERS
                .chars()
                .map(|c| (c, format!("letter {}", c)))
                .collect(),
        ),
        (
            "Now the digits.",
            LESSON_DIGITS
                .iter()
                .map(|&(c, name)| (c, format!("digit {}", name)))
                .collect(),
        ),
        (
            "Now the punctuation marks.",
            LESSON_PUNCTUATION
                .iter()
                .map(|&(c, name)| (c, name.to_string()))
                .collect(),
        ),
    ]
}

fn education(ctx: &ModeContext, token: &CancelToken) -> Outcome {
    let hold = Duration::from_millis(ctx.settings.education_hold_ms);
    let gap = Duration::from_millis(ctx.settings.education_gap_ms);

    for (intro, entries) in lesson() {
        if !ctx.wait_while_paused(token) {
            return Outcome::Stopped;
        }
        ctx.say(intro);

        for (symbol, label) in entries {
            if !ctx.wait_while_paused(token) {
                return Outcome::Stopped;
            }

            ctx.say(&label);
            thread::sleep(gap);

            if let Some(pattern) = lookup(symbol) {
                ctx.present(pattern, hold);
                thread::sleep(gap);
            }
        }
    }

    Outcome::Completed
}

fn percent(position: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        position * 100 / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ContentItem;
    use crate::testing::{RecordingEngine, RecordingTactile};
    use crate::voice::DispatchSettings;
    use std::time::Instant;

    struct Rig {
        ctx: ModeContext,
        tactile: RecordingTactile,
        engine: Arc<RecordingEngine>,
        _dir: tempfile::TempDir,
    }

    fn book() -> ContentItem {
        ContentItem {
            id: "book.txt".to_string(),
            display_name: "Book".to_string(),
            source_url: String::new(),
            size: 0,
            content_hash: String::new(),
        }
    }

    fn rig_with(text: &str, mode: ReadingMode, tactile: RecordingTactile) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::new();
        let voice = VoiceDispatcher::start(
            engine.clone(),
            DispatchSettings {
                max_chars: 500,
                detached_limit: 8,
            },
        )
        .unwrap();

        let mut session = Session::new(vec![book()], 1.0, 500.0);
        session.selected = Some(book());
        session.mode = mode;
        session.set_content("book.txt", text.chars().collect());
        session.is_playing = true;

        let cell: Box<dyn TactileOutput> = Box::new(tactile.clone());
        let ctx = ModeContext {
            session: Arc::new(Mutex::new(session)),
            tactile: Arc::new(Mutex::new(cell)),
            voice,
            progress: Arc::new(Mutex::new(ProgressStore::load(
                dir.path().join("progress.json"),
            ))),
            settings: ModeConfig {
                pause_poll_ms: 5,
                education_hold_ms: 0,
                education_gap_ms: 0,
                ..ModeConfig::default()
            },
        };

        Rig {
            ctx,
            tactile,
            engine,
            _dir: dir,
        }
    }

    fn rig(text: &str, mode: ReadingMode) -> Rig {
        rig_with(text, mode, RecordingTactile::new())
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_cancel_flag_generations() {
        let flag = CancelFlag::new();
        let first = flag.token();
        assert!(!first.is_cancelled());

        flag.cancel();
        let second = flag.token();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_write_only_writes_every_symbol_in_order() {
        let rig = rig("abc def", ReadingMode::WriteOnly);
        let token = CancelFlag::new().token();

        let outcome = ReadingMode::WriteOnly.run(&rig.ctx, &token);

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            rig.tactile.snapshot().symbols,
            vec!['a', 'b', 'c', ' ', 'd', 'e', 'f']
        );
        assert_eq!(rig.ctx.position(), 7);
        let progress = rig.ctx.progress.lock().unwrap();
        assert_eq!(progress.get("book.txt").unwrap().position, 7);
    }

    #[test]
    fn test_unmapped_symbol_is_skipped_not_stuck() {
        let rig = rig("a#b", ReadingMode::WriteOnly);
        let token = CancelFlag::new().token();

        assert_eq!(ReadingMode::WriteOnly.run(&rig.ctx, &token), Outcome::Completed);
        assert_eq!(rig.tactile.snapshot().symbols, vec!['a', '#', 'b']);
        assert_eq!(rig.ctx.position(), 3);
    }

    #[test]
    fn test_outputs_run_without_session_lock() {
        let session_probe: Arc<Mutex<Option<Arc<Mutex<Session>>>>> = Arc::default();
        let probe = Arc::clone(&session_probe);
        let tactile = RecordingTactile::new().with_probe(move || {
            if let Some(session) = probe.lock().unwrap().as_ref() {
                assert!(session.try_lock().is_ok(), "session locked during output");
            }
        });

        let rig = rig_with("lock free", ReadingMode::ReadAndWrite, tactile);
        *session_probe.lock().unwrap() = Some(Arc::clone(&rig.ctx.session));

        let flag = CancelFlag::new();
        let token = flag.token();
        let ctx = rig.ctx.clone();
        let handle = thread::spawn(move || ReadingMode::ReadAndWrite.run(&ctx, &token));

        assert!(wait_until(Duration::from_secs(5), || {
            rig.tactile.snapshot().symbols.len() >= 12
        }));
        flag.cancel();
        assert_eq!(handle.join().unwrap(), Outcome::Stopped);
    }

    #[test]
    fn test_write_only_checkpoints_stay_in_bounds() {
        let text = "x".repeat(250);
        let rig = rig(&text, ReadingMode::WriteOnly);
        let token = CancelFlag::new().token();

        ReadingMode::WriteOnly.run(&rig.ctx, &token);

        let progress = rig.ctx.progress.lock().unwrap();
        let record = progress.get("book.txt").unwrap();
        assert!(record.position <= 250);
        assert_eq!(record.mode, ReadingMode::WriteOnly);
        assert!(rig.engine.wait_for(1, Duration::from_secs(2)));
    }

    #[test]
    fn test_read_only_speaks_chunks_at_sentence_ends() {
        let sentence = "This is a sentence that is long enough. ";
        let text = sentence.repeat(30);
        let rig = rig(&text, ReadingMode::ReadOnly);
        let token = CancelFlag::new().token();

        assert_eq!(ReadingMode::ReadOnly.run(&rig.ctx, &token), Outcome::Completed);

        let heard = rig.engine.texts();
        assert!(heard.len() >= 3);
        for chunk in &heard[..heard.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk cut mid-sentence: {:?}", chunk);
            assert!(chunk.chars().count() <= 480);
        }
        assert_eq!(rig.ctx.position(), text.chars().count());
    }

    #[test]
    fn test_chunk_end_rules() {
        let text: Vec<char> = "Short. Then a much longer run of words".chars().collect();
        // sentence end too early, falls back to the last space past the floor
        assert_eq!(chunk_end(&text, 0, 20, 10), 19);
        // the tail fits entirely
        assert_eq!(chunk_end(&text, 0, 100, 10), text.len());
        // no usable break at all
        let solid: Vec<char> = "x".repeat(50).chars().collect();
        assert_eq!(chunk_end(&solid, 0, 20, 5), 20);
    }

    #[test]
    fn test_pause_holds_position_and_resumes_in_place() {
        let tactile = RecordingTactile::with_delay(Duration::from_millis(5));
        let rig = rig_with(
            "one two three four five six seven eight nine ten",
            ReadingMode::ReadAndWrite,
            tactile,
        );

        let flag = CancelFlag::new();
        let token = flag.token();
        let ctx = rig.ctx.clone();
        let handle = thread::spawn(move || ReadingMode::ReadAndWrite.run(&ctx, &token));

        assert!(wait_until(Duration::from_secs(5), || rig.ctx.position() >= 8));
        rig.ctx.lock_session().is_paused = true;

        // let an in-flight symbol finish, then nothing may move
        thread::sleep(Duration::from_millis(40));
        let paused_at = rig.ctx.position();
        let written = rig.tactile.snapshot().symbols.len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(rig.ctx.position(), paused_at);
        assert_eq!(rig.tactile.snapshot().symbols.len(), written);
        assert!(rig.tactile.snapshot().clears >= 1);

        rig.ctx.lock_session().is_paused = false;
        assert!(wait_until(Duration::from_secs(5), || {
            rig.ctx.position() > paused_at
        }));
        assert!(rig.ctx.position() > 0);

        flag.cancel();
        assert_eq!(handle.join().unwrap(), Outcome::Stopped);
    }

    #[test]
    fn test_read_and_write_wraps_around() {
        let rig = rig("hi yo", ReadingMode::ReadAndWrite);
        let flag = CancelFlag::new();
        let token = flag.token();
        let ctx = rig.ctx.clone();
        let handle = thread::spawn(move || ReadingMode::ReadAndWrite.run(&ctx, &token));

        assert!(wait_until(Duration::from_secs(5), || {
            rig.tactile.snapshot().symbols.len() >= 10
        }));
        flag.cancel();
        handle.join().unwrap();

        let symbols = rig.tactile.snapshot().symbols;
        assert_eq!(&symbols[..6], &['h', 'i', ' ', 'y', 'o', 'h']);
        assert!(rig.engine.wait_for(2, Duration::from_secs(2)));
        let heard = rig.engine.texts();
        assert!(heard.contains(&"hi".to_string()));
    }

    #[test]
    fn test_education_walks_the_lesson() {
        let rig = rig("", ReadingMode::Education);
        let token = CancelFlag::new().token();

        assert_eq!(ReadingMode::Education.run(&rig.ctx, &token), Outcome::Completed);

        let log = rig.tactile.snapshot();
        let expected = LESSON_LETTERS.chars().count() + LESSON_DIGITS.len() + LESSON_PUNCTUATION.len();
        assert_eq!(log.presented.len(), expected);
        assert_eq!(log.presented[0], lookup('a').unwrap());

        let heard = rig.engine.texts();
        assert_eq!(heard[0], "Let us learn the letters.");
        assert_eq!(heard[1], "letter a");
        assert!(heard.contains(&"digit zero".to_string()));
        assert!(rig.ctx.progress.lock().unwrap().records().is_empty());
    }

    #[test]
    fn test_stopped_playback_ends_loop() {
        let rig = rig("abcdef", ReadingMode::WriteOnly);
        rig.ctx.lock_session().is_playing = false;
        let token = CancelFlag::new().token();

        assert_eq!(ReadingMode::WriteOnly.run(&rig.ctx, &token), Outcome::Stopped);
        assert!(rig.tactile.snapshot().symbols.is_empty());
    }
}
