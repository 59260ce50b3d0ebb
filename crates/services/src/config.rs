use std::env;
use std::str::FromStr;
use std::time::Duration;

use exam_core::model::AnswerKind;

/// Timing knobs for a session runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Interval of the exam clock. One tick consumes one second of exam time.
    pub tick: Duration,
    pub structured_debounce: Duration,
    pub free_text_debounce: Duration,
    /// Length of the post-audio review window for listening tests.
    pub review_window_seconds: u32,
    /// Save a checkpoint after this many main-timer ticks.
    pub checkpoint_every_ticks: u32,
    /// Practice mode unlocks audio seek/skip controls.
    pub practice_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            structured_debounce: Duration::from_millis(500),
            free_text_debounce: Duration::from_millis(1000),
            review_window_seconds: 120,
            checkpoint_every_ticks: 10,
            practice_mode: false,
        }
    }
}

impl RuntimeConfig {
    /// Read overrides from `EXAM_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or unparsable
    /// values keep their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, fallback: Duration| {
            parse_var(&lookup, name).map_or(fallback, Duration::from_millis)
        };

        Self {
            tick: parse_var::<u64>(&lookup, "EXAM_TICK_MS")
                .filter(|ms| *ms > 0)
                .map_or(defaults.tick, Duration::from_millis),
            structured_debounce: millis("EXAM_STRUCTURED_DEBOUNCE_MS", defaults.structured_debounce),
            free_text_debounce: millis("EXAM_FREE_TEXT_DEBOUNCE_MS", defaults.free_text_debounce),
            review_window_seconds: parse_var(&lookup, "EXAM_REVIEW_WINDOW_SECS")
                .unwrap_or(defaults.review_window_seconds),
            checkpoint_every_ticks: parse_var(&lookup, "EXAM_CHECKPOINT_EVERY_TICKS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.checkpoint_every_ticks),
            practice_mode: parse_var(&lookup, "EXAM_PRACTICE_MODE")
                .unwrap_or(defaults.practice_mode),
        }
    }

    #[must_use]
    pub fn with_practice_mode(mut self, practice_mode: bool) -> Self {
        self.practice_mode = practice_mode;
        self
    }

    /// Debounce delay for an answer kind. Recordings share the structured delay
    /// since each one is a single discrete capture.
    #[must_use]
    pub fn debounce_for(&self, kind: AnswerKind) -> Duration {
        match kind {
            AnswerKind::FreeText => self.free_text_debounce,
            AnswerKind::Structured | AnswerKind::Recording => self.structured_debounce,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring invalid runtime setting");
            None
        }
    }
}
