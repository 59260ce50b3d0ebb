use std::collections::HashMap;

use crate::model::answer::AnswerValue;
use crate::model::ids::QuestionId;

/// Mutable state of one test attempt.
///
/// Owned by the session runtime and handed by reference to its controllers.
/// Once [`SessionState::begin_submission`] has returned `true`, the remaining
/// time is frozen and no further submission can begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    answers: HashMap<QuestionId, AnswerValue>,
    time_remaining_seconds: u32,
    current_part_index: usize,
    current_question_number: u32,
    is_timer_paused: bool,
    is_submitting: bool,
}

impl SessionState {
    #[must_use]
    pub fn new(time_remaining_seconds: u32) -> Self {
        Self {
            answers: HashMap::new(),
            time_remaining_seconds,
            current_part_index: 0,
            current_question_number: 1,
            is_timer_paused: false,
            is_submitting: false,
        }
    }

    #[must_use]
    pub fn answers(&self) -> &HashMap<QuestionId, AnswerValue> {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, id: &QuestionId) -> Option<&AnswerValue> {
        self.answers.get(id)
    }

    /// Record a local answer, returning the previous value.
    pub fn set_answer(&mut self, id: QuestionId, value: AnswerValue) -> Option<AnswerValue> {
        self.answers.insert(id, value)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|v| !v.is_empty()).count()
    }

    #[must_use]
    pub fn time_remaining_seconds(&self) -> u32 {
        self.time_remaining_seconds
    }

    /// Overwrite remaining time (resume from a checkpoint).
    ///
    /// Returns `false` and leaves the value untouched once submission began.
    pub fn set_time_remaining(&mut self, seconds: u32) -> bool {
        if self.is_submitting {
            return false;
        }
        self.time_remaining_seconds = seconds;
        true
    }

    /// Consume one second. Returns the new remaining time, or `None` if the
    /// clock is frozen by submission or already at zero.
    pub fn consume_second(&mut self) -> Option<u32> {
        if self.is_submitting || self.time_remaining_seconds == 0 {
            return None;
        }
        self.time_remaining_seconds -= 1;
        Some(self.time_remaining_seconds)
    }

    /// Seconds used out of `initial_allotted_seconds`.
    ///
    /// Derived from the countdown rather than wall-clock time so that time
    /// spent paused is never counted.
    #[must_use]
    pub fn time_spent(&self, initial_allotted_seconds: u32) -> u32 {
        initial_allotted_seconds.saturating_sub(self.time_remaining_seconds)
    }

    #[must_use]
    pub fn current_part_index(&self) -> usize {
        self.current_part_index
    }

    pub fn set_current_part_index(&mut self, index: usize) {
        self.current_part_index = index;
    }

    #[must_use]
    pub fn current_question_number(&self) -> u32 {
        self.current_question_number
    }

    pub fn set_current_question_number(&mut self, number: u32) {
        self.current_question_number = number;
    }

    #[must_use]
    pub fn is_timer_paused(&self) -> bool {
        self.is_timer_paused
    }

    pub fn set_timer_paused(&mut self, paused: bool) {
        self.is_timer_paused = paused;
    }

    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.is_submitting
    }

    /// Latch the session into submission. Only the first call returns `true`.
    pub fn begin_submission(&mut self) -> bool {
        if self.is_submitting {
            return false;
        }
        self.is_submitting = true;
        true
    }
}
