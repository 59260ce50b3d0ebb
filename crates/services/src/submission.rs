use std::fmt;
use std::sync::Arc;

use exam_core::model::{AttemptKey, AttemptResult, CheckpointKey, NewAttempt, SessionState, SkillKind, TestId};
use storage::repository::AttemptRepository;
use tracing::{debug, error, info, warn};

use crate::Clock;
use crate::autosave::AnswerAutosaveManager;
use crate::error::SubmitError;
use crate::progress::ProgressStoreClient;

/// Handed to the host once the attempt is finalized, whether or not the
/// result could be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCompletion {
    pub result: Option<AttemptResult>,
    pub time_spent_seconds: u32,
    /// Next test of the battery, if this attempt belongs to one.
    pub next_test: Option<TestId>,
}

pub type CompletionHook = Box<dyn FnOnce(SessionCompletion) + Send>;

#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted(AttemptResult),
    /// The result could not be stored. The host was still notified.
    Failed(SubmitError),
    /// Another submission won the latch; nothing was done.
    AlreadySubmitted,
}

impl SubmitOutcome {
    #[must_use]
    pub fn result(&self) -> Option<&AttemptResult> {
        match self {
            SubmitOutcome::Submitted(result) => Some(result),
            _ => None,
        }
    }
}

/// Fixed facts about the attempt being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTarget {
    pub attempt: AttemptKey,
    pub checkpoint: CheckpointKey,
    pub test_type: SkillKind,
    pub next_test: Option<TestId>,
}

/// Finalizes an attempt exactly once.
pub struct SubmissionCoordinator {
    clock: Clock,
    target: SubmissionTarget,
    attempts: Arc<dyn AttemptRepository>,
    progress: ProgressStoreClient,
    completion: Option<CompletionHook>,
}

impl SubmissionCoordinator {
    #[must_use]
    pub fn new(
        clock: Clock,
        target: SubmissionTarget,
        attempts: Arc<dyn AttemptRepository>,
        progress: ProgressStoreClient,
    ) -> Self {
        Self {
            clock,
            target,
            attempts,
            progress,
            completion: None,
        }
    }

    pub fn on_complete(&mut self, hook: impl FnOnce(SessionCompletion) + Send + 'static) {
        self.completion = Some(Box::new(hook));
    }

    /// Submit the attempt.
    ///
    /// The first call latches `state` into submission; later calls return
    /// [`SubmitOutcome::AlreadySubmitted`]. Pending answers get one last save,
    /// the result is created, and on success the checkpoint is cleared. The
    /// completion hook runs in every case.
    pub async fn submit(
        &mut self,
        state: &mut SessionState,
        autosave: &mut AnswerAutosaveManager,
        initial_seconds: u32,
    ) -> SubmitOutcome {
        if !state.begin_submission() {
            debug!(test_id = %self.target.attempt.test_id, "submission already in progress");
            return SubmitOutcome::AlreadySubmitted;
        }
        let time_spent_seconds = state.time_spent(initial_seconds);
        let attempt = self.target.attempt;
        info!(
            test_id = %attempt.test_id,
            student_id = %attempt.student_id,
            attempt_number = attempt.attempt_number,
            time_spent_seconds,
            "submitting attempt"
        );

        let flushed = autosave.flush(state).await;
        if !flushed.failed.is_empty() {
            warn!(
                test_id = %attempt.test_id,
                unsaved = flushed.failed.len(),
                "submitting with answers that could not be saved"
            );
        }

        let request = NewAttempt {
            test_id: attempt.test_id,
            student_id: attempt.student_id,
            attempt_number: attempt.attempt_number,
            time_spent_seconds,
            test_type: self.target.test_type,
            test_group_id: attempt.test_group_id,
        };
        let outcome = match self.attempts.create_attempt(&request, self.clock.now()).await {
            Ok(result) => {
                if let Err(e) = self.progress.clear(self.target.checkpoint).await {
                    warn!(test_id = %attempt.test_id, error = %e, "failed to clear checkpoint after submit");
                }
                SubmitOutcome::Submitted(result)
            }
            Err(e) => {
                let e = SubmitError::Create(e);
                error!(test_id = %attempt.test_id, error = %e, "submission failed; continuing");
                SubmitOutcome::Failed(e)
            }
        };

        if let Some(hook) = self.completion.take() {
            hook(SessionCompletion {
                result: outcome.result().cloned(),
                time_spent_seconds,
                next_test: self.target.next_test,
            });
        }
        outcome
    }

    #[must_use]
    pub fn target(&self) -> &SubmissionTarget {
        &self.target
    }
}

impl fmt::Debug for SubmissionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionCoordinator")
            .field("target", &self.target)
            .field("has_hook", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}
