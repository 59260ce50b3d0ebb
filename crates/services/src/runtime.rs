use exam_core::model::{
    AnswerKind, AnswerValue, AttemptKey, CheckpointKey, ProgressUpdate, QuestionId, SessionState,
    StudentId, TestDefinition, TestGroupId, TestId,
};
use storage::Storage;
use tracing::{debug, info, warn};

use crate::Clock;
use crate::audio::{AudioControl, AudioSyncController, PlaybackHandle};
use crate::autosave::{AnswerAutosaveManager, EditOutcome, FlushReport};
use crate::config::RuntimeConfig;
use crate::countdown::{CountdownController, ReviewTimer, TickOutcome, TimerStatus};
use crate::error::{ProgressError, SessionError};
use crate::progress::{ProgressStoreClient, SaveOutcome};
use crate::submission::{SessionCompletion, SubmissionCoordinator, SubmissionTarget, SubmitOutcome};

/// Who is taking which test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub test_id: TestId,
    pub student_id: StudentId,
    pub test_group_id: Option<TestGroupId>,
}

impl SessionParams {
    #[must_use]
    pub fn new(test_id: TestId, student_id: StudentId) -> Self {
        Self {
            test_id,
            student_id,
            test_group_id: None,
        }
    }

    #[must_use]
    pub fn in_group(mut self, group: TestGroupId) -> Self {
        self.test_group_id = Some(group);
        self
    }

    #[must_use]
    pub fn checkpoint_key(&self) -> CheckpointKey {
        CheckpointKey::new(self.test_id, self.student_id, self.test_group_id)
    }
}

/// One test attempt: owns the session state and every controller acting on it.
pub struct SessionRuntime {
    config: RuntimeConfig,
    test: TestDefinition,
    key: CheckpointKey,
    attempt_number: u32,
    next_test: Option<TestId>,
    state: SessionState,
    countdown: CountdownController,
    review: Option<ReviewTimer>,
    audio: Option<AudioSyncController>,
    autosave: AnswerAutosaveManager,
    progress: ProgressStoreClient,
    submission: SubmissionCoordinator,
    ticks_since_checkpoint: u32,
    detached: bool,
}

impl SessionRuntime {
    /// Load everything the attempt needs and arm the timers.
    ///
    /// Listening tests start paused until [`SessionRuntime::confirm_audio_start`];
    /// every other skill starts counting down immediately.
    ///
    /// # Errors
    ///
    /// Any load failure is fatal: content, battery, checkpoint, previous
    /// attempts or saved answers. Listening tests also need `playback`.
    pub async fn start(
        storage: &Storage,
        clock: Clock,
        config: RuntimeConfig,
        params: SessionParams,
        playback: Option<Box<dyn PlaybackHandle>>,
    ) -> Result<Self, SessionError> {
        let test = storage
            .tests
            .get_test(params.test_id)
            .await
            .map_err(|source| SessionError::Content {
                test_id: params.test_id,
                source,
            })?;

        let next_test = match params.test_group_id {
            Some(group_id) => storage
                .tests
                .get_test_group(group_id)
                .await
                .map_err(|source| SessionError::Group { group_id, source })?
                .next_after(params.test_id),
            None => None,
        };

        let key = params.checkpoint_key();
        let progress = ProgressStoreClient::new(clock.clone(), storage.progress.clone());
        let checkpoint = progress.load(key).await.map_err(SessionError::Checkpoint)?;

        let previous = storage
            .attempts
            .count_attempts(params.test_id, params.student_id, params.test_group_id)
            .await
            .map_err(SessionError::Attempts)?;
        let attempt = AttemptKey {
            test_id: params.test_id,
            student_id: params.student_id,
            attempt_number: previous + 1,
            test_group_id: params.test_group_id,
        };

        let audio = if test.skill().has_audio() {
            let playback = playback.ok_or(SessionError::MissingPlayback)?;
            Some(AudioSyncController::new(playback, config.practice_mode))
        } else {
            None
        };
        let review = audio
            .as_ref()
            .map(|_| ReviewTimer::new(config.review_window_seconds));

        let mut runtime = Self {
            autosave: AnswerAutosaveManager::new(
                attempt,
                clock.clone(),
                config.clone(),
                storage.answers.clone(),
                storage.attachments.clone(),
            ),
            submission: SubmissionCoordinator::new(
                clock,
                SubmissionTarget {
                    attempt,
                    checkpoint: key,
                    test_type: test.skill(),
                    next_test,
                },
                storage.attempts.clone(),
                progress.clone(),
            ),
            config,
            key,
            attempt_number: attempt.attempt_number,
            next_test,
            state: SessionState::new(test.duration_seconds()),
            countdown: CountdownController::new(),
            review,
            audio,
            progress,
            ticks_since_checkpoint: 0,
            detached: false,
            test,
        };

        let initial = checkpoint
            .as_ref()
            .and_then(|c| c.remaining_time_seconds)
            .unwrap_or(runtime.test.duration_seconds());
        runtime.countdown.start(&mut runtime.state, initial);
        if runtime.audio.is_some() {
            runtime.countdown.pause(&mut runtime.state)?;
        }

        if let Some(part) = checkpoint.as_ref().and_then(|c| c.current_part) {
            let index = usize::try_from(part).unwrap_or(usize::MAX);
            if runtime.test.part(index).is_some() {
                runtime.set_part(index);
            } else {
                warn!(test_id = %params.test_id, part, "ignoring checkpoint part outside the test");
            }
        }
        if let Some(remaining_audio) = checkpoint.as_ref().and_then(|c| c.remaining_audio_seconds) {
            let remaining_review = checkpoint.as_ref().and_then(|c| c.remaining_review_seconds);
            runtime.resume_audio(remaining_audio, remaining_review);
        }

        let saved = storage
            .answers
            .list_answers(attempt)
            .await
            .map_err(SessionError::Answers)?;
        let merged = runtime.autosave.merge_snapshot(&mut runtime.state, saved);

        info!(
            test_id = %params.test_id,
            student_id = %params.student_id,
            attempt_number = runtime.attempt_number,
            remaining = initial,
            resumed = checkpoint.is_some(),
            answers = merged.applied,
            "session started"
        );
        Ok(runtime)
    }

    fn resume_audio(&mut self, remaining_audio: u32, remaining_review: Option<u32>) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        if remaining_audio == 0 {
            // The track had already finished; reopen the review window where it left off.
            if audio.on_ended()
                && let Some(review) = self.review.as_mut()
            {
                match remaining_review {
                    Some(seconds) => review.start_with(seconds),
                    None => review.start(),
                };
            }
            return;
        }
        audio.resume_from_offset(remaining_audio);
    }

    fn set_part(&mut self, index: usize) {
        self.state.set_current_part_index(index);
        if let Some(first) = self.test.part(index).and_then(|p| p.first_question_number()) {
            self.state.set_current_question_number(first);
        }
    }

    pub fn on_complete(&mut self, hook: impl FnOnce(SessionCompletion) + Send + 'static) {
        self.submission.on_complete(hook);
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Record an edit from the host. The debounce class defaults to the
    /// question's kind.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownQuestion` for ids outside the test and
    /// `SessionError::Detached` after shutdown.
    pub fn on_answer_change(
        &mut self,
        question_id: QuestionId,
        value: AnswerValue,
        kind: Option<AnswerKind>,
    ) -> Result<EditOutcome, SessionError> {
        if self.detached {
            return Err(SessionError::Detached);
        }
        let Some((_, question)) = self.test.find_question(&question_id) else {
            return Err(SessionError::UnknownQuestion(question_id));
        };
        let kind = kind.unwrap_or(question.kind.answer_kind());
        Ok(self
            .autosave
            .on_answer_change(&mut self.state, question_id, value, Some(kind)))
    }

    //
    // ─── CLOCK ─────────────────────────────────────────────────────────────────
    //

    /// Advance the exam by one tick.
    ///
    /// Saves a checkpoint every `checkpoint_every_ticks` ticks and submits when
    /// either the exam timer or the review window runs out. Returns the
    /// submission outcome on the tick that triggered it.
    pub async fn tick(&mut self) -> Option<SubmitOutcome> {
        if self.detached || self.state.is_submitting() {
            return None;
        }
        let main = self.countdown.tick(&mut self.state);
        let review = self
            .review
            .as_mut()
            .map_or(TickOutcome::Idle, |r| r.tick(&self.state));

        if main == TickOutcome::Expired || review == TickOutcome::Expired {
            info!(
                test_id = %self.key.test_id,
                main_expired = main == TickOutcome::Expired,
                review_expired = review == TickOutcome::Expired,
                "time is up; submitting"
            );
            return Some(self.submit().await);
        }

        if let TickOutcome::Ticked { .. } = main {
            self.ticks_since_checkpoint += 1;
            if self.ticks_since_checkpoint >= self.config.checkpoint_every_ticks {
                self.ticks_since_checkpoint = 0;
                self.save_progress_logged().await;
            }
        }
        None
    }

    /// # Errors
    ///
    /// Returns `SessionError::Timer` once audio was confirmed or the timer
    /// expired.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.state.is_submitting() {
            return Err(SessionError::Submitting);
        }
        self.countdown.pause(&mut self.state)?;
        debug!(test_id = %self.key.test_id, "timer paused");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::Timer` once the timer expired.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state.is_submitting() {
            return Err(SessionError::Submitting);
        }
        self.countdown.resume(&mut self.state)?;
        debug!(test_id = %self.key.test_id, "timer resumed");
        Ok(())
    }

    //
    // ─── AUDIO ─────────────────────────────────────────────────────────────────
    //

    /// Start audio and the exam timer together. Returns `false` if playback
    /// was already confirmed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoAudio` for tests without audio and
    /// `SessionError::Submitting` once submission began.
    pub fn confirm_audio_start(&mut self) -> Result<bool, SessionError> {
        if self.state.is_submitting() {
            return Err(SessionError::Submitting);
        }
        let audio = self.audio.as_mut().ok_or(SessionError::NoAudio)?;
        if !audio.confirm_start() {
            return Ok(false);
        }
        self.countdown.lock_running(&mut self.state)?;
        info!(
            test_id = %self.key.test_id,
            remaining = self.state.time_remaining_seconds(),
            "audio and timer started"
        );
        Ok(true)
    }

    /// Natural end of the track: opens the review window once.
    pub fn audio_ended(&mut self) -> bool {
        let Some(audio) = self.audio.as_mut() else {
            return false;
        };
        if !audio.on_ended() {
            return false;
        }
        self.review.as_mut().is_some_and(ReviewTimer::start)
    }

    /// Apply a resume seek that waited for the track duration.
    pub fn audio_metadata_loaded(&mut self) -> Option<f64> {
        self.audio.as_mut()?.on_metadata_loaded()
    }

    /// # Errors
    ///
    /// Returns `SessionError::Audio` outside practice mode.
    pub fn seek_audio(&mut self, seconds: f64) -> Result<(), SessionError> {
        let audio = self.audio.as_mut().ok_or(SessionError::NoAudio)?;
        Ok(audio.seek(seconds)?)
    }

    /// # Errors
    ///
    /// Returns `SessionError::Audio` outside practice mode.
    pub fn skip_audio(&mut self, delta: f64) -> Result<(), SessionError> {
        let audio = self.audio.as_mut().ok_or(SessionError::NoAudio)?;
        Ok(audio.skip(delta)?)
    }

    #[must_use]
    pub fn audio_controls(&self) -> &'static [AudioControl] {
        match &self.audio {
            Some(audio) => audio.controls(),
            None => &[],
        }
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Move to part `index` and record it in the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownPart` if the test has no such part.
    pub async fn go_to_part(&mut self, index: usize) -> Result<(), SessionError> {
        if self.test.part(index).is_none() {
            return Err(SessionError::UnknownPart(index));
        }
        let changed = self.state.current_part_index() != index;
        self.set_part(index);
        if changed && !self.detached && !self.state.is_submitting() {
            self.save_progress_logged().await;
        }
        Ok(())
    }

    /// Jump to a question by its displayed number, switching part if needed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::UnknownQuestionNumber` if no question has that
    /// number.
    pub async fn go_to_question(&mut self, number: u32) -> Result<(), SessionError> {
        let Some((part, _)) = self.test.find_question_number(number) else {
            return Err(SessionError::UnknownQuestionNumber(number));
        };
        self.go_to_part(part).await?;
        self.state.set_current_question_number(number);
        Ok(())
    }

    //
    // ─── CHECKPOINTS ───────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn progress_update(&self) -> ProgressUpdate {
        ProgressUpdate {
            remaining_time_seconds: self.state.time_remaining_seconds(),
            remaining_audio_seconds: self
                .audio
                .as_ref()
                .and_then(AudioSyncController::remaining_audio_seconds),
            current_part: u32::try_from(self.state.current_part_index()).ok(),
            remaining_review_seconds: self.review.as_ref().and_then(ReviewTimer::remaining),
        }
    }

    /// Save progress now.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Checkpoint` if the write fails,
    /// `SessionError::Submitting` once submission began.
    pub async fn checkpoint_now(&mut self) -> Result<SaveOutcome, SessionError> {
        if self.state.is_submitting() {
            return Err(SessionError::Submitting);
        }
        self.save_progress().await.map_err(SessionError::Checkpoint)
    }

    async fn save_progress(&mut self) -> Result<SaveOutcome, ProgressError> {
        let update = self.progress_update();
        self.progress.save(self.key, update).await
    }

    async fn save_progress_logged(&mut self) {
        match self.save_progress().await {
            Ok(outcome) => debug!(test_id = %self.key.test_id, ?outcome, "checkpoint saved"),
            Err(e) => warn!(test_id = %self.key.test_id, error = %e, "checkpoint save failed"),
        }
    }

    /// The page went to the background: fire a save that nothing awaits.
    pub fn page_hidden(&self) {
        if self.detached || self.state.is_submitting() {
            return;
        }
        self.progress.save_detached(self.key, self.progress_update());
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Finalize the attempt. Only the first call does anything.
    pub async fn submit(&mut self) -> SubmitOutcome {
        if !self.state.is_submitting() {
            self.countdown.halt();
            if let Some(review) = self.review.as_mut() {
                review.halt();
            }
        }
        self.submission
            .submit(&mut self.state, &mut self.autosave, self.test.duration_seconds())
            .await
    }

    /// Leave this skill of the battery: submit if not done yet, make sure the
    /// checkpoint is gone, and report the next test.
    pub async fn advance_skill(&mut self) -> Option<TestId> {
        if let SubmitOutcome::Failed(e) = self.submit().await {
            warn!(test_id = %self.key.test_id, error = %e, "advancing without a stored result");
        }
        if let Err(e) = self.progress.clear(self.key).await {
            warn!(test_id = %self.key.test_id, error = %e, "failed to clear checkpoint on advance");
        }
        self.next_test
    }

    /// The host left the session: save once more, cancel pending debounces and
    /// ignore every later lifecycle event.
    pub async fn shutdown(&mut self) -> FlushReport {
        if self.detached {
            return FlushReport::default();
        }
        if !self.state.is_submitting() {
            self.save_progress_logged().await;
        }
        self.detached = true;
        let report = self.autosave.shutdown(&self.state).await;
        info!(
            test_id = %self.key.test_id,
            saved = report.saved,
            failed = report.failed.len(),
            "session detached"
        );
        report
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn test(&self) -> &TestDefinition {
        &self.test
    }

    #[must_use]
    pub fn time_remaining(&self) -> u32 {
        self.state.time_remaining_seconds()
    }

    #[must_use]
    pub fn current_part(&self) -> usize {
        self.state.current_part_index()
    }

    #[must_use]
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    #[must_use]
    pub fn next_test(&self) -> Option<TestId> {
        self.next_test
    }

    #[must_use]
    pub fn checkpoint_key(&self) -> CheckpointKey {
        self.key
    }

    #[must_use]
    pub fn timer_status(&self) -> TimerStatus {
        self.countdown.status()
    }

    #[must_use]
    pub fn review_remaining(&self) -> Option<u32> {
        self.review.as_ref().and_then(ReviewTimer::remaining)
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    #[must_use]
    pub fn autosave(&self) -> &AnswerAutosaveManager {
        &self.autosave
    }

    #[must_use]
    pub fn tick_interval(&self) -> std::time::Duration {
        self.config.tick
    }
}
