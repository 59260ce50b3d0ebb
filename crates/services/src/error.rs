//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{QuestionId, TestGroupId, TestId};
use storage::repository::StorageError;

/// Errors emitted by `ProgressStoreClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while persisting a single answer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AutosaveError {
    #[error("uploading the recording for {question_id} failed")]
    Upload {
        question_id: QuestionId,
        #[source]
        source: StorageError,
    },
    #[error("saving the answer for {question_id} failed")]
    Save {
        question_id: QuestionId,
        #[source]
        source: StorageError,
    },
}

/// Errors emitted by the countdown controller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimerError {
    #[error("the timer cannot be paused once audio playback was confirmed")]
    PauseLocked,
    #[error("the timer has already expired")]
    Expired,
}

/// Errors emitted by the audio sync controller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AudioError {
    #[error("playback controls are only available in practice mode")]
    ControlsLocked,
    #[error("audio duration is not known yet")]
    DurationUnknown,
}

/// Errors emitted while finalizing an attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmitError {
    #[error("failed to create the attempt record")]
    Create(#[source] StorageError),
}

/// Errors emitted by the session runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("failed to load test {test_id}")]
    Content {
        test_id: TestId,
        #[source]
        source: StorageError,
    },
    #[error("failed to load test group {group_id}")]
    Group {
        group_id: TestGroupId,
        #[source]
        source: StorageError,
    },
    #[error("failed to load saved progress")]
    Checkpoint(#[source] ProgressError),
    #[error("failed to load saved answers")]
    Answers(#[source] StorageError),
    #[error("failed to read previous attempts")]
    Attempts(#[source] StorageError),
    #[error("listening tests need a playback handle")]
    MissingPlayback,
    #[error("this test has no audio")]
    NoAudio,
    #[error("question {0} is not part of this test")]
    UnknownQuestion(QuestionId),
    #[error("question number {0} is not part of this test")]
    UnknownQuestionNumber(u32),
    #[error("part {0} is not part of this test")]
    UnknownPart(usize),
    #[error("the session is already being submitted")]
    Submitting,
    #[error("the session has been shut down")]
    Detached,
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Audio(#[from] AudioError),
}
