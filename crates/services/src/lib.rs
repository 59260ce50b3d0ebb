#![forbid(unsafe_code)]

pub mod audio;
pub mod autosave;
pub mod config;
pub mod countdown;
pub mod driver;
pub mod error;
pub mod progress;
pub mod runtime;
pub mod submission;

pub use exam_core::Clock;

pub use audio::{AudioControl, AudioSyncController, PlaybackHandle};
pub use autosave::{AnswerAutosaveManager, EditOutcome, FlushReport, MergeReport, PendingEdits};
pub use config::RuntimeConfig;
pub use countdown::{CountdownController, ReviewTimer, TickOutcome, TimerStatus};
pub use driver::{SessionCommand, SessionExit, SessionHandle, SessionSnapshot};
pub use error::{AudioError, AutosaveError, ProgressError, SessionError, SubmitError, TimerError};
pub use progress::{ProgressStoreClient, SaveOutcome};
pub use runtime::{SessionParams, SessionRuntime};
pub use submission::{
    CompletionHook, SessionCompletion, SubmissionCoordinator, SubmissionTarget, SubmitOutcome,
};
