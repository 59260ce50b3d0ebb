mod answer;
mod attempt;
mod checkpoint;
mod definition;
mod ids;
mod session;

pub use ids::{ParseIdError, QuestionId, ResultId, StudentId, TestGroupId, TestId};

pub use answer::{AnswerError, AnswerKind, AnswerValue, AttachmentRef, Recording};
pub use attempt::{AttemptKey, AttemptResult, NewAttempt, TestGroup};
pub use checkpoint::{CheckpointKey, CheckpointPatch, ProgressCheckpoint, ProgressUpdate};
pub use definition::{
    AudioTrack, Part, Question, QuestionGroup, QuestionKind, SkillKind, TestDefinition,
    TestDefinitionError,
};
pub use session::SessionState;
