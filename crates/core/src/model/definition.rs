use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::answer::AnswerKind;
use crate::model::ids::{QuestionId, TestId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TestDefinitionError {
    #[error("test duration must be > 0 seconds")]
    InvalidDuration,

    #[error("test must contain at least one part")]
    NoParts,

    #[error("part {part} contains no questions")]
    EmptyPart { part: usize },

    #[error("duplicate question id: {0}")]
    DuplicateQuestionId(QuestionId),

    #[error("duplicate question number: {0}")]
    DuplicateQuestionNumber(u32),

    #[error("listening tests require an audio track")]
    MissingAudio,

    #[error("unknown skill: {0}")]
    UnknownSkill(String),
}

//
// ─── SKILL ─────────────────────────────────────────────────────────────────────
//

/// The skill a test measures. Also used as the `test_type` of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl SkillKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkillKind::Listening => "listening",
            SkillKind::Reading => "reading",
            SkillKind::Writing => "writing",
            SkillKind::Speaking => "speaking",
        }
    }

    /// Listening is the only skill driven by an audio clock.
    #[must_use]
    pub fn has_audio(self) -> bool {
        matches!(self, SkillKind::Listening)
    }
}

impl fmt::Display for SkillKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillKind {
    type Err = TestDefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listening" => Ok(SkillKind::Listening),
            "reading" => Ok(SkillKind::Reading),
            "writing" => Ok(SkillKind::Writing),
            "speaking" => Ok(SkillKind::Speaking),
            other => Err(TestDefinitionError::UnknownSkill(other.to_string())),
        }
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

/// Closed set of question widgets a test can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    MultipleSelect,
    TrueFalseNotGiven,
    Matching,
    GapFill,
    ShortAnswer,
    Essay,
    SpeakingResponse,
}

impl QuestionKind {
    /// How answers to this question are debounced and persisted.
    #[must_use]
    pub fn answer_kind(self) -> AnswerKind {
        match self {
            QuestionKind::MultipleChoice
            | QuestionKind::MultipleSelect
            | QuestionKind::TrueFalseNotGiven
            | QuestionKind::Matching => AnswerKind::Structured,
            QuestionKind::GapFill | QuestionKind::ShortAnswer | QuestionKind::Essay => {
                AnswerKind::FreeText
            }
            QuestionKind::SpeakingResponse => AnswerKind::Recording,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    /// 1-based number shown to the test-taker.
    pub number: u32,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionGroup {
    pub instructions: Option<String>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub title: String,
    pub groups: Vec<QuestionGroup>,
}

impl Part {
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.groups.iter().flat_map(|g| g.questions.iter())
    }

    #[must_use]
    pub fn first_question_number(&self) -> Option<u32> {
        self.questions().map(|q| q.number).min()
    }
}

/// Recorded audio that accompanies a listening test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub uri: String,
    /// Duration as authored, when known ahead of playback.
    pub duration_seconds: Option<u32>,
}

//
// ─── TEST DEFINITION ───────────────────────────────────────────────────────────
//

/// Immutable, normalized test content: parts → question groups → questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    id: TestId,
    title: String,
    skill: SkillKind,
    duration_seconds: u32,
    parts: Vec<Part>,
    audio: Option<AudioTrack>,
}

impl TestDefinition {
    /// Build and validate a test definition.
    ///
    /// # Errors
    ///
    /// Returns `TestDefinitionError` if the duration is zero, there are no parts,
    /// a part has no questions, question ids or numbers repeat, or a listening
    /// test has no audio.
    pub fn new(
        id: TestId,
        title: impl Into<String>,
        skill: SkillKind,
        duration_seconds: u32,
        parts: Vec<Part>,
        audio: Option<AudioTrack>,
    ) -> Result<Self, TestDefinitionError> {
        let def = Self {
            id,
            title: title.into(),
            skill,
            duration_seconds,
            parts,
            audio,
        };
        def.validate()?;
        Ok(def)
    }

    /// Re-check invariants, e.g. after deserializing a stored document.
    ///
    /// # Errors
    ///
    /// Same as [`TestDefinition::new`].
    pub fn validate(&self) -> Result<(), TestDefinitionError> {
        if self.duration_seconds == 0 {
            return Err(TestDefinitionError::InvalidDuration);
        }
        if self.parts.is_empty() {
            return Err(TestDefinitionError::NoParts);
        }
        if self.skill.has_audio() && self.audio.is_none() {
            return Err(TestDefinitionError::MissingAudio);
        }

        let mut ids = HashSet::new();
        let mut numbers = HashSet::new();
        for (index, part) in self.parts.iter().enumerate() {
            if part.questions().next().is_none() {
                return Err(TestDefinitionError::EmptyPart { part: index });
            }
            for q in part.questions() {
                if !ids.insert(&q.id) {
                    return Err(TestDefinitionError::DuplicateQuestionId(q.id.clone()));
                }
                if !numbers.insert(q.number) {
                    return Err(TestDefinitionError::DuplicateQuestionNumber(q.number));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> TestId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn skill(&self) -> SkillKind {
        self.skill
    }

    /// Initial time allotment for a fresh attempt.
    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[must_use]
    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    #[must_use]
    pub fn audio(&self) -> Option<&AudioTrack> {
        self.audio.as_ref()
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.parts.iter().flat_map(Part::questions)
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions().count()
    }

    /// Locate a question by id, returning its part index.
    #[must_use]
    pub fn find_question(&self, id: &QuestionId) -> Option<(usize, &Question)> {
        self.parts.iter().enumerate().find_map(|(index, part)| {
            part.questions().find(|q| &q.id == id).map(|q| (index, q))
        })
    }

    /// Locate a question by its displayed number, returning its part index.
    #[must_use]
    pub fn find_question_number(&self, number: u32) -> Option<(usize, &Question)> {
        self.parts.iter().enumerate().find_map(|(index, part)| {
            part.questions()
                .find(|q| q.number == number)
                .map(|q| (index, q))
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn question(id: &str, number: u32, kind: QuestionKind) -> Question {
        Question {
            id: QuestionId::new(id),
            number,
            kind,
        }
    }

    pub(crate) fn part(title: &str, questions: Vec<Question>) -> Part {
        Part {
            title: title.to_string(),
            groups: vec![QuestionGroup {
                instructions: None,
                questions,
            }],
        }
    }
}
