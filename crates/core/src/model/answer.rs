use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("attachment reference cannot be empty")]
    EmptyAttachmentRef,

    #[error("recording has no audio data")]
    EmptyRecording,

    #[error("recording content type cannot be empty")]
    MissingContentType,
}

//
// ─── ATTACHMENTS ───────────────────────────────────────────────────────────────
//

/// Opaque reference returned by the attachment store for an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(String);

impl AttachmentRef {
    /// # Errors
    ///
    /// Returns `AnswerError::EmptyAttachmentRef` for blank references.
    pub fn new(raw: impl Into<String>) -> Result<Self, AnswerError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AnswerError::EmptyAttachmentRef);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw recorded audio held locally until it is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    content_type: String,
    bytes: Vec<u8>,
}

impl Recording {
    /// # Errors
    ///
    /// Returns `AnswerError` if the content type is blank or no bytes were captured.
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Result<Self, AnswerError> {
        let content_type = content_type.into();
        if content_type.trim().is_empty() {
            return Err(AnswerError::MissingContentType);
        }
        if bytes.is_empty() {
            return Err(AnswerError::EmptyRecording);
        }
        Ok(Self {
            content_type,
            bytes,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

//
// ─── ANSWER VALUE ──────────────────────────────────────────────────────────────
//

/// A test-taker's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    /// Single free-text or single-choice answer.
    Text(String),
    /// Several selected options.
    Choices(Vec<String>),
    /// Matching answers: item -> chosen option.
    Selection(BTreeMap<String, String>),
    /// Already uploaded file (speaking responses after upload).
    Attachment(AttachmentRef),
    /// Local audio awaiting upload. Never persisted as-is.
    Recording(Recording),
}

impl AnswerValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Raw text for essay/transcript style answers.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(t) => t.trim().is_empty(),
            AnswerValue::Choices(c) => c.is_empty(),
            AnswerValue::Selection(s) => s.is_empty(),
            AnswerValue::Attachment(_) | AnswerValue::Recording(_) => false,
        }
    }

    /// True if the payload has to go to the attachment store before the answer
    /// can be persisted.
    #[must_use]
    pub fn needs_upload(&self) -> bool {
        matches!(self, AnswerValue::Recording(_))
    }
}

//
// ─── ANSWER KIND ───────────────────────────────────────────────────────────────
//

/// Persistence class of an answer; selects the debounce delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Discrete selections (choice, matching).
    Structured,
    /// Typed text (gap fill, essays).
    FreeText,
    /// Uploaded media (speaking).
    Recording,
}

impl AnswerKind {
    /// Best guess when the caller does not state a kind.
    #[must_use]
    pub fn infer(value: &AnswerValue) -> Self {
        match value {
            AnswerValue::Text(_) => AnswerKind::FreeText,
            AnswerValue::Choices(_) | AnswerValue::Selection(_) => AnswerKind::Structured,
            AnswerValue::Attachment(_) | AnswerValue::Recording(_) => AnswerKind::Recording,
        }
    }
}
