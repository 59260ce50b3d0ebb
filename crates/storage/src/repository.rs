use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerValue, AttachmentRef, AttemptKey, AttemptResult, CheckpointKey, CheckpointPatch,
    NewAttempt, ProgressCheckpoint, QuestionId, Recording, ResultId, StudentId, TestDefinition,
    TestGroup, TestGroupId, TestId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape of one answer.
///
/// Keeps the raw text beside the structured value so essay and transcript
/// answers can be read without decoding the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub key: AttemptKey,
    pub question_id: QuestionId,
    pub value: AnswerValue,
    pub attachment: Option<AttachmentRef>,
    pub text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AnswerRecord {
    /// Build a record from a persistable answer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for local recordings; those must be
    /// uploaded and replaced by an attachment reference first.
    pub fn from_value(
        key: AttemptKey,
        question_id: QuestionId,
        value: AnswerValue,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, StorageError> {
        if value.needs_upload() {
            return Err(StorageError::Serialization(format!(
                "answer {question_id} holds a recording that was not uploaded"
            )));
        }
        let attachment = match &value {
            AnswerValue::Attachment(r) => Some(r.clone()),
            _ => None,
        };
        let text = value.as_text().map(str::to_owned);
        Ok(Self {
            key,
            question_id,
            value,
            attachment,
            text,
            updated_at,
        })
    }
}

/// Content loader: normalized test definitions and batteries.
#[async_trait]
pub trait TestRepository: Send + Sync {
    /// Fetch a test definition by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_test(&self, id: TestId) -> Result<TestDefinition, StorageError>;

    /// Persist or replace a test definition.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the definition cannot be stored.
    async fn upsert_test(&self, test: &TestDefinition) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_test_group(&self, id: TestGroupId) -> Result<TestGroup, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the group cannot be stored.
    async fn upsert_test_group(&self, group: &TestGroup) -> Result<(), StorageError>;
}

/// Checkpoint records, one per (test, student, group).
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures. A missing record is `Ok(None)`.
    async fn get_checkpoint(
        &self,
        key: CheckpointKey,
    ) -> Result<Option<ProgressCheckpoint>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a checkpoint already exists for the key.
    async fn insert_checkpoint(&self, checkpoint: &ProgressCheckpoint) -> Result<(), StorageError>;

    /// Write the fields set in `patch`.
    ///
    /// The remaining time is compared with the stored value as part of the
    /// write and only lands when strictly smaller, or when none is stored.
    /// Returns whether it was written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no checkpoint exists for the key.
    async fn update_checkpoint(
        &self,
        key: CheckpointKey,
        patch: CheckpointPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Remove the checkpoint, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn delete_checkpoint(&self, key: CheckpointKey) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait AnswerRepository: Send + Sync {
    /// Insert or replace the answer for (test, student, attempt, question).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the answer cannot be stored.
    async fn upsert_answer(&self, answer: &AnswerRecord) -> Result<(), StorageError>;

    /// All answers stored for an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_answers(&self, key: AttemptKey) -> Result<Vec<AnswerRecord>, StorageError>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Store a recording and hand back its reference.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the upload fails.
    async fn upload(&self, recording: &Recording) -> Result<AttachmentRef, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Create the result record for a finished attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the attempt number is already taken.
    async fn create_attempt(
        &self,
        attempt: &NewAttempt,
        submitted_at: DateTime<Utc>,
    ) -> Result<AttemptResult, StorageError>;

    /// Number of results already recorded for (test, student, group).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_attempts(
        &self,
        test_id: TestId,
        student_id: StudentId,
        test_group_id: Option<TestGroupId>,
    ) -> Result<u32, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tests: Arc<Mutex<HashMap<TestId, TestDefinition>>>,
    groups: Arc<Mutex<HashMap<TestGroupId, TestGroup>>>,
    checkpoints: Arc<Mutex<HashMap<CheckpointKey, ProgressCheckpoint>>>,
    answers: Arc<Mutex<HashMap<(AttemptKey, QuestionId), AnswerRecord>>>,
    attachments: Arc<Mutex<HashMap<AttachmentRef, Recording>>>,
    attempts: Arc<Mutex<Vec<AttemptResult>>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored result, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn attempts(&self) -> Result<Vec<AttemptResult>, StorageError> {
        Ok(self.attempts.lock().map_err(poisoned)?.clone())
    }

    /// Fetch a previously uploaded recording.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown references.
    pub fn attachment(&self, reference: &AttachmentRef) -> Result<Recording, StorageError> {
        self.attachments
            .lock()
            .map_err(poisoned)?
            .get(reference)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    /// Number of uploaded recordings.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn attachment_count(&self) -> Result<usize, StorageError> {
        Ok(self.attachments.lock().map_err(poisoned)?.len())
    }
}

#[async_trait]
impl TestRepository for InMemoryRepository {
    async fn get_test(&self, id: TestId) -> Result<TestDefinition, StorageError> {
        let guard = self.tests.lock().map_err(poisoned)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn upsert_test(&self, test: &TestDefinition) -> Result<(), StorageError> {
        let mut guard = self.tests.lock().map_err(poisoned)?;
        guard.insert(test.id(), test.clone());
        Ok(())
    }

    async fn get_test_group(&self, id: TestGroupId) -> Result<TestGroup, StorageError> {
        let guard = self.groups.lock().map_err(poisoned)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn upsert_test_group(&self, group: &TestGroup) -> Result<(), StorageError> {
        let mut guard = self.groups.lock().map_err(poisoned)?;
        guard.insert(group.id, group.clone());
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_checkpoint(
        &self,
        key: CheckpointKey,
    ) -> Result<Option<ProgressCheckpoint>, StorageError> {
        let guard = self.checkpoints.lock().map_err(poisoned)?;
        Ok(guard.get(&key).cloned())
    }

    async fn insert_checkpoint(&self, checkpoint: &ProgressCheckpoint) -> Result<(), StorageError> {
        let mut guard = self.checkpoints.lock().map_err(poisoned)?;
        if guard.contains_key(&checkpoint.key) {
            return Err(StorageError::Conflict);
        }
        guard.insert(checkpoint.key, checkpoint.clone());
        Ok(())
    }

    async fn update_checkpoint(
        &self,
        key: CheckpointKey,
        patch: CheckpointPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut guard = self.checkpoints.lock().map_err(poisoned)?;
        let stored = guard.get_mut(&key).ok_or(StorageError::NotFound)?;
        Ok(stored.apply(patch, now))
    }

    async fn delete_checkpoint(&self, key: CheckpointKey) -> Result<bool, StorageError> {
        let mut guard = self.checkpoints.lock().map_err(poisoned)?;
        Ok(guard.remove(&key).is_some())
    }
}

#[async_trait]
impl AnswerRepository for InMemoryRepository {
    async fn upsert_answer(&self, answer: &AnswerRecord) -> Result<(), StorageError> {
        let mut guard = self.answers.lock().map_err(poisoned)?;
        guard.insert((answer.key, answer.question_id.clone()), answer.clone());
        Ok(())
    }

    async fn list_answers(&self, key: AttemptKey) -> Result<Vec<AnswerRecord>, StorageError> {
        let guard = self.answers.lock().map_err(poisoned)?;
        let mut found: Vec<_> = guard
            .iter()
            .filter(|((k, _), _)| *k == key)
            .map(|(_, record)| record.clone())
            .collect();
        found.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(found)
    }
}

#[async_trait]
impl AttachmentStore for InMemoryRepository {
    async fn upload(&self, recording: &Recording) -> Result<AttachmentRef, StorageError> {
        let reference = AttachmentRef::new(format!("mem://{}", uuid::Uuid::new_v4()))
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut guard = self.attachments.lock().map_err(poisoned)?;
        guard.insert(reference.clone(), recording.clone());
        Ok(reference)
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn create_attempt(
        &self,
        attempt: &NewAttempt,
        submitted_at: DateTime<Utc>,
    ) -> Result<AttemptResult, StorageError> {
        let mut guard = self.attempts.lock().map_err(poisoned)?;
        let taken = guard.iter().any(|r| {
            r.attempt.key() == attempt.key() && r.attempt.test_group_id == attempt.test_group_id
        });
        if taken {
            return Err(StorageError::Conflict);
        }
        let next_id = u64::try_from(guard.len())
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            + 1;
        let result = AttemptResult {
            id: ResultId::new(next_id),
            attempt: attempt.clone(),
            submitted_at,
        };
        guard.push(result.clone());
        Ok(result)
    }

    async fn count_attempts(
        &self,
        test_id: TestId,
        student_id: StudentId,
        test_group_id: Option<TestGroupId>,
    ) -> Result<u32, StorageError> {
        let guard = self.attempts.lock().map_err(poisoned)?;
        let count = guard
            .iter()
            .filter(|r| {
                r.attempt.test_id == test_id
                    && r.attempt.student_id == student_id
                    && r.attempt.test_group_id == test_group_id
            })
            .count();
        u32::try_from(count).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub tests: Arc<dyn TestRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub answers: Arc<dyn AnswerRepository>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repo(InMemoryRepository::new())
    }

    /// Use one repository value for every collaborator.
    #[must_use]
    pub fn from_repo<R>(repo: R) -> Self
    where
        R: TestRepository
            + ProgressRepository
            + AnswerRepository
            + AttachmentStore
            + AttemptRepository
            + Clone
            + 'static,
    {
        let tests: Arc<dyn TestRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let answers: Arc<dyn AnswerRepository> = Arc::new(repo.clone());
        let attachments: Arc<dyn AttachmentStore> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self {
            tests,
            progress,
            answers,
            attachments,
            attempts,
        }
    }
}
