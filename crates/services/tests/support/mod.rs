#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AudioTrack, CheckpointKey, CheckpointPatch, Part, ProgressCheckpoint, Question, QuestionGroup,
    QuestionId, QuestionKind, SkillKind, StudentId, TestDefinition, TestGroup, TestGroupId, TestId,
};
use services::{PlaybackHandle, SessionCompletion};
use storage::Storage;
use storage::repository::{InMemoryRepository, ProgressRepository, StorageError, TestRepository};

pub const READING: TestId = TestId::new(1);
pub const LISTENING: TestId = TestId::new(2);
pub const STUDENT: StudentId = StudentId::new(42);
pub const BATTERY: TestGroupId = TestGroupId::new(7);

fn part(title: &str, questions: &[(&str, u32, QuestionKind)]) -> Part {
    Part {
        title: title.to_string(),
        groups: vec![QuestionGroup {
            instructions: None,
            questions: questions
                .iter()
                .map(|(id, number, kind)| Question {
                    id: QuestionId::new(*id),
                    number: *number,
                    kind: *kind,
                })
                .collect(),
        }],
    }
}

pub fn reading_test() -> TestDefinition {
    TestDefinition::new(
        READING,
        "Academic Reading",
        SkillKind::Reading,
        1800,
        vec![
            part(
                "Passage 1",
                &[
                    ("R1", 1, QuestionKind::MultipleChoice),
                    ("R2", 2, QuestionKind::GapFill),
                ],
            ),
            part(
                "Passage 2",
                &[
                    ("R3", 3, QuestionKind::TrueFalseNotGiven),
                    ("R4", 4, QuestionKind::Matching),
                ],
            ),
        ],
        None,
    )
    .unwrap()
}

pub fn listening_test(duration_seconds: u32) -> TestDefinition {
    TestDefinition::new(
        LISTENING,
        "Listening",
        SkillKind::Listening,
        duration_seconds,
        vec![
            part("Section 1", &[("L1", 1, QuestionKind::GapFill)]),
            part("Section 2", &[("L2", 2, QuestionKind::MultipleChoice)]),
        ],
        Some(AudioTrack {
            uri: "mem://listening.mp3".to_string(),
            duration_seconds: Some(600),
        }),
    )
    .unwrap()
}

/// In-memory repository seeded with both tests and a reading → listening battery.
pub async fn seeded_repo() -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    repo.upsert_test(&reading_test()).await.unwrap();
    repo.upsert_test(&listening_test(1800)).await.unwrap();
    repo.upsert_test_group(&TestGroup {
        id: BATTERY,
        tests: vec![READING, LISTENING],
    })
    .await
    .unwrap();
    repo
}

pub fn qid(id: &str) -> QuestionId {
    QuestionId::new(id)
}

//
// ─── AUDIO ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
pub struct Transport {
    pub duration: Option<f64>,
    pub position: f64,
    pub playing: bool,
    pub seeks: Vec<f64>,
}

/// Scriptable audio element shared between the test and the runtime.
#[derive(Clone, Default)]
pub struct FakePlayer(pub Arc<Mutex<Transport>>);

impl FakePlayer {
    pub fn with_duration(duration: Option<f64>) -> Self {
        let player = Self::default();
        player.0.lock().unwrap().duration = duration;
        player
    }

    pub fn boxed(&self) -> Option<Box<dyn PlaybackHandle>> {
        Some(Box::new(self.clone()))
    }

    pub fn transport(&self) -> std::sync::MutexGuard<'_, Transport> {
        self.0.lock().unwrap()
    }
}

impl PlaybackHandle for FakePlayer {
    fn duration(&self) -> Option<f64> {
        self.0.lock().unwrap().duration
    }

    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().position
    }

    fn seek(&mut self, seconds: f64) {
        let mut transport = self.0.lock().unwrap();
        transport.position = seconds;
        transport.seeks.push(seconds);
    }

    fn play(&mut self) {
        self.0.lock().unwrap().playing = true;
    }

    fn pause(&mut self) {
        self.0.lock().unwrap().playing = false;
    }
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Progress repository that counts deletions.
#[derive(Clone)]
pub struct CountingProgress {
    inner: InMemoryRepository,
    pub deletes: Arc<AtomicUsize>,
}

impl CountingProgress {
    pub fn new(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            deletes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressRepository for CountingProgress {
    async fn get_checkpoint(
        &self,
        key: CheckpointKey,
    ) -> Result<Option<ProgressCheckpoint>, StorageError> {
        self.inner.get_checkpoint(key).await
    }

    async fn insert_checkpoint(&self, checkpoint: &ProgressCheckpoint) -> Result<(), StorageError> {
        self.inner.insert_checkpoint(checkpoint).await
    }

    async fn update_checkpoint(
        &self,
        key: CheckpointKey,
        patch: CheckpointPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.update_checkpoint(key, patch, now).await
    }

    async fn delete_checkpoint(&self, key: CheckpointKey) -> Result<bool, StorageError> {
        let existed = self.inner.delete_checkpoint(key).await?;
        if existed {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(existed)
    }
}

pub fn storage_with_counting_progress(repo: &InMemoryRepository) -> (Storage, CountingProgress) {
    let counting = CountingProgress::new(repo.clone());
    let mut storage = Storage::from_repo(repo.clone());
    storage.progress = Arc::new(counting.clone());
    (storage, counting)
}

//
// ─── COMPLETION ────────────────────────────────────────────────────────────────
//

/// Collects completion callbacks.
#[derive(Clone, Default)]
pub struct Completions(pub Arc<Mutex<Vec<SessionCompletion>>>);

impl Completions {
    pub fn hook(&self) -> impl FnOnce(SessionCompletion) + Send + 'static {
        let sink = Arc::clone(&self.0);
        move |done| sink.lock().unwrap().push(done)
    }

    pub fn all(&self) -> Vec<SessionCompletion> {
        self.0.lock().unwrap().clone()
    }
}
