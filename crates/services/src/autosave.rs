use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use exam_core::model::{
    AnswerKind, AnswerValue, AttachmentRef, AttemptKey, QuestionId, Recording, SessionState,
};
use storage::repository::{AnswerRecord, AnswerRepository, AttachmentStore};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Clock;
use crate::config::RuntimeConfig;
use crate::error::AutosaveError;

/// What `on_answer_change` did with an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Applied locally; a save fires after `delay` unless superseded.
    Scheduled { delay: Duration },
    /// Submission already began; the edit was dropped.
    Ignored,
}

/// Result of merging a server snapshot into local answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    /// Questions kept at their local value because an edit is unsaved.
    pub skipped: Vec<QuestionId>,
}

/// Result of a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: Vec<QuestionId>,
}

#[derive(Debug)]
struct PendingEdit {
    generation: u64,
    firing: bool,
    handle: Option<JoinHandle<()>>,
}

/// Questions with unsaved local edits.
///
/// A question is here from the moment it is edited until its save resolves;
/// merges must skip it. Questions whose last save failed stay in the
/// `failed` set until a later save succeeds.
#[derive(Debug, Default)]
pub struct PendingEdits {
    edits: HashMap<QuestionId, PendingEdit>,
    failed: HashSet<QuestionId>,
    gates: HashMap<QuestionId, Arc<AsyncMutex<()>>>,
}

impl PendingEdits {
    #[must_use]
    pub fn is_pending(&self, id: &QuestionId) -> bool {
        self.edits.contains_key(id)
    }

    #[must_use]
    pub fn is_failed(&self, id: &QuestionId) -> bool {
        self.failed.contains(id)
    }

    /// Pending or failed: the local value is newer than the server's.
    #[must_use]
    pub fn is_unsaved(&self, id: &QuestionId) -> bool {
        self.is_pending(id) || self.is_failed(id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.edits.len()
    }

    /// Register a new edit, cancelling the previous one for the same question
    /// unless its save is already running.
    fn schedule(&mut self, id: QuestionId, generation: u64) {
        let replaced = self.edits.insert(
            id,
            PendingEdit {
                generation,
                firing: false,
                handle: None,
            },
        );
        if let Some(PendingEdit {
            firing: false,
            handle: Some(handle),
            ..
        }) = replaced
        {
            handle.abort();
        }
    }

    fn attach(&mut self, id: &QuestionId, generation: u64, handle: JoinHandle<()>) {
        if let Some(edit) = self.edits.get_mut(id)
            && edit.generation == generation
        {
            edit.handle = Some(handle);
        }
    }

    fn is_current(&self, id: &QuestionId, generation: u64) -> bool {
        self.edits.get(id).is_some_and(|e| e.generation == generation)
    }

    fn begin_firing(&mut self, id: &QuestionId, generation: u64) -> bool {
        match self.edits.get_mut(id) {
            Some(edit) if edit.generation == generation => {
                edit.firing = true;
                true
            }
            _ => false,
        }
    }

    fn finish(&mut self, id: &QuestionId, generation: u64, saved: bool) {
        if saved {
            self.failed.remove(id);
        }
        if self.is_current(id, generation) {
            self.edits.remove(id);
            if !saved {
                self.failed.insert(id.clone());
            }
        }
    }

    fn gate(&mut self, id: &QuestionId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.gates.entry(id.clone()).or_default())
    }

    /// Drop every scheduled save and return the questions that still need one.
    fn take_unsaved(&mut self) -> Vec<QuestionId> {
        let mut ids: Vec<QuestionId> = self.failed.drain().collect();
        for (id, edit) in self.edits.drain() {
            if !edit.firing
                && let Some(handle) = edit.handle
            {
                handle.abort();
            }
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }
}

fn lock(pending: &Mutex<PendingEdits>) -> MutexGuard<'_, PendingEdits> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Persists one answer: uploads recordings, then upserts the record.
#[derive(Clone)]
struct AnswerWriter {
    key: AttemptKey,
    clock: Clock,
    answers: Arc<dyn AnswerRepository>,
    attachments: Arc<dyn AttachmentStore>,
    /// Last successful upload per question, reused while the recording is unchanged.
    uploaded: Arc<Mutex<HashMap<QuestionId, (Recording, AttachmentRef)>>>,
}

impl AnswerWriter {
    fn cached_upload(&self, question_id: &QuestionId, recording: &Recording) -> Option<AttachmentRef> {
        let uploaded = self.uploaded.lock().unwrap_or_else(PoisonError::into_inner);
        uploaded
            .get(question_id)
            .filter(|(sent, _)| sent == recording)
            .map(|(_, reference)| reference.clone())
    }

    async fn upload(
        &self,
        question_id: &QuestionId,
        recording: Recording,
    ) -> Result<AttachmentRef, AutosaveError> {
        if let Some(reference) = self.cached_upload(question_id, &recording) {
            debug!(question_id = %question_id, "reusing uploaded recording");
            return Ok(reference);
        }
        let reference = self.attachments.upload(&recording).await.map_err(|source| {
            AutosaveError::Upload {
                question_id: question_id.clone(),
                source,
            }
        })?;
        self.uploaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(question_id.clone(), (recording, reference.clone()));
        Ok(reference)
    }

    async fn persist(&self, question_id: &QuestionId, value: AnswerValue) -> Result<(), AutosaveError> {
        let value = match value {
            AnswerValue::Recording(recording) => {
                AnswerValue::Attachment(self.upload(question_id, recording).await?)
            }
            other => other,
        };
        let save_error = |source| AutosaveError::Save {
            question_id: question_id.clone(),
            source,
        };
        let record = AnswerRecord::from_value(self.key, question_id.clone(), value, self.clock.now())
            .map_err(save_error)?;
        self.answers.upsert_answer(&record).await.map_err(save_error)
    }
}

async fn run_debounced(
    writer: AnswerWriter,
    pending: Arc<Mutex<PendingEdits>>,
    question_id: QuestionId,
    value: AnswerValue,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let gate = {
        let mut edits = lock(&pending);
        if !edits.begin_firing(&question_id, generation) {
            return;
        }
        edits.gate(&question_id)
    };

    let _serial = gate.lock().await;
    if !lock(&pending).is_current(&question_id, generation) {
        // A newer edit was made while an older save held the gate.
        return;
    }
    let result = writer.persist(&question_id, value).await;
    lock(&pending).finish(&question_id, generation, result.is_ok());
    match result {
        Ok(()) => debug!(question_id = %question_id, "answer saved"),
        Err(e) => warn!(question_id = %question_id, error = %e, "answer autosave failed; keeping local value"),
    }
}

/// Debounced, per-question persistence of answer edits.
///
/// Every question has its own debounce task; editing one question never
/// touches another question's timer.
pub struct AnswerAutosaveManager {
    writer: AnswerWriter,
    config: RuntimeConfig,
    pending: Arc<Mutex<PendingEdits>>,
    next_generation: u64,
}

impl AnswerAutosaveManager {
    #[must_use]
    pub fn new(
        key: AttemptKey,
        clock: Clock,
        config: RuntimeConfig,
        answers: Arc<dyn AnswerRepository>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            writer: AnswerWriter {
                key,
                clock,
                answers,
                attachments,
                uploaded: Arc::default(),
            },
            config,
            pending: Arc::new(Mutex::new(PendingEdits::default())),
            next_generation: 0,
        }
    }

    /// Apply an edit locally and (re)start the question's debounce timer.
    ///
    /// `kind` selects the debounce delay; when absent it is inferred from the
    /// value. Must be called from within a tokio runtime.
    pub fn on_answer_change(
        &mut self,
        state: &mut SessionState,
        question_id: QuestionId,
        value: AnswerValue,
        kind: Option<AnswerKind>,
    ) -> EditOutcome {
        if state.is_submitting() {
            debug!(question_id = %question_id, "ignoring edit after submission began");
            return EditOutcome::Ignored;
        }
        let delay = self
            .config
            .debounce_for(kind.unwrap_or_else(|| AnswerKind::infer(&value)));
        state.set_answer(question_id.clone(), value.clone());

        self.next_generation += 1;
        let generation = self.next_generation;
        lock(&self.pending).schedule(question_id.clone(), generation);

        let task = tokio::spawn(run_debounced(
            self.writer.clone(),
            Arc::clone(&self.pending),
            question_id.clone(),
            value,
            generation,
            delay,
        ));
        lock(&self.pending).attach(&question_id, generation, task);
        EditOutcome::Scheduled { delay }
    }

    /// Merge a server snapshot, skipping every question with an unsaved edit.
    pub fn merge_snapshot(&self, state: &mut SessionState, records: Vec<AnswerRecord>) -> MergeReport {
        let pending = lock(&self.pending);
        let mut report = MergeReport::default();
        for record in records {
            if pending.is_unsaved(&record.question_id) {
                debug!(question_id = %record.question_id, "keeping unsaved local answer over snapshot");
                report.skipped.push(record.question_id);
                continue;
            }
            state.set_answer(record.question_id, record.value);
            report.applied += 1;
        }
        report
    }

    /// Save every pending or previously failed answer once, now.
    ///
    /// Scheduled debounce timers are cancelled; saves already running finish
    /// first since each question's saves are serialized.
    pub async fn flush(&mut self, state: &SessionState) -> FlushReport {
        let targets = lock(&self.pending).take_unsaved();
        let mut report = FlushReport::default();
        for question_id in targets {
            let Some(value) = state.answer(&question_id).cloned() else {
                continue;
            };
            let gate = lock(&self.pending).gate(&question_id);
            let _serial = gate.lock().await;
            match self.writer.persist(&question_id, value).await {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    warn!(question_id = %question_id, error = %e, "answer flush failed");
                    lock(&self.pending).failed.insert(question_id.clone());
                    report.failed.push(question_id);
                }
            }
        }
        if report.saved > 0 || !report.failed.is_empty() {
            debug!(saved = report.saved, failed = report.failed.len(), "flushed answers");
        }
        report
    }

    /// Final best-effort save, then cancel everything still scheduled.
    pub async fn shutdown(&mut self, state: &SessionState) -> FlushReport {
        let report = self.flush(state).await;
        lock(&self.pending).take_unsaved();
        report
    }

    /// Read the pending-edit set under its lock.
    pub fn inspect_pending<R>(&self, f: impl FnOnce(&PendingEdits) -> R) -> R {
        f(&lock(&self.pending))
    }

    #[must_use]
    pub fn is_pending(&self, id: &QuestionId) -> bool {
        self.inspect_pending(|p| p.is_pending(id))
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inspect_pending(PendingEdits::pending_count)
    }

    #[must_use]
    pub fn failed_questions(&self) -> Vec<QuestionId> {
        let mut failed: Vec<QuestionId> = lock(&self.pending).failed.iter().cloned().collect();
        failed.sort();
        failed
    }

    #[must_use]
    pub fn attempt_key(&self) -> AttemptKey {
        self.writer.key
    }
}
