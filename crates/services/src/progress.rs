use std::sync::Arc;

use exam_core::model::{CheckpointKey, ProgressCheckpoint, ProgressUpdate};
use storage::repository::{ProgressRepository, StorageError};
use tracing::debug;

use crate::Clock;
use crate::error::ProgressError;

/// What a `save` did to the stored checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    /// Some field changed. `time_accepted` is false when the remaining time was
    /// dropped for not being smaller than the stored value.
    Updated { time_accepted: bool },
    /// Nothing to write.
    Unchanged,
}

/// Reads and writes the resumable checkpoint of an attempt.
#[derive(Clone)]
pub struct ProgressStoreClient {
    clock: Clock,
    repo: Arc<dyn ProgressRepository>,
}

impl ProgressStoreClient {
    #[must_use]
    pub fn new(clock: Clock, repo: Arc<dyn ProgressRepository>) -> Self {
        Self { clock, repo }
    }

    /// # Errors
    ///
    /// Returns `ProgressError` if the checkpoint cannot be read.
    pub async fn load(&self, key: CheckpointKey) -> Result<Option<ProgressCheckpoint>, ProgressError> {
        Ok(self.repo.get_checkpoint(key).await?)
    }

    /// Record progress for `key`.
    ///
    /// Creates the checkpoint if none exists. Otherwise remaining time is only
    /// written when strictly smaller than the stored value. The repository
    /// re-checks this at write time, so overlapping saves keep the smallest
    /// value. Audio position and part are written whenever provided.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the checkpoint cannot be read or written.
    pub async fn save(
        &self,
        key: CheckpointKey,
        update: ProgressUpdate,
    ) -> Result<SaveOutcome, ProgressError> {
        let now = self.clock.now();
        let existing = match self.repo.get_checkpoint(key).await? {
            Some(existing) => existing,
            None => {
                let created = ProgressCheckpoint::create(key, update, now);
                match self.repo.insert_checkpoint(&created).await {
                    Ok(()) => return Ok(SaveOutcome::Created),
                    // Another writer created it first; fall back to the update rule.
                    Err(StorageError::Conflict) => self
                        .repo
                        .get_checkpoint(key)
                        .await?
                        .ok_or(StorageError::NotFound)?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let patch = existing.plan_update(&update);
        if patch.is_empty() {
            debug!(
                test_id = %key.test_id,
                remaining = update.remaining_time_seconds,
                "checkpoint unchanged"
            );
            return Ok(SaveOutcome::Unchanged);
        }

        let time_accepted = self.repo.update_checkpoint(key, patch, now).await?;
        if !time_accepted {
            debug!(
                test_id = %key.test_id,
                stored = ?existing.remaining_time_seconds,
                offered = update.remaining_time_seconds,
                "ignoring remaining time that would move the clock backward"
            );
            if !patch.touches_other_fields() {
                return Ok(SaveOutcome::Unchanged);
            }
        }
        Ok(SaveOutcome::Updated { time_accepted })
    }

    /// Fire-and-forget save for page-hide and unload paths.
    ///
    /// Nothing awaits the write and failures are only logged, so the save may
    /// be lost. Without a running tokio runtime the save is dropped.
    pub fn save_detached(&self, key: CheckpointKey, update: ProgressUpdate) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(test_id = %key.test_id, "no runtime for detached checkpoint save");
            return;
        };
        let client = self.clone();
        handle.spawn(async move {
            if let Err(e) = client.save(key, update).await {
                debug!(test_id = %key.test_id, error = %e, "detached checkpoint save dropped");
            }
        });
    }

    /// Delete the checkpoint, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the delete fails.
    pub async fn clear(&self, key: CheckpointKey) -> Result<bool, ProgressError> {
        Ok(self.repo.delete_checkpoint(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use exam_core::model::{CheckpointPatch, StudentId, TestGroupId, TestId};
    use exam_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;
    use tokio::sync::Barrier;

    /// Holds every read until `barrier` fills, so concurrent saves all plan
    /// from the same stored value.
    struct SlowReads {
        inner: InMemoryRepository,
        barrier: Barrier,
    }

    #[async_trait]
    impl ProgressRepository for SlowReads {
        async fn get_checkpoint(
            &self,
            key: CheckpointKey,
        ) -> Result<Option<ProgressCheckpoint>, StorageError> {
            let found = self.inner.get_checkpoint(key).await?;
            self.barrier.wait().await;
            Ok(found)
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
            self.inner.delete_checkpoint(key).await
        }
    }

    fn client(repo: &InMemoryRepository) -> ProgressStoreClient {
        ProgressStoreClient::new(fixed_clock(), Arc::new(repo.clone()))
    }

    fn key() -> CheckpointKey {
        CheckpointKey::new(TestId::new(1), StudentId::new(2), None)
    }

    #[tokio::test]
    async fn first_save_creates_checkpoint() {
        let repo = InMemoryRepository::new();
        let progress = client(&repo);
        assert!(progress.load(key()).await.unwrap().is_none());

        let outcome = progress.save(key(), ProgressUpdate::time_only(1800)).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Created);
        let stored = progress.load(key()).await.unwrap().unwrap();
        assert_eq!(stored.remaining_time_seconds, Some(1800));
    }

    #[tokio::test]
    async fn reordered_saves_keep_the_smaller_time() {
        let repo = InMemoryRepository::new();
        let progress = client(&repo);
        progress.save(key(), ProgressUpdate::time_only(900)).await.unwrap();

        // 850 was sent first but 800 landed first.
        progress.save(key(), ProgressUpdate::time_only(800)).await.unwrap();
        let late = progress.save(key(), ProgressUpdate::time_only(850)).await.unwrap();
        assert_eq!(late, SaveOutcome::Unchanged);

        let stored = progress.load(key()).await.unwrap().unwrap();
        assert_eq!(stored.remaining_time_seconds, Some(800));
    }

    #[tokio::test]
    async fn overlapping_saves_keep_the_smaller_time() {
        let repo = InMemoryRepository::new();
        client(&repo).save(key(), ProgressUpdate::time_only(900)).await.unwrap();

        let slow = ProgressStoreClient::new(
            fixed_clock(),
            Arc::new(SlowReads {
                inner: repo.clone(),
                barrier: Barrier::new(2),
            }),
        );
        let (later, earlier) = tokio::join!(
            slow.save(key(), ProgressUpdate::time_only(850)),
            slow.save(key(), ProgressUpdate::time_only(800)),
        );

        assert_eq!(earlier.unwrap(), SaveOutcome::Updated { time_accepted: true });
        assert!(matches!(
            later.unwrap(),
            SaveOutcome::Updated { time_accepted: true } | SaveOutcome::Unchanged
        ));
        let stored = client(&repo).load(key()).await.unwrap().unwrap();
        assert_eq!(stored.remaining_time_seconds, Some(800));
    }

    #[tokio::test]
    async fn stale_time_still_updates_part_and_audio() {
        let repo = InMemoryRepository::new();
        let progress = client(&repo);
        progress.save(key(), ProgressUpdate::time_only(500)).await.unwrap();
        let outcome = progress
            .save(
                key(),
                ProgressUpdate {
                    remaining_time_seconds: 510,
                    remaining_audio_seconds: Some(42),
                    current_part: Some(3),
                    remaining_review_seconds: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Updated { time_accepted: false });

        let stored = progress.load(key()).await.unwrap().unwrap();
        assert_eq!(stored.remaining_time_seconds, Some(500));
        assert_eq!(stored.remaining_audio_seconds, Some(42));
        assert_eq!(stored.current_part, Some(3));
    }

    #[tokio::test]
    async fn group_scoped_checkpoints_are_independent() {
        let repo = InMemoryRepository::new();
        let progress = client(&repo);
        let grouped = CheckpointKey::new(TestId::new(1), StudentId::new(2), Some(TestGroupId::new(9)));
        progress.save(key(), ProgressUpdate::time_only(100)).await.unwrap();
        progress.save(grouped, ProgressUpdate::time_only(700)).await.unwrap();

        assert!(progress.clear(key()).await.unwrap());
        assert!(!progress.clear(key()).await.unwrap());
        let left = progress.load(grouped).await.unwrap().unwrap();
        assert_eq!(left.remaining_time_seconds, Some(700));
    }

    #[tokio::test]
    async fn detached_save_lands_eventually() {
        let repo = InMemoryRepository::new();
        let progress = client(&repo);
        progress.save_detached(key(), ProgressUpdate::time_only(300));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let stored = progress.load(key()).await.unwrap().unwrap();
        assert_eq!(stored.remaining_time_seconds, Some(300));
    }
}
