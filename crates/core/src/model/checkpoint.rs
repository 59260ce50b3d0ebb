use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{StudentId, TestGroupId, TestId};

/// Address of the single live checkpoint for an in-progress attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub test_id: TestId,
    pub student_id: StudentId,
    pub test_group_id: Option<TestGroupId>,
}

impl CheckpointKey {
    #[must_use]
    pub fn new(test_id: TestId, student_id: StudentId, test_group_id: Option<TestGroupId>) -> Self {
        Self {
            test_id,
            student_id,
            test_group_id,
        }
    }
}

/// Values a caller wants to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub remaining_time_seconds: u32,
    pub remaining_audio_seconds: Option<u32>,
    pub current_part: Option<u32>,
    /// Seconds left in the listening review window once it has opened.
    pub remaining_review_seconds: Option<u32>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn time_only(remaining_time_seconds: u32) -> Self {
        Self {
            remaining_time_seconds,
            remaining_audio_seconds: None,
            current_part: None,
            remaining_review_seconds: None,
        }
    }
}

/// Field-level changes to write to an existing checkpoint. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointPatch {
    pub remaining_time_seconds: Option<u32>,
    pub remaining_audio_seconds: Option<u32>,
    pub current_part: Option<u32>,
    pub remaining_review_seconds: Option<u32>,
}

impl CheckpointPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining_time_seconds.is_none() && !self.touches_other_fields()
    }

    /// Whether anything besides the remaining time is set.
    #[must_use]
    pub fn touches_other_fields(&self) -> bool {
        self.remaining_audio_seconds.is_some()
            || self.current_part.is_some()
            || self.remaining_review_seconds.is_some()
    }
}

/// Resumable snapshot of an unsubmitted attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub key: CheckpointKey,
    pub remaining_time_seconds: Option<u32>,
    pub remaining_audio_seconds: Option<u32>,
    pub current_part: Option<u32>,
    pub remaining_review_seconds: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressCheckpoint {
    /// First write for a key. Creation is the only time remaining time may be
    /// set without comparing against a stored value.
    #[must_use]
    pub fn create(key: CheckpointKey, update: ProgressUpdate, now: DateTime<Utc>) -> Self {
        Self {
            key,
            remaining_time_seconds: Some(update.remaining_time_seconds),
            remaining_audio_seconds: update.remaining_audio_seconds,
            current_part: update.current_part,
            remaining_review_seconds: update.remaining_review_seconds,
            updated_at: now,
        }
    }

    /// Work out which fields `update` is allowed to change.
    ///
    /// Remaining time only ever decreases: a value that is not strictly smaller
    /// than the stored one is dropped. Audio position, part and review window
    /// are taken as-is whenever provided.
    #[must_use]
    pub fn plan_update(&self, update: &ProgressUpdate) -> CheckpointPatch {
        let remaining_time_seconds = match self.remaining_time_seconds {
            Some(stored) if update.remaining_time_seconds >= stored => None,
            _ => Some(update.remaining_time_seconds),
        };
        CheckpointPatch {
            remaining_time_seconds,
            remaining_audio_seconds: update.remaining_audio_seconds,
            current_part: update.current_part,
            remaining_review_seconds: update.remaining_review_seconds,
        }
    }

    /// Write `patch`, re-checking the remaining time against the stored value.
    ///
    /// The patch may have been planned from an older read, so a time that is
    /// no longer strictly smaller is dropped here too. Returns whether the
    /// remaining time was written.
    pub fn apply(&mut self, patch: CheckpointPatch, now: DateTime<Utc>) -> bool {
        let time_written = match (patch.remaining_time_seconds, self.remaining_time_seconds) {
            (Some(offered), Some(stored)) if offered >= stored => false,
            (Some(offered), _) => {
                self.remaining_time_seconds = Some(offered);
                true
            }
            (None, _) => false,
        };
        if let Some(a) = patch.remaining_audio_seconds {
            self.remaining_audio_seconds = Some(a);
        }
        if let Some(p) = patch.current_part {
            self.current_part = Some(p);
        }
        if let Some(r) = patch.remaining_review_seconds {
            self.remaining_review_seconds = Some(r);
        }
        if time_written || patch.touches_other_fields() {
            self.updated_at = now;
        }
        time_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn key() -> CheckpointKey {
        CheckpointKey::new(TestId::new(1), StudentId::new(2), None)
    }

    #[test]
    fn stored_time_is_minimum_of_all_saves() {
        let saves = [1800, 1750, 1790, 1700, 1700, 1799, 1650];
        let mut cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(saves[0]), fixed_now());
        let mut expected = saves[0];
        for value in &saves[1..] {
            let patch = cp.plan_update(&ProgressUpdate::time_only(*value));
            cp.apply(patch, fixed_now());
            expected = expected.min(*value);
            assert_eq!(cp.remaining_time_seconds, Some(expected));
        }
    }

    #[test]
    fn out_of_order_larger_value_is_ignored() {
        let mut cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(800), fixed_now());
        let patch = cp.plan_update(&ProgressUpdate::time_only(850));
        assert!(patch.remaining_time_seconds.is_none());
        assert!(!cp.apply(patch, fixed_now()));
        assert_eq!(cp.remaining_time_seconds, Some(800));
    }

    #[test]
    fn absent_stored_time_accepts_any_value() {
        let mut cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(10), fixed_now());
        cp.remaining_time_seconds = None;
        let patch = cp.plan_update(&ProgressUpdate::time_only(1200));
        assert_eq!(patch.remaining_time_seconds, Some(1200));
    }

    #[test]
    fn audio_and_part_update_even_when_time_is_stale() {
        let cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(500), fixed_now());
        let patch = cp.plan_update(&ProgressUpdate {
            remaining_time_seconds: 600,
            remaining_audio_seconds: Some(90),
            current_part: Some(2),
            remaining_review_seconds: None,
        });
        assert_eq!(patch.remaining_time_seconds, None);
        assert_eq!(patch.remaining_audio_seconds, Some(90));
        assert_eq!(patch.current_part, Some(2));
    }

    #[test]
    fn apply_rejects_patch_planned_from_stale_read() {
        let mut cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(900), fixed_now());
        let slow = cp.plan_update(&ProgressUpdate::time_only(850));
        let fast = cp.plan_update(&ProgressUpdate::time_only(800));

        assert!(cp.apply(fast, fixed_now()));
        let later = fixed_now() + chrono::Duration::seconds(5);
        assert!(!cp.apply(slow, later));
        assert_eq!(cp.remaining_time_seconds, Some(800));
        assert_eq!(cp.updated_at, fixed_now());
    }

    #[test]
    fn empty_patch_keeps_timestamp() {
        let mut cp = ProgressCheckpoint::create(key(), ProgressUpdate::time_only(500), fixed_now());
        let later = fixed_now() + chrono::Duration::seconds(30);
        assert!(!cp.apply(CheckpointPatch::default(), later));
        assert_eq!(cp.updated_at, fixed_now());
    }
}
