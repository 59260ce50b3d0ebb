use chrono::{DateTime, Utc};
use exam_core::model::{CheckpointKey, CheckpointPatch, ProgressCheckpoint};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{conn, group_id_to_i64, id_to_i64, opt_u32_from_i64, ser};
use crate::repository::{ProgressRepository, StorageError};

struct KeyParams {
    test_id: i64,
    student_id: i64,
    test_group_id: Option<i64>,
}

fn key_params(key: CheckpointKey) -> Result<KeyParams, StorageError> {
    Ok(KeyParams {
        test_id: id_to_i64("test_id", key.test_id.value())?,
        student_id: id_to_i64("student_id", key.student_id.value())?,
        test_group_id: group_id_to_i64(key.test_group_id)?,
    })
}

fn map_checkpoint_row(
    key: CheckpointKey,
    row: &SqliteRow,
) -> Result<ProgressCheckpoint, StorageError> {
    Ok(ProgressCheckpoint {
        key,
        remaining_time_seconds: opt_u32_from_i64(
            "remaining_time",
            row.try_get("remaining_time").map_err(ser)?,
        )?,
        remaining_audio_seconds: opt_u32_from_i64(
            "remaining_audio",
            row.try_get("remaining_audio").map_err(ser)?,
        )?,
        current_part: opt_u32_from_i64("current_part", row.try_get("current_part").map_err(ser)?)?,
        remaining_review_seconds: opt_u32_from_i64(
            "remaining_review",
            row.try_get("remaining_review").map_err(ser)?,
        )?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_checkpoint(
        &self,
        key: CheckpointKey,
    ) -> Result<Option<ProgressCheckpoint>, StorageError> {
        let p = key_params(key)?;
        // `IS` compares NULL group ids as equal.
        let row = sqlx::query(
            r"
            SELECT remaining_time, remaining_audio, current_part, remaining_review, updated_at
            FROM progress_checkpoints
            WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
            ",
        )
        .bind(p.test_id)
        .bind(p.student_id)
        .bind(p.test_group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|row| map_checkpoint_row(key, &row)).transpose()
    }

    async fn insert_checkpoint(&self, checkpoint: &ProgressCheckpoint) -> Result<(), StorageError> {
        let p = key_params(checkpoint.key)?;
        let res = sqlx::query(
            r"
            INSERT INTO progress_checkpoints (
                test_id, student_id, test_group_id,
                remaining_time, remaining_audio, current_part, remaining_review, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(p.test_id)
        .bind(p.student_id)
        .bind(p.test_group_id)
        .bind(checkpoint.remaining_time_seconds.map(i64::from))
        .bind(checkpoint.remaining_audio_seconds.map(i64::from))
        .bind(checkpoint.current_part.map(i64::from))
        .bind(checkpoint.remaining_review_seconds.map(i64::from))
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Conflict)
            }
            Err(e) => Err(conn(e)),
        }
    }

    async fn update_checkpoint(
        &self,
        key: CheckpointKey,
        patch: CheckpointPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let p = key_params(key)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
            UPDATE progress_checkpoints SET
                remaining_audio = COALESCE(?4, remaining_audio),
                current_part = COALESCE(?5, current_part),
                remaining_review = COALESCE(?6, remaining_review),
                updated_at = CASE WHEN ?4 IS NULL AND ?5 IS NULL AND ?6 IS NULL
                    THEN updated_at ELSE ?7 END
            WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
            ",
        )
        .bind(p.test_id)
        .bind(p.student_id)
        .bind(p.test_group_id)
        .bind(patch.remaining_audio_seconds.map(i64::from))
        .bind(patch.current_part.map(i64::from))
        .bind(patch.remaining_review_seconds.map(i64::from))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let mut time_written = false;
        if let Some(remaining) = patch.remaining_time_seconds {
            // The patch may come from an older read; compare at write time.
            let res = sqlx::query(
                r"
                UPDATE progress_checkpoints SET
                    remaining_time = ?4,
                    updated_at = ?5
                WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
                    AND (remaining_time IS NULL OR ?4 < remaining_time)
                ",
            )
            .bind(p.test_id)
            .bind(p.student_id)
            .bind(p.test_group_id)
            .bind(i64::from(remaining))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            time_written = res.rows_affected() > 0;
        }

        tx.commit().await.map_err(conn)?;
        Ok(time_written)
    }

    async fn delete_checkpoint(&self, key: CheckpointKey) -> Result<bool, StorageError> {
        let p = key_params(key)?;
        let res = sqlx::query(
            r"
            DELETE FROM progress_checkpoints
            WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
            ",
        )
        .bind(p.test_id)
        .bind(p.student_id)
        .bind(p.test_group_id)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }
}
