use chrono::{DateTime, Utc};
use exam_core::model::{AttemptResult, NewAttempt, ResultId, StudentId, TestGroupId, TestId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    conn, group_id_from_i64, group_id_to_i64, id_to_i64, ser, student_id_from_i64,
    test_id_from_i64, u32_from_i64,
};
use crate::repository::{AttemptRepository, StorageError};

impl SqliteRepository {
    /// Results for a test/student pair, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on query or mapping failures.
    pub async fn list_attempts(
        &self,
        test_id: TestId,
        student_id: StudentId,
    ) -> Result<Vec<AttemptResult>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, test_id, student_id, test_group_id, attempt_number,
                   time_spent, test_type, submitted_at
            FROM attempts
            WHERE test_id = ?1 AND student_id = ?2
            ORDER BY id ASC
            ",
        )
        .bind(id_to_i64("test_id", test_id.value())?)
        .bind(id_to_i64("student_id", student_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_attempt_row).collect()
    }
}

fn map_attempt_row(row: &sqlx::sqlite::SqliteRow) -> Result<AttemptResult, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    let test_type: String = row.try_get("test_type").map_err(ser)?;
    Ok(AttemptResult {
        id: ResultId::new(u64::try_from(id).map_err(ser)?),
        attempt: NewAttempt {
            test_id: test_id_from_i64(row.try_get("test_id").map_err(ser)?)?,
            student_id: student_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
            attempt_number: u32_from_i64(
                "attempt_number",
                row.try_get("attempt_number").map_err(ser)?,
            )?,
            time_spent_seconds: u32_from_i64("time_spent", row.try_get("time_spent").map_err(ser)?)?,
            test_type: test_type.parse().map_err(ser)?,
            test_group_id: group_id_from_i64(row.try_get("test_group_id").map_err(ser)?)?,
        },
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn create_attempt(
        &self,
        attempt: &NewAttempt,
        submitted_at: DateTime<Utc>,
    ) -> Result<AttemptResult, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO attempts (
                test_id, student_id, test_group_id, attempt_number,
                time_spent, test_type, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(id_to_i64("test_id", attempt.test_id.value())?)
        .bind(id_to_i64("student_id", attempt.student_id.value())?)
        .bind(group_id_to_i64(attempt.test_group_id)?)
        .bind(i64::from(attempt.attempt_number))
        .bind(i64::from(attempt.time_spent_seconds))
        .bind(attempt.test_type.as_str())
        .bind(submitted_at)
        .execute(&self.pool)
        .await;

        let res = match res {
            Ok(res) => res,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StorageError::Conflict);
            }
            Err(e) => return Err(conn(e)),
        };

        let id = u64::try_from(res.last_insert_rowid()).map_err(ser)?;
        Ok(AttemptResult {
            id: ResultId::new(id),
            attempt: attempt.clone(),
            submitted_at,
        })
    }

    async fn count_attempts(
        &self,
        test_id: TestId,
        student_id: StudentId,
        test_group_id: Option<TestGroupId>,
    ) -> Result<u32, StorageError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS n FROM attempts
            WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
            ",
        )
        .bind(id_to_i64("test_id", test_id.value())?)
        .bind(id_to_i64("student_id", student_id.value())?)
        .bind(group_id_to_i64(test_group_id)?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        u32_from_i64("count", row.try_get("n").map_err(ser)?)
    }
}
