use exam_core::model::{AnswerValue, AttachmentRef, AttemptKey, QuestionId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, group_id_to_i64, id_to_i64, ser};
use crate::repository::{AnswerRecord, AnswerRepository, StorageError};

fn map_answer_row(key: AttemptKey, row: &sqlx::sqlite::SqliteRow) -> Result<AnswerRecord, StorageError> {
    let question_id: String = row.try_get("question_id").map_err(ser)?;
    let raw_value: String = row.try_get("value").map_err(ser)?;
    let value: AnswerValue = serde_json::from_str(&raw_value).map_err(ser)?;
    let attachment = row
        .try_get::<Option<String>, _>("attachment_ref")
        .map_err(ser)?
        .map(AttachmentRef::new)
        .transpose()
        .map_err(ser)?;

    Ok(AnswerRecord {
        key,
        question_id: QuestionId::new(question_id),
        value,
        attachment,
        text: row.try_get("text_payload").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl AnswerRepository for SqliteRepository {
    async fn upsert_answer(&self, answer: &AnswerRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(&answer.value).map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO answers (
                test_id, student_id, test_group_id, attempt_number, question_id,
                value, attachment_ref, text_payload, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            -- idx_answers_key is the only unique index on answers
            ON CONFLICT DO UPDATE SET
                value = excluded.value,
                attachment_ref = excluded.attachment_ref,
                text_payload = excluded.text_payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(id_to_i64("test_id", answer.key.test_id.value())?)
        .bind(id_to_i64("student_id", answer.key.student_id.value())?)
        .bind(group_id_to_i64(answer.key.test_group_id)?)
        .bind(i64::from(answer.key.attempt_number))
        .bind(answer.question_id.as_str())
        .bind(value)
        .bind(answer.attachment.as_ref().map(AttachmentRef::as_str))
        .bind(answer.text.as_deref())
        .bind(answer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn list_answers(&self, key: AttemptKey) -> Result<Vec<AnswerRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT question_id, value, attachment_ref, text_payload, updated_at
            FROM answers
            WHERE test_id = ?1 AND student_id = ?2 AND test_group_id IS ?3
                AND attempt_number = ?4
            ORDER BY question_id ASC
            ",
        )
        .bind(id_to_i64("test_id", key.test_id.value())?)
        .bind(id_to_i64("student_id", key.student_id.value())?)
        .bind(group_id_to_i64(key.test_group_id)?)
        .bind(i64::from(key.attempt_number))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(|row| map_answer_row(key, row)).collect()
    }
}
