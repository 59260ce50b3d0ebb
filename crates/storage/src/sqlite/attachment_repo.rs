use chrono::Utc;
use exam_core::model::{AttachmentRef, Recording};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, ser};
use crate::repository::{AttachmentStore, StorageError};

impl SqliteRepository {
    /// Load an uploaded recording back by reference.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown references.
    pub async fn get_attachment(&self, reference: &AttachmentRef) -> Result<Recording, StorageError> {
        let row = sqlx::query("SELECT content_type, bytes FROM attachments WHERE reference = ?1")
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;

        let content_type: String = row.try_get("content_type").map_err(ser)?;
        let bytes: Vec<u8> = row.try_get("bytes").map_err(ser)?;
        Recording::new(content_type, bytes).map_err(ser)
    }
}

#[async_trait::async_trait]
impl AttachmentStore for SqliteRepository {
    async fn upload(&self, recording: &Recording) -> Result<AttachmentRef, StorageError> {
        let reference =
            AttachmentRef::new(format!("sqlite://attachments/{}", uuid::Uuid::new_v4()))
                .map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO attachments (reference, content_type, bytes, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(reference.as_str())
        .bind(recording.content_type())
        .bind(recording.bytes())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(reference)
    }
}
