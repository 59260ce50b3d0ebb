use exam_core::model::{TestDefinition, TestGroup, TestGroupId, TestId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_to_i64, ser};
use crate::repository::{StorageError, TestRepository};

#[async_trait::async_trait]
impl TestRepository for SqliteRepository {
    async fn get_test(&self, id: TestId) -> Result<TestDefinition, StorageError> {
        let row = sqlx::query("SELECT body FROM tests WHERE id = ?1")
            .bind(id_to_i64("test_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;

        let body: String = row.try_get("body").map_err(ser)?;
        let test: TestDefinition = serde_json::from_str(&body).map_err(ser)?;
        test.validate().map_err(ser)?;
        Ok(test)
    }

    async fn upsert_test(&self, test: &TestDefinition) -> Result<(), StorageError> {
        let body = serde_json::to_string(test).map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO tests (id, skill, body)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                skill = excluded.skill,
                body = excluded.body
            ",
        )
        .bind(id_to_i64("test_id", test.id().value())?)
        .bind(test.skill().as_str())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_test_group(&self, id: TestGroupId) -> Result<TestGroup, StorageError> {
        let row = sqlx::query("SELECT test_ids FROM test_groups WHERE id = ?1")
            .bind(id_to_i64("test_group_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;

        let raw: String = row.try_get("test_ids").map_err(ser)?;
        let tests: Vec<TestId> = serde_json::from_str(&raw).map_err(ser)?;
        Ok(TestGroup { id, tests })
    }

    async fn upsert_test_group(&self, group: &TestGroup) -> Result<(), StorageError> {
        let test_ids = serde_json::to_string(&group.tests).map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO test_groups (id, test_ids)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET test_ids = excluded.test_ids
            ",
        )
        .bind(id_to_i64("test_group_id", group.id.value())?)
        .bind(test_ids)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
