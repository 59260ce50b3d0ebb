use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS tests (
            id INTEGER PRIMARY KEY,
            skill TEXT NOT NULL,
            body TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS test_groups (
            id INTEGER PRIMARY KEY,
            test_ids TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS progress_checkpoints (
            test_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            test_group_id INTEGER,
            remaining_time INTEGER CHECK (remaining_time >= 0),
            remaining_audio INTEGER CHECK (remaining_audio >= 0),
            current_part INTEGER CHECK (current_part >= 0),
            remaining_review INTEGER CHECK (remaining_review >= 0),
            updated_at TEXT NOT NULL
        );
    ",
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_progress_checkpoints_key
            ON progress_checkpoints (test_id, student_id, IFNULL(test_group_id, -1));
    ",
    r"
        CREATE TABLE IF NOT EXISTS answers (
            test_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            test_group_id INTEGER,
            attempt_number INTEGER NOT NULL CHECK (attempt_number > 0),
            question_id TEXT NOT NULL,
            value TEXT NOT NULL,
            attachment_ref TEXT,
            text_payload TEXT,
            updated_at TEXT NOT NULL
        );
    ",
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_answers_key
            ON answers (test_id, student_id, IFNULL(test_group_id, -1), attempt_number, question_id);
    ",
    r"
        CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY,
            reference TEXT NOT NULL UNIQUE,
            content_type TEXT NOT NULL,
            bytes BLOB NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY,
            test_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            test_group_id INTEGER,
            attempt_number INTEGER NOT NULL CHECK (attempt_number > 0),
            time_spent INTEGER NOT NULL CHECK (time_spent >= 0),
            test_type TEXT NOT NULL,
            submitted_at TEXT NOT NULL
        );
    ",
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_number
            ON attempts (test_id, student_id, attempt_number, IFNULL(test_group_id, -1));
    ",
];

/// Runs the consolidated schema migration.
///
/// Creates tests, batteries, checkpoints, answers, attachments and attempts.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(version = 1, "applied sqlite schema migration");
    }

    Ok(())
}
