mod support;

use std::time::Duration;

use exam_core::model::{AnswerValue, AttemptKey};
use exam_core::time::fixed_clock;
use services::driver::{self, SessionExit};
use services::{RuntimeConfig, SessionError, SessionParams, SessionRuntime, SubmitOutcome};
use storage::Storage;
use storage::repository::{AnswerRepository, InMemoryRepository, ProgressRepository};
use support::{Completions, READING, STUDENT, qid, seeded_repo};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn runtime(repo: &InMemoryRepository) -> SessionRuntime {
    SessionRuntime::start(
        &Storage::from_repo(repo.clone()),
        fixed_clock(),
        RuntimeConfig::default(),
        SessionParams::new(READING, STUDENT),
        None,
    )
    .await
    .unwrap()
}

fn attempt_one() -> AttemptKey {
    AttemptKey {
        test_id: READING,
        student_id: STUDENT,
        attempt_number: 1,
        test_group_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn loop_ticks_once_per_second() {
    init_tracing();
    let repo = seeded_repo().await;
    let (handle, _task) = driver::spawn(runtime(&repo).await);
    assert_eq!(handle.time_remaining(), 1800);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(handle.time_remaining(), 1797);
    assert_eq!(handle.current_part(), 0);
}

#[tokio::test(start_paused = true)]
async fn host_edits_are_debounced_and_submitted() {
    init_tracing();
    let repo = seeded_repo().await;
    let mut session = runtime(&repo).await;
    let completions = Completions::default();
    session.on_complete(completions.hook());
    let (handle, task) = driver::spawn(session);

    handle
        .on_answer_change(qid("R1"), AnswerValue::text("A"), None)
        .await
        .unwrap();
    handle
        .on_answer_change(qid("R1"), AnswerValue::text("C"), None)
        .await
        .unwrap();
    assert_eq!(handle.snapshot().pending_answers, 1);

    tokio::time::sleep(Duration::from_millis(2200)).await;
    let stored = repo.list_answers(attempt_one()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, AnswerValue::text("C"));

    let outcome = handle.submit().await.unwrap();
    let SubmitOutcome::Submitted(result) = outcome else {
        panic!("expected a stored result, got {outcome:?}");
    };
    assert_eq!(result.attempt.time_spent_seconds, 2);
    assert_eq!(task.await.unwrap(), SessionExit::Finished);
    assert_eq!(completions.all().len(), 1);

    assert!(matches!(handle.submit().await, Err(SessionError::Detached)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_submits_store_one_result() {
    let repo = seeded_repo().await;
    let (handle, task) = driver::spawn(runtime(&repo).await);
    let other = handle.clone();

    let (a, b) = tokio::join!(handle.submit(), other.submit());
    let stored = [a, b]
        .iter()
        .filter(|r| matches!(r, Ok(SubmitOutcome::Submitted(_))))
        .count();

    assert_eq!(stored, 1);
    assert_eq!(repo.attempts().unwrap().len(), 1);
    assert_eq!(task.await.unwrap(), SessionExit::Finished);
}

#[tokio::test(start_paused = true)]
async fn dropping_handles_detaches_with_final_save() {
    let repo = seeded_repo().await;
    let (handle, task) = driver::spawn(runtime(&repo).await);
    handle
        .on_answer_change(qid("R3"), AnswerValue::text("TRUE"), None)
        .await
        .unwrap();
    drop(handle);

    let SessionExit::Detached(report) = task.await.unwrap() else {
        panic!("session should detach");
    };
    assert_eq!(report.saved, 1);
    assert_eq!(repo.list_answers(attempt_one()).await.unwrap().len(), 1);
    let key = SessionParams::new(READING, STUDENT).checkpoint_key();
    assert!(repo.get_checkpoint(key).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn time_out_submits_through_the_loop() {
    let repo = InMemoryRepository::new();
    let short = exam_core::model::TestDefinition::new(
        READING,
        "Sprint",
        exam_core::model::SkillKind::Reading,
        2,
        support::reading_test().parts().to_vec(),
        None,
    )
    .unwrap();
    storage::repository::TestRepository::upsert_test(&repo, &short)
        .await
        .unwrap();

    let (handle, task) = driver::spawn(runtime(&repo).await);
    let mut updates = handle.subscribe();
    assert_eq!(task.await.unwrap(), SessionExit::Finished);
    updates.changed().await.unwrap();
    assert!(updates.borrow().is_submitting);
    assert_eq!(updates.borrow().time_remaining, 0);
    assert_eq!(repo.attempts().unwrap()[0].attempt.time_spent_seconds, 2);
}
