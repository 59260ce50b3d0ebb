use exam_core::model::{
    AnswerValue, AttemptKey, CheckpointKey, CheckpointPatch, NewAttempt, Part, ProgressCheckpoint,
    ProgressUpdate, Question, QuestionGroup, QuestionId, QuestionKind, Recording, SkillKind,
    StudentId, TestDefinition, TestGroup, TestGroupId, TestId,
};
use exam_core::time::fixed_now;
use storage::repository::{
    AnswerRecord, AnswerRepository, AttachmentStore, AttemptRepository, ProgressRepository,
    StorageError, TestRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn reading_test() -> TestDefinition {
    TestDefinition::new(
        TestId::new(1),
        "Academic Reading 1",
        SkillKind::Reading,
        3600,
        vec![Part {
            title: "Passage 1".into(),
            groups: vec![QuestionGroup {
                instructions: Some("Choose the correct letter".into()),
                questions: vec![
                    Question {
                        id: QuestionId::new("Q1"),
                        number: 1,
                        kind: QuestionKind::MultipleChoice,
                    },
                    Question {
                        id: QuestionId::new("Q2"),
                        number: 2,
                        kind: QuestionKind::GapFill,
                    },
                ],
            }],
        }],
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn sqlite_stores_tests_and_groups() {
    let repo = connect("memdb_tests").await;
    let test = reading_test();
    repo.upsert_test(&test).await.unwrap();
    assert_eq!(repo.get_test(TestId::new(1)).await.unwrap(), test);
    assert!(matches!(
        repo.get_test(TestId::new(2)).await,
        Err(StorageError::NotFound)
    ));

    let group = TestGroup {
        id: TestGroupId::new(5),
        tests: vec![TestId::new(1), TestId::new(2)],
    };
    repo.upsert_test_group(&group).await.unwrap();
    assert_eq!(repo.get_test_group(TestGroupId::new(5)).await.unwrap(), group);
}

#[tokio::test]
async fn sqlite_checkpoint_lifecycle_with_and_without_group() {
    let repo = connect("memdb_checkpoints").await;
    let plain = CheckpointKey::new(TestId::new(1), StudentId::new(2), None);
    let grouped = CheckpointKey::new(TestId::new(1), StudentId::new(2), Some(TestGroupId::new(3)));

    repo.insert_checkpoint(&ProgressCheckpoint::create(
        plain,
        ProgressUpdate::time_only(900),
        fixed_now(),
    ))
    .await
    .unwrap();
    repo.insert_checkpoint(&ProgressCheckpoint::create(
        grouped,
        ProgressUpdate::time_only(1200),
        fixed_now(),
    ))
    .await
    .unwrap();

    let dup = repo
        .insert_checkpoint(&ProgressCheckpoint::create(
            plain,
            ProgressUpdate::time_only(100),
            fixed_now(),
        ))
        .await;
    assert!(matches!(dup, Err(StorageError::Conflict)));

    repo.update_checkpoint(
        plain,
        CheckpointPatch {
            remaining_audio_seconds: Some(240),
            ..CheckpointPatch::default()
        },
        fixed_now(),
    )
    .await
    .unwrap();

    let stored = repo.get_checkpoint(plain).await.unwrap().unwrap();
    assert_eq!(stored.remaining_time_seconds, Some(900));
    assert_eq!(stored.remaining_audio_seconds, Some(240));

    let other = repo.get_checkpoint(grouped).await.unwrap().unwrap();
    assert_eq!(other.remaining_time_seconds, Some(1200));

    assert!(repo.delete_checkpoint(plain).await.unwrap());
    assert!(repo.get_checkpoint(plain).await.unwrap().is_none());
    assert!(repo.get_checkpoint(grouped).await.unwrap().is_some());

    let missing = repo
        .update_checkpoint(plain, CheckpointPatch::default(), fixed_now())
        .await;
    assert!(matches!(missing, Err(StorageError::NotFound)));
}

#[tokio::test]
async fn sqlite_overlapping_checkpoint_saves_keep_smaller_time() {
    let repo = connect("memdb_checkpoint_overlap").await;
    let key = CheckpointKey::new(TestId::new(1), StudentId::new(2), None);
    repo.insert_checkpoint(&ProgressCheckpoint::create(
        key,
        ProgressUpdate::time_only(900),
        fixed_now(),
    ))
    .await
    .unwrap();

    // Two savers read 900 before either writes; the smaller value lands first.
    let read = repo.get_checkpoint(key).await.unwrap().unwrap();
    let slow = read.plan_update(&ProgressUpdate::time_only(850));
    let fast = read.plan_update(&ProgressUpdate {
        remaining_time_seconds: 800,
        remaining_audio_seconds: None,
        current_part: Some(2),
        remaining_review_seconds: None,
    });
    assert!(repo.update_checkpoint(key, fast, fixed_now()).await.unwrap());
    assert!(!repo.update_checkpoint(key, slow, fixed_now()).await.unwrap());

    let stored = repo.get_checkpoint(key).await.unwrap().unwrap();
    assert_eq!(stored.remaining_time_seconds, Some(800));
    assert_eq!(stored.current_part, Some(2));

    // A stale time does not block the other fields.
    let audio = read.plan_update(&ProgressUpdate {
        remaining_time_seconds: 820,
        remaining_audio_seconds: Some(30),
        current_part: None,
        remaining_review_seconds: None,
    });
    assert!(!repo.update_checkpoint(key, audio, fixed_now()).await.unwrap());
    let stored = repo.get_checkpoint(key).await.unwrap().unwrap();
    assert_eq!(stored.remaining_time_seconds, Some(800));
    assert_eq!(stored.remaining_audio_seconds, Some(30));
}

#[tokio::test]
async fn sqlite_answers_upsert_and_attachments() {
    let repo = connect("memdb_answers").await;
    let key = AttemptKey {
        test_id: TestId::new(1),
        student_id: StudentId::new(2),
        attempt_number: 1,
        test_group_id: None,
    };

    for value in ["B", "C"] {
        let record =
            AnswerRecord::from_value(key, QuestionId::new("Q7"), AnswerValue::text(value), fixed_now())
                .unwrap();
        repo.upsert_answer(&record).await.unwrap();
    }

    let recording = Recording::new("audio/webm", vec![0, 1, 2, 3]).unwrap();
    let reference = repo.upload(&recording).await.unwrap();
    let spoken = AnswerRecord::from_value(
        key,
        QuestionId::new("S1"),
        AnswerValue::Attachment(reference.clone()),
        fixed_now(),
    )
    .unwrap();
    repo.upsert_answer(&spoken).await.unwrap();

    let stored = repo.list_answers(key).await.unwrap();
    assert_eq!(stored.len(), 2);
    let q7 = stored.iter().find(|r| r.question_id.as_str() == "Q7").unwrap();
    assert_eq!(q7.value, AnswerValue::text("C"));
    assert_eq!(q7.text.as_deref(), Some("C"));
    let s1 = stored.iter().find(|r| r.question_id.as_str() == "S1").unwrap();
    assert_eq!(s1.attachment.as_ref(), Some(&reference));

    assert_eq!(repo.get_attachment(&reference).await.unwrap(), recording);
}

#[tokio::test]
async fn sqlite_answers_are_scoped_by_battery() {
    let repo = connect("memdb_answers_battery").await;
    let standalone = AttemptKey {
        test_id: TestId::new(1),
        student_id: StudentId::new(2),
        attempt_number: 1,
        test_group_id: None,
    };
    let grouped = AttemptKey {
        test_group_id: Some(TestGroupId::new(9)),
        ..standalone
    };

    for (key, value) in [(standalone, "old"), (grouped, "new"), (grouped, "newer")] {
        let record =
            AnswerRecord::from_value(key, QuestionId::new("Q1"), AnswerValue::text(value), fixed_now())
                .unwrap();
        repo.upsert_answer(&record).await.unwrap();
    }

    let old = repo.list_answers(standalone).await.unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].value, AnswerValue::text("old"));
    let new = repo.list_answers(grouped).await.unwrap();
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].value, AnswerValue::text("newer"));
    assert_eq!(new[0].key, grouped);
}

#[tokio::test]
async fn sqlite_attempts_are_unique_and_counted() {
    let repo = connect("memdb_attempts").await;
    let attempt = NewAttempt {
        test_id: TestId::new(1),
        student_id: StudentId::new(2),
        attempt_number: 1,
        time_spent_seconds: 1500,
        test_type: SkillKind::Listening,
        test_group_id: None,
    };

    let created = repo.create_attempt(&attempt, fixed_now()).await.unwrap();
    assert_eq!(created.attempt, attempt);
    assert!(matches!(
        repo.create_attempt(&attempt, fixed_now()).await,
        Err(StorageError::Conflict)
    ));

    let count = repo
        .count_attempts(TestId::new(1), StudentId::new(2), None)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let listed = repo
        .list_attempts(TestId::new(1), StudentId::new(2))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].attempt.test_type, SkillKind::Listening);
    assert_eq!(listed[0].attempt.time_spent_seconds, 1500);
}
