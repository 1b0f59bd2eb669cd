use std::sync::Arc;

use turkbridge_core::config::SyncConfig;
use turkbridge_core::marketplace::InMemoryMarketplace;
use turkbridge_core::models::{CoreErrorKind, TaskId, TaskStatus};
use turkbridge_core::persistence::{SqlStatement, TabularStore, TaskIntake};
use turkbridge_core::sqlite::SqliteStore;
use turkbridge_core::sync::TaskSynchronizer;

struct Harness {
    store: Arc<SqliteStore>,
    marketplace: Arc<InMemoryMarketplace>,
    synchronizer: TaskSynchronizer,
}

fn harness() -> Harness {
    harness_with_config(SyncConfig::default())
}

fn harness_with_config(config: SyncConfig) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.migrate_to_latest().unwrap();
    let marketplace = Arc::new(InMemoryMarketplace::with_preview_base_url("http://x"));
    let synchronizer = TaskSynchronizer::new(store.clone(), marketplace.clone(), config);
    Harness {
        store,
        marketplace,
        synchronizer,
    }
}

fn status_of(store: &SqliteStore, id: &str) -> TaskStatus {
    store.task(&TaskId::from(id)).unwrap().unwrap().status
}

#[test]
fn posting_moves_init_task_to_posted_with_encoded_ref() {
    let h = harness();
    h.store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    assert!(h.synchronizer.post_questions());

    let task = h.store.task(&TaskId::from("7")).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Posted);
    let task_ref = task.marketplace_ref.unwrap();
    assert_eq!(task_ref.encode(), "H1_http://x/H1");
    assert!(task.posted_at.is_some());

    let raw = h
        .store
        .query(
            &SqlStatement::new("SELECT marketplace_ref FROM question_tasks WHERE task_id = ?1")
                .bind("7"),
        )
        .unwrap();
    assert_eq!(
        raw.column("marketplace_ref").unwrap(),
        [Some("H1_http://x/H1".to_string())]
    );
}

#[test]
fn submission_carries_static_settings_and_payload() {
    let config = SyncConfig {
        title: "Count the birds".to_string(),
        reward: 0.05,
        ..SyncConfig::default()
    };
    let h = harness_with_config(config);
    h.store
        .enqueue_task(&TaskId::from("7"), "<QuestionForm>birds?</QuestionForm>")
        .unwrap();

    assert!(h.synchronizer.post_questions());

    let request = h.marketplace.hit_request("H1").unwrap().unwrap();
    assert_eq!(request.title, "Count the birds");
    assert_eq!(request.description, "Question description");
    assert_eq!(request.reward, 0.05);
    assert_eq!(request.assignment_count, 1);
    assert_eq!(request.question, "<QuestionForm>birds?</QuestionForm>");
}

#[test]
fn failed_submission_leaves_only_that_task_init() {
    let h = harness();
    h.store.enqueue_task(&TaskId::from("good"), "<good/>").unwrap();
    h.store.enqueue_task(&TaskId::from("bad"), "<bad/>").unwrap();
    h.marketplace.reject_submissions_of("<bad/>").unwrap();

    let report = h.synchronizer.run_post_pass().unwrap();

    assert!(report.committed());
    assert_eq!(report.posted, vec![TaskId::from("good")]);
    assert_eq!(report.failed, vec![TaskId::from("bad")]);
    assert_eq!(status_of(&h.store, "good"), TaskStatus::Posted);
    assert_eq!(status_of(&h.store, "bad"), TaskStatus::Init);

    h.marketplace.clear_failures().unwrap();
    let retry = h.synchronizer.run_post_pass().unwrap();
    assert_eq!(retry.posted, vec![TaskId::from("bad")]);
    assert_eq!(status_of(&h.store, "bad"), TaskStatus::Posted);
    assert_eq!(h.marketplace.submissions().unwrap().len(), 2);
}

#[test]
fn pass_with_nothing_to_post_reports_false() {
    let h = harness();
    assert!(!h.synchronizer.post_questions());
    assert!(h.marketplace.submissions().unwrap().is_empty());
}

#[test]
fn pass_where_every_submission_fails_reports_false() {
    let h = harness();
    h.store.enqueue_task(&TaskId::from("7"), "<bad/>").unwrap();
    h.marketplace.reject_submissions_of("<bad/>").unwrap();

    assert!(!h.synchronizer.post_questions());
    assert_eq!(status_of(&h.store, "7"), TaskStatus::Init);
}

#[test]
fn posted_tasks_are_not_submitted_again() {
    let h = harness();
    h.store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    assert!(h.synchronizer.post_questions());
    assert!(!h.synchronizer.post_questions());
    assert_eq!(h.marketplace.submissions().unwrap().len(), 1);
}

#[test]
fn tasks_are_posted_in_creation_order() {
    let h = harness();
    for id in ["b", "a", "c"] {
        h.store.enqueue_task(&TaskId::from(id), id).unwrap();
    }

    let report = h.synchronizer.run_post_pass().unwrap();

    // Same-second inserts fall back to id order.
    let questions: Vec<String> = h
        .marketplace
        .submissions()
        .unwrap()
        .into_iter()
        .map(|request| request.question)
        .collect();
    assert_eq!(report.posted.len(), 3);
    assert_eq!(
        questions,
        report
            .posted
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
    );
}

#[test]
fn commit_failure_leaves_every_task_init() {
    let h = harness();
    h.store.enqueue_task(&TaskId::from("1"), "<one/>").unwrap();
    h.store.enqueue_task(&TaskId::from("2"), "<two/>").unwrap();
    h.store
        .execute(&SqlStatement::new(
            "
CREATE TRIGGER block_posting
BEFORE UPDATE OF status ON question_tasks
WHEN NEW.status = 'POSTED' AND OLD.task_id = '2'
BEGIN
    SELECT RAISE(ABORT, 'posting blocked');
END
",
        ))
        .unwrap();

    let error = h.synchronizer.run_post_pass().unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Commit);
    assert!(error.message.contains("posting blocked"));

    assert!(!h.synchronizer.post_questions());
    assert_eq!(status_of(&h.store, "1"), TaskStatus::Init);
    assert_eq!(status_of(&h.store, "2"), TaskStatus::Init);
}

#[test]
fn ids_with_sql_delimiters_are_stored_verbatim() {
    let h = harness();
    let hostile = [
        "7'; DROP TABLE question_tasks; --",
        "a' OR '1'='1",
        "quote\"and\\slash",
    ];
    for id in hostile {
        h.store.enqueue_task(&TaskId::from(id), "<xml/>").unwrap();
    }
    h.store.enqueue_task(&TaskId::from("plain"), "<xml/>").unwrap();

    assert!(h.synchronizer.post_questions());

    for id in hostile {
        assert_eq!(status_of(&h.store, id), TaskStatus::Posted, "{id}");
    }
    assert_eq!(status_of(&h.store, "plain"), TaskStatus::Posted);
    assert_eq!(h.store.list_tasks(None).unwrap().len(), 4);
}
