use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use turkbridge_core::models::{CoreErrorKind, TaskId, TaskStatus};
use turkbridge_core::persistence::{SqlStatement, SqlValue, TabularStore, TaskIntake};
use turkbridge_core::sqlite::SqliteStore;

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("turkbridge-{test_name}-{nanos}.sqlite3"))
}

fn migrated_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.migrate_to_latest().unwrap();
    store
}

#[test]
fn query_returns_columns_by_name_with_nulls_preserved() {
    let store = migrated_store();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();
    store.enqueue_task(&TaskId::from("8"), "<other/>").unwrap();

    let result = store
        .query(
            &SqlStatement::new(
                "SELECT task_id, marketplace_ref FROM question_tasks WHERE status = ?1 ORDER BY task_id",
            )
            .bind("INIT"),
        )
        .unwrap();

    assert_eq!(result.row_count(), 2);
    assert_eq!(result.column_names(), ["task_id", "marketplace_ref"]);
    assert_eq!(
        result.column("task_id").unwrap(),
        [Some("7".to_string()), Some("8".to_string())]
    );
    assert_eq!(result.column("marketplace_ref").unwrap(), [None::<String>, None]);
    assert!(result.column("payload").is_none());
}

#[test]
fn empty_query_result_still_names_its_columns() {
    let store = migrated_store();
    let result = store
        .query(&SqlStatement::new(
            "SELECT task_id, payload FROM question_tasks",
        ))
        .unwrap();

    assert!(result.is_empty());
    assert!(result.column("payload").unwrap().is_empty());
}

#[test]
fn numeric_cells_are_returned_as_text() {
    let store = migrated_store();
    let result = store
        .query(
            &SqlStatement::new("SELECT ?1 AS whole, ?2 AS fraction, ?3 AS nothing")
                .bind(42_i64)
                .bind(0.25)
                .bind(SqlValue::Null),
        )
        .unwrap();

    assert_eq!(result.column("whole").unwrap(), [Some("42".to_string())]);
    assert_eq!(result.column("fraction").unwrap(), [Some("0.25".to_string())]);
    assert_eq!(result.column("nothing").unwrap(), [None::<String>]);
}

#[test]
fn invalid_query_is_a_query_error_naming_the_statement() {
    let store = migrated_store();
    let error = store
        .query(&SqlStatement::new("SELECT missing_column FROM question_tasks"))
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Query);
    assert!(error.message.contains("missing_column"));
}

#[test]
fn execute_reports_affected_rows() {
    let store = migrated_store();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    let changed = store
        .execute(
            &SqlStatement::new("UPDATE question_tasks SET payload = ?2 WHERE task_id = ?1")
                .bind("7")
                .bind("<edited/>"),
        )
        .unwrap();
    assert_eq!(changed, 1);

    let unchanged = store
        .execute(
            &SqlStatement::new("UPDATE question_tasks SET payload = ?2 WHERE task_id = ?1")
                .bind("missing")
                .bind("<edited/>"),
        )
        .unwrap();
    assert_eq!(unchanged, 0);
}

#[test]
fn failed_batch_rolls_back_every_statement() {
    let store = migrated_store();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    let error = store
        .execute_atomic(&[
            SqlStatement::new("UPDATE question_tasks SET status = 'POSTED' WHERE task_id = ?1")
                .bind("7"),
            SqlStatement::new("UPDATE no_such_table SET status = 'POSTED'"),
        ])
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Commit);
    assert!(error.message.contains("no_such_table"));
    let task = store.task(&TaskId::from("7")).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Init);
}

#[test]
fn batch_returns_per_statement_counts() {
    let store = migrated_store();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    let affected = store
        .execute_atomic(&[
            SqlStatement::new("UPDATE question_tasks SET payload = 'a' WHERE task_id = ?1")
                .bind("7"),
            SqlStatement::new("UPDATE question_tasks SET payload = 'b' WHERE task_id = ?1")
                .bind("8"),
        ])
        .unwrap();

    assert_eq!(affected, vec![1, 0]);
    assert!(store.execute_atomic(&[]).unwrap().is_empty());
}

#[test]
fn enqueue_rejects_duplicates_and_empty_ids() {
    let store = migrated_store();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();

    let duplicate = store
        .enqueue_task(&TaskId::from("7"), "<other/>")
        .unwrap_err();
    assert_eq!(duplicate.kind, CoreErrorKind::InvalidInput);
    assert_eq!(duplicate.task, Some(TaskId::from("7")));

    let empty = store.enqueue_task(&TaskId::from("  "), "<xml/>").unwrap_err();
    assert_eq!(empty.kind, CoreErrorKind::InvalidInput);

    let task = store.task(&TaskId::from("7")).unwrap().unwrap();
    assert_eq!(task.payload, "<xml/>");
}

#[test]
fn enqueue_before_migration_fails() {
    let store = SqliteStore::open_in_memory().unwrap();
    let error = store
        .enqueue_task(&TaskId::from("7"), "<xml/>")
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Exec);
    assert!(error.message.contains("schema is not initialized"));
}

#[test]
fn list_tasks_filters_by_status() {
    let store = migrated_store();
    for id in ["a", "b", "c"] {
        store.enqueue_task(&TaskId::from(id), "<xml/>").unwrap();
    }
    store
        .execute(
            &SqlStatement::new(
                "UPDATE question_tasks SET status = 'POSTED', marketplace_ref = 'H1_http://x/H1' WHERE task_id = ?1",
            )
            .bind("b"),
        )
        .unwrap();

    let all = store.list_tasks(None).unwrap();
    assert_eq!(all.len(), 3);

    let posted = store.list_tasks(Some(TaskStatus::Posted)).unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].id, TaskId::from("b"));
    let task_ref = posted[0].marketplace_ref.as_ref().unwrap();
    assert_eq!(task_ref.remote_task_id, "H1");
    assert_eq!(task_ref.review_url, "http://x/H1");

    assert!(store.list_tasks(Some(TaskStatus::Finished)).unwrap().is_empty());
}

#[test]
fn file_store_persists_across_reopen_and_close() {
    let path = test_db_path("reopen");

    let store = SqliteStore::open(&path).unwrap();
    store.migrate_to_latest().unwrap();
    store.enqueue_task(&TaskId::from("7"), "<xml/>").unwrap();
    store.close().unwrap();

    let reopened = SqliteStore::open(&path).unwrap();
    let task = reopened.task(&TaskId::from("7")).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Init);
    assert!(task.posted_at.is_none());
    reopened.close().unwrap();

    let _ = std::fs::remove_file(path);
}

#[test]
fn opening_a_non_database_file_is_a_connect_error() {
    let path = test_db_path("not-a-db");
    std::fs::write(&path, "definitely not sqlite, just some plain text padding the header")
        .unwrap();

    let error = SqliteStore::open(&path).err().unwrap();
    assert_eq!(error.kind, CoreErrorKind::StoreConnect);

    let _ = std::fs::remove_file(path);
}
