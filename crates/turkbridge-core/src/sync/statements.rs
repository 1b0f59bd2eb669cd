use crate::models::{MarketplaceTaskRef, TaskId, TaskStatus};
use crate::persistence::SqlStatement;

pub(crate) const TASK_ID: &str = "task_id";
pub(crate) const PAYLOAD: &str = "payload";
pub(crate) const MARKETPLACE_REF: &str = "marketplace_ref";
pub(crate) const ASSIGNMENT_ID: &str = "assignment_id";

pub(crate) fn select_tasks_with_status(status: TaskStatus, columns: &[&str]) -> SqlStatement {
    SqlStatement::new(format!(
        "
SELECT {}
FROM question_tasks
WHERE status = ?1
ORDER BY created_at_unix, task_id
",
        columns.join(", ")
    ))
    .bind(status.as_str())
}

// Every transition is guarded by the status it leaves, so a replayed or
// concurrent statement can never move a task backwards.

pub(crate) fn mark_posted(task_id: &TaskId, task_ref: &MarketplaceTaskRef) -> SqlStatement {
    SqlStatement::new(
        "
UPDATE question_tasks
SET status = 'POSTED',
    marketplace_ref = ?2,
    posted_at_unix = strftime('%s', 'now')
WHERE task_id = ?1 AND status = 'INIT'
",
    )
    .bind(task_id.as_str())
    .bind(task_ref.encode())
}

pub(crate) fn mark_answered(
    task_id: &TaskId,
    assignment_id: &str,
    result: &str,
    cost: f64,
) -> SqlStatement {
    SqlStatement::new(
        "
UPDATE question_tasks
SET status = 'ANSWERED',
    assignment_id = ?2,
    result = ?3,
    cost = ?4,
    answered_at_unix = strftime('%s', 'now')
WHERE task_id = ?1 AND status = 'POSTED'
",
    )
    .bind(task_id.as_str())
    .bind(assignment_id)
    .bind(result)
    .bind(cost)
}

pub(crate) fn mark_finished(task_id: &TaskId) -> SqlStatement {
    SqlStatement::new(
        "
UPDATE question_tasks
SET status = 'FINISHED',
    finished_at_unix = strftime('%s', 'now')
WHERE task_id = ?1 AND status = 'ANSWERED'
",
    )
    .bind(task_id.as_str())
}

pub(crate) fn acquire_lease(lease_name: &str, holder: &str, ttl_secs: i64) -> SqlStatement {
    SqlStatement::new(
        "
INSERT INTO sync_leases (lease_name, holder, expires_at_unix)
VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER) + ?3)
ON CONFLICT(lease_name) DO UPDATE SET
    holder = excluded.holder,
    expires_at_unix = excluded.expires_at_unix
WHERE sync_leases.holder = excluded.holder
   OR sync_leases.expires_at_unix <= CAST(strftime('%s', 'now') AS INTEGER)
",
    )
    .bind(lease_name)
    .bind(holder)
    .bind(ttl_secs)
}

pub(crate) fn release_lease(lease_name: &str, holder: &str) -> SqlStatement {
    SqlStatement::new("DELETE FROM sync_leases WHERE lease_name = ?1 AND holder = ?2")
        .bind(lease_name)
        .bind(holder)
}
