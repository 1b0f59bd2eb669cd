pub mod tabular;

pub use tabular::{ColumnarResult, SqlStatement, SqlValue};

use crate::models::{CoreError, TaskId, TaskRecord, TaskStatus};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Generic read/write access to the relational store backing the
/// synchronizer. Results are indexed by column name, never by position.
pub trait TabularStore: Send + Sync {
    fn query(&self, statement: &SqlStatement) -> PersistenceResult<ColumnarResult>;

    fn execute(&self, statement: &SqlStatement) -> PersistenceResult<usize>;

    /// Runs every statement in one transaction and returns the affected row
    /// count of each. Any failure rolls the whole batch back.
    fn execute_atomic(&self, statements: &[SqlStatement]) -> PersistenceResult<Vec<usize>>;
}

/// The submission pathway that creates `INIT` rows, plus typed reads for
/// inspecting task state.
pub trait TaskIntake: Send + Sync {
    fn enqueue_task(&self, task_id: &TaskId, payload: &str) -> PersistenceResult<()>;

    fn task(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskRecord>>;

    fn list_tasks(&self, status: Option<TaskStatus>) -> PersistenceResult<Vec<TaskRecord>>;
}
