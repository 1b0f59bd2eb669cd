use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, params, params_from_iter};

use crate::models::{
    CoreError, CoreErrorKind, MarketplaceTaskRef, TaskId, TaskRecord, TaskStatus,
};
use crate::persistence::{
    ColumnarResult, MigrationStore, PersistenceResult, SqlStatement, SqlValue, TabularStore,
    TaskIntake,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "turkbridge_schema_migrations";
const IN_MEMORY_PATH: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str = "
    task_id, payload, status, marketplace_ref, assignment_id, result, cost,
    created_at_unix, posted_at_unix, answered_at_unix, finished_at_unix
";

/// SQLite-backed store holding a single connection for its whole lifetime.
/// The connection is opened by [`SqliteStore::open`] and released by
/// [`SqliteStore::close`] (or on drop).
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(database_path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let database_path = database_path.into();
        let connection = open_connection(&database_path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::StoreConnect,
                format!(
                    "failed to open sqlite store at '{}': {error}",
                    database_path.display()
                ),
            )
        })?;
        tracing::debug!(path = %database_path.display(), "opened sqlite store");

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        Self::open(IN_MEMORY_PATH)
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    pub fn close(self) -> PersistenceResult<()> {
        let connection = self
            .connection
            .into_inner()
            .map_err(|_| poisoned_error())?;
        connection.close().map_err(|(_, error)| {
            storage_error_text("close", CoreErrorKind::Internal, error.to_string())
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        kind: CoreErrorKind,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = self.connection.lock().map_err(|_| poisoned_error())?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, kind, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", CoreErrorKind::Query, |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                CoreErrorKind::Exec,
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                CoreErrorKind::Exec,
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", CoreErrorKind::Exec, |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // DDL is all IF [NOT] EXISTS, so re-running it repairs a
                // schema whose recorded version outlived its tables.
                for version in 1..=target_version {
                    connection.execute_batch(defined_migration(version)?.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            tracing::info!(
                from_version = current_version,
                to_version = target_version,
                "applied sqlite schema migrations"
            );
            Ok(())
        })
    }
}

impl TabularStore for SqliteStore {
    fn query(&self, statement: &SqlStatement) -> PersistenceResult<ColumnarResult> {
        self.with_connection("query", CoreErrorKind::Query, |connection| {
            let mut prepared = connection.prepare(&statement.sql)?;
            let column_names: Vec<String> = prepared
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let width = column_names.len();
            let mut result = ColumnarResult::with_columns(column_names)
                .map_err(|error| storage_error_sqlite(&error.message))?;

            let mut rows = prepared.query(params_from_iter(bound_values(statement)))?;
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(width);
                for index in 0..width {
                    cells.push(cell_text(row.get_ref(index)?));
                }
                result
                    .push_row(cells)
                    .map_err(|error| storage_error_sqlite(&error.message))?;
            }
            Ok(result)
        })
        .map_err(|error| with_statement(error, statement))
    }

    fn execute(&self, statement: &SqlStatement) -> PersistenceResult<usize> {
        self.with_connection("execute", CoreErrorKind::Exec, |connection| {
            connection.execute(&statement.sql, params_from_iter(bound_values(statement)))
        })
        .map_err(|error| with_statement(error, statement))
    }

    fn execute_atomic(&self, statements: &[SqlStatement]) -> PersistenceResult<Vec<usize>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let mut failed_statement: Option<usize> = None;
        let outcome = self.with_connection("execute_atomic", CoreErrorKind::Commit, |connection| {
            let transaction = connection.transaction()?;
            let mut affected = Vec::with_capacity(statements.len());
            for (index, statement) in statements.iter().enumerate() {
                let changed = transaction
                    .execute(&statement.sql, params_from_iter(bound_values(statement)))
                    .inspect_err(|_| failed_statement = Some(index))?;
                affected.push(changed);
            }
            transaction.commit()?;
            Ok(affected)
        });

        outcome.map_err(|error| match failed_statement.and_then(|index| statements.get(index)) {
            Some(statement) => with_statement(error, statement),
            None => error,
        })
    }
}

impl TaskIntake for SqliteStore {
    fn enqueue_task(&self, task_id: &TaskId, payload: &str) -> PersistenceResult<()> {
        if task_id.as_str().trim().is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "task id must not be empty",
            ));
        }

        let inserted = self.with_connection("enqueue_task", CoreErrorKind::Exec, |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO question_tasks (task_id, payload, status, created_at_unix)
VALUES (?1, ?2, 'INIT', strftime('%s', 'now'))
ON CONFLICT(task_id) DO NOTHING
",
                params![task_id.as_str(), payload],
            )
        })?;

        if inserted == 0 {
            return Err(CoreError::for_task(
                task_id.clone(),
                CoreErrorKind::InvalidInput,
                format!("task '{task_id}' already exists"),
            ));
        }
        Ok(())
    }

    fn task(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskRecord>> {
        self.with_connection("task", CoreErrorKind::Query, |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM question_tasks WHERE task_id = ?1"
            ))?;
            let mut rows = statement.query(params![task_id.as_str()])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            task_record_from_row(row).map(Some)
        })
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> PersistenceResult<Vec<TaskRecord>> {
        self.with_connection("list_tasks", CoreErrorKind::Query, |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {TASK_COLUMNS}
FROM question_tasks
WHERE (?1 IS NULL OR status = ?1)
ORDER BY created_at_unix, task_id
"
            ))?;
            let rows = statement.query_map(
                params![status.map(TaskStatus::as_str)],
                task_record_from_row,
            )?;
            rows.collect()
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    let connection = if database_path.as_os_str() == IN_MEMORY_PATH {
        Connection::open_in_memory()?
    } else {
        if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
        }
        Connection::open(database_path)?
    };
    connection.busy_timeout(BUSY_TIMEOUT)?;
    // Forces a read of the header so a non-database file fails here, not on
    // the first query.
    let _: i64 = connection.pragma_query_value(None, "schema_version", |row| row.get(0))?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before task operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn task_record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let task_id: String = row.get(0)?;
    let payload: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let marketplace_ref_raw: Option<String> = row.get(3)?;
    let assignment_id: Option<String> = row.get(4)?;
    let result: Option<String> = row.get(5)?;
    let cost: Option<f64> = row.get(6)?;
    let created_at_unix: i64 = row.get(7)?;
    let posted_at_unix: Option<i64> = row.get(8)?;
    let answered_at_unix: Option<i64> = row.get(9)?;
    let finished_at_unix: Option<i64> = row.get(10)?;

    let status = status_raw
        .parse::<TaskStatus>()
        .map_err(|error| storage_error_sqlite(&error.message))?;
    let marketplace_ref = marketplace_ref_raw
        .as_deref()
        .map(MarketplaceTaskRef::parse)
        .transpose()
        .map_err(|error| storage_error_sqlite(&error.message))?;

    Ok(TaskRecord {
        id: TaskId(task_id),
        payload,
        status,
        marketplace_ref,
        assignment_id,
        result,
        cost,
        created_at: from_unix_seconds(created_at_unix)?,
        posted_at: posted_at_unix.map(from_unix_seconds).transpose()?,
        answered_at: answered_at_unix.map(from_unix_seconds).transpose()?,
        finished_at: finished_at_unix.map(from_unix_seconds).transpose()?,
    })
}

fn bound_values(statement: &SqlStatement) -> impl Iterator<Item = Value> + '_ {
    statement.params.iter().map(|value| match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::Integer(*value),
        SqlValue::Real(value) => Value::Real(*value),
        SqlValue::Text(value) => Value::Text(value.clone()),
    })
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn with_statement(error: CoreError, statement: &SqlStatement) -> CoreError {
    CoreError {
        message: format!("{} [statement: {}]", error.message, statement.sql.trim()),
        ..error
    }
}

fn poisoned_error() -> CoreError {
    CoreError::new(CoreErrorKind::Internal, "sqlite store mutex poisoned")
}

fn storage_error(operation: &str, kind: CoreErrorKind, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, kind, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn storage_error_text(
    operation: &str,
    kind: CoreErrorKind,
    message: impl AsRef<str>,
) -> CoreError {
    CoreError::new(
        kind,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
