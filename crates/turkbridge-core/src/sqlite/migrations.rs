#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_question_tasks",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS question_tasks (
    task_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'INIT',
    marketplace_ref TEXT,
    assignment_id TEXT,
    result TEXT,
    cost REAL,
    created_at_unix INTEGER NOT NULL,
    posted_at_unix INTEGER,
    answered_at_unix INTEGER,
    finished_at_unix INTEGER
);

CREATE INDEX IF NOT EXISTS idx_question_tasks_status
    ON question_tasks (status, created_at_unix);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_question_tasks_status;
DROP TABLE IF EXISTS question_tasks;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_sync_leases",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS sync_leases (
    lease_name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at_unix INTEGER NOT NULL
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS sync_leases;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
