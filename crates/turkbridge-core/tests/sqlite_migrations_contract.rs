use turkbridge_core::persistence::MigrationStore;
use turkbridge_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

#[test]
fn migration_versions_are_strictly_increasing() {
    let entries = migrations();
    assert!(!entries.is_empty());

    let mut previous = 0;
    for entry in entries {
        assert!(entry.version > previous);
        previous = entry.version;
    }
}

#[test]
fn migration_lookup_and_schema_version_are_consistent() {
    let latest = current_schema_version();
    let latest_entry = migration(latest).expect("latest migration must exist");
    assert_eq!(latest_entry.version, latest);
}

#[test]
fn migration_sql_is_defined_for_up_and_down_paths() {
    for entry in migrations() {
        assert!(!entry.up_sql.trim().is_empty(), "up sql must not be empty");
        assert!(
            !entry.down_sql.trim().is_empty(),
            "down sql must not be empty"
        );
    }
}

#[test]
fn planned_migrations_start_after_requested_version() {
    let store = SqliteStore::open_in_memory().unwrap();
    let planned = store.planned_migrations(0);

    assert!(!planned.is_empty());
    assert_eq!(planned[0].version, 1);
    assert!(store.planned_migrations(current_schema_version()).is_empty());
}

#[test]
fn migrating_up_down_and_up_again_tracks_version() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    store.apply_migration(0).unwrap();
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
}

#[test]
fn migrating_twice_is_a_no_op() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.migrate_to_latest().unwrap();
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
}

#[test]
fn applying_undefined_migration_fails() {
    let store = SqliteStore::open_in_memory().unwrap();
    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();

    assert!(error.message.contains("invalid migration target"));
    assert_eq!(store.current_version().unwrap(), 0);
}
