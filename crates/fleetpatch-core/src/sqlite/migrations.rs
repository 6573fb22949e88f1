#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_fleet_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS machines (
    machine_id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE,
    ip TEXT NOT NULL,
    username TEXT NOT NULL,
    created_at_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_snapshots (
    scan_id INTEGER PRIMARY KEY AUTOINCREMENT,
    machine_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_snapshots_machine_time
    ON scan_snapshots (machine_id, created_at_unix DESC, scan_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_scan_snapshots_machine_time;
DROP TABLE IF EXISTS scan_snapshots;
DROP TABLE IF EXISTS machines;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_update_history",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS update_records (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    machine_id INTEGER NOT NULL,
    created_at_unix INTEGER NOT NULL,
    package_name TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    raw_output TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_update_records_machine_time
    ON update_records (machine_id, created_at_unix DESC, record_id DESC);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_update_records_machine_time;
DROP TABLE IF EXISTS update_records;
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
