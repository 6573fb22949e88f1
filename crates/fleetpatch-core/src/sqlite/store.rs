use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    CoreError, CoreErrorKind, Machine, MachineId, NewMachine, NewUpdateRecord, ScanId,
    ScanSnapshot, UpdateRecord, UpdateRecordId, UpdateStatus,
};
use crate::persistence::{
    MachineStore, MigrationStore, PersistenceResult, ScanStore, UpdateHistoryStore,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "fleetpatch_schema_migrations";

/// SQLite-backed registry, scan and history store. A connection is opened per operation.
pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
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

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Tables may be missing even though the version was recorded; all DDL is
                // `IF NOT EXISTS`, so replaying it is safe.
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

            Ok(())
        })
    }
}

impl MachineStore for SqliteStore {
    fn add_machine(&self, machine: &NewMachine) -> PersistenceResult<Machine> {
        self.with_connection("add_machine", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO machines (hostname, ip, username, created_at_unix)
VALUES (?1, ?2, ?3, strftime('%s', 'now'))
",
                params![machine.hostname, machine.ip, machine.username],
            )?;
            let id = i64_to_u64(connection.last_insert_rowid())?;

            Ok(Machine {
                id: MachineId(id),
                hostname: machine.hostname.clone(),
                ip: machine.ip.clone(),
                username: machine.username.clone(),
            })
        })
    }

    fn machine(&self, id: MachineId) -> PersistenceResult<Option<Machine>> {
        self.with_connection("machine", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT machine_id, hostname, ip, username FROM machines WHERE machine_id = ?1",
                    params![id_to_i64(id.0)?],
                    machine_from_row,
                )
                .optional()
        })
    }

    fn machine_by_hostname(&self, hostname: &str) -> PersistenceResult<Option<Machine>> {
        self.with_connection("machine_by_hostname", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT machine_id, hostname, ip, username FROM machines WHERE hostname = ?1",
                    params![hostname],
                    machine_from_row,
                )
                .optional()
        })
    }

    fn list_machines(&self) -> PersistenceResult<Vec<Machine>> {
        self.with_connection("list_machines", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "SELECT machine_id, hostname, ip, username FROM machines ORDER BY machine_id",
            )?;
            let rows = statement.query_map([], machine_from_row)?;
            rows.collect()
        })
    }

    fn update_machine_ip(&self, hostname: &str, ip: &str) -> PersistenceResult<bool> {
        self.with_connection("update_machine_ip", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE machines SET ip = ?2 WHERE hostname = ?1",
                params![hostname, ip],
            )?;
            Ok(updated > 0)
        })
    }

    fn update_machine_username(&self, id: MachineId, username: &str) -> PersistenceResult<bool> {
        self.with_connection("update_machine_username", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE machines SET username = ?2 WHERE machine_id = ?1",
                params![id_to_i64(id.0)?, username],
            )?;
            Ok(updated > 0)
        })
    }

    fn delete_machine(&self, id: MachineId) -> PersistenceResult<bool> {
        self.with_connection("delete_machine", |connection| {
            ensure_schema_ready(connection)?;
            let deleted = connection.execute(
                "DELETE FROM machines WHERE machine_id = ?1",
                params![id_to_i64(id.0)?],
            )?;
            Ok(deleted > 0)
        })
    }
}

impl ScanStore for SqliteStore {
    fn save_scan(
        &self,
        machine: MachineId,
        created_at: SystemTime,
        payload: &str,
    ) -> PersistenceResult<ScanSnapshot> {
        self.with_connection("save_scan", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO scan_snapshots (machine_id, created_at_unix, payload)
VALUES (?1, ?2, ?3)
",
                params![
                    id_to_i64(machine.0)?,
                    to_unix_seconds(created_at)?,
                    payload
                ],
            )?;
            let id = i64_to_u64(connection.last_insert_rowid())?;

            Ok(ScanSnapshot {
                id: ScanId(id),
                machine_id: machine,
                created_at: truncate_to_seconds(created_at)?,
                payload: payload.to_string(),
            })
        })
    }

    fn latest_scan(&self, machine: MachineId) -> PersistenceResult<Option<ScanSnapshot>> {
        self.with_connection("latest_scan", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "
SELECT scan_id, machine_id, created_at_unix, payload
FROM scan_snapshots
WHERE machine_id = ?1
ORDER BY created_at_unix DESC, scan_id DESC
LIMIT 1
",
                    params![id_to_i64(machine.0)?],
                    scan_from_row,
                )
                .optional()
        })
    }

    fn list_scans(&self, machine: MachineId) -> PersistenceResult<Vec<ScanSnapshot>> {
        self.with_connection("list_scans", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT scan_id, machine_id, created_at_unix, payload
FROM scan_snapshots
WHERE machine_id = ?1
ORDER BY created_at_unix DESC, scan_id DESC
",
            )?;
            let rows = statement.query_map(params![id_to_i64(machine.0)?], scan_from_row)?;
            rows.collect()
        })
    }
}

impl UpdateHistoryStore for SqliteStore {
    fn append_updates(&self, records: &[NewUpdateRecord]) -> PersistenceResult<Vec<UpdateRecord>> {
        self.with_connection("append_updates", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            let mut written = Vec::with_capacity(records.len());
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO update_records (
    machine_id, created_at_unix, package_name, version, status, raw_output
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
",
                )?;

                for record in records {
                    statement.execute(params![
                        id_to_i64(record.machine_id.0)?,
                        to_unix_seconds(record.created_at)?,
                        record.package,
                        record.version,
                        record.status.as_str(),
                        record.raw_output,
                    ])?;

                    written.push(UpdateRecord {
                        id: UpdateRecordId(i64_to_u64(transaction.last_insert_rowid())?),
                        machine_id: record.machine_id,
                        created_at: truncate_to_seconds(record.created_at)?,
                        package: record.package.clone(),
                        version: record.version.clone(),
                        status: record.status,
                        raw_output: record.raw_output.clone(),
                    });
                }
            }
            transaction.commit()?;
            Ok(written)
        })
    }

    fn list_updates(
        &self,
        machine: MachineId,
        limit: usize,
    ) -> PersistenceResult<Vec<UpdateRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_updates", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT record_id, machine_id, created_at_unix, package_name, version, status, raw_output
FROM update_records
WHERE machine_id = ?1
ORDER BY created_at_unix DESC, record_id DESC
LIMIT ?2
",
            )?;
            let rows = statement.query_map(
                params![id_to_i64(machine.0)?, to_i64(limit)?],
                |row| {
                    let record_id: i64 = row.get(0)?;
                    let machine_id: i64 = row.get(1)?;
                    let created_at_unix: i64 = row.get(2)?;
                    let status_raw: String = row.get(5)?;

                    Ok(UpdateRecord {
                        id: UpdateRecordId(i64_to_u64(record_id)?),
                        machine_id: MachineId(i64_to_u64(machine_id)?),
                        created_at: from_unix_seconds(created_at_unix)?,
                        package: row.get(3)?,
                        version: row.get(4)?,
                        status: parse_update_status(&status_raw)?,
                        raw_output: row.get(6)?,
                    })
                },
            )?;

            rows.collect()
        })
    }
}

fn machine_from_row(row: &Row<'_>) -> rusqlite::Result<Machine> {
    let machine_id: i64 = row.get(0)?;
    Ok(Machine {
        id: MachineId(i64_to_u64(machine_id)?),
        hostname: row.get(1)?,
        ip: row.get(2)?,
        username: row.get(3)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanSnapshot> {
    let scan_id: i64 = row.get(0)?;
    let machine_id: i64 = row.get(1)?;
    let created_at_unix: i64 = row.get(2)?;
    Ok(ScanSnapshot {
        id: ScanId(i64_to_u64(scan_id)?),
        machine_id: MachineId(i64_to_u64(machine_id)?),
        created_at: from_unix_seconds(created_at_unix)?,
        payload: row.get(3)?,
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(
        "
CREATE TABLE IF NOT EXISTS fleetpatch_schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
",
    )?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before fleet operations",
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
    migration(version)
        .ok_or_else(|| storage_error_sqlite(&format!("migration version '{version}' is missing")))
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
    transaction.commit()?;
    Ok(())
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
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn parse_update_status(raw: &str) -> rusqlite::Result<UpdateStatus> {
    match raw {
        "success" => Ok(UpdateStatus::Success),
        "failed" => Ok(UpdateStatus::Failed),
        "skipped" => Ok(UpdateStatus::Skipped),
        "unknown" => Ok(UpdateStatus::Unknown),
        _ => Err(storage_error_sqlite(&format!(
            "unknown update status '{raw}' in sqlite record"
        ))),
    }
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    let seconds = i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))?;
    Ok(seconds)
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    if value < 0 {
        return Err(storage_error_sqlite(
            "negative unix timestamps are not supported",
        ));
    }
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("failed to convert unix timestamp to u64"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

/// Timestamps are persisted at second precision; returned records match what a later read yields.
fn truncate_to_seconds(value: SystemTime) -> rusqlite::Result<SystemTime> {
    from_unix_seconds(to_unix_seconds(value)?)
}

fn id_to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("record id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative record id in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
