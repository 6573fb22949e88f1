use std::time::SystemTime;

use crate::models::{
    CoreError, Machine, MachineId, NewMachine, NewUpdateRecord, ScanSnapshot, UpdateRecord,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Fleet registry. `list_machines` is the registry snapshot the inventory is built from.
pub trait MachineStore: Send + Sync {
    fn add_machine(&self, machine: &NewMachine) -> PersistenceResult<Machine>;

    fn machine(&self, id: MachineId) -> PersistenceResult<Option<Machine>>;

    fn machine_by_hostname(&self, hostname: &str) -> PersistenceResult<Option<Machine>>;

    fn list_machines(&self) -> PersistenceResult<Vec<Machine>>;

    fn update_machine_ip(&self, hostname: &str, ip: &str) -> PersistenceResult<bool>;

    fn update_machine_username(&self, id: MachineId, username: &str) -> PersistenceResult<bool>;

    fn delete_machine(&self, id: MachineId) -> PersistenceResult<bool>;
}

pub trait ScanStore: Send + Sync {
    fn save_scan(
        &self,
        machine: MachineId,
        created_at: SystemTime,
        payload: &str,
    ) -> PersistenceResult<ScanSnapshot>;

    fn latest_scan(&self, machine: MachineId) -> PersistenceResult<Option<ScanSnapshot>>;

    fn list_scans(&self, machine: MachineId) -> PersistenceResult<Vec<ScanSnapshot>>;
}

/// Append-only audit trail of per-package update outcomes.
pub trait UpdateHistoryStore: Send + Sync {
    fn append_updates(&self, records: &[NewUpdateRecord]) -> PersistenceResult<Vec<UpdateRecord>>;

    fn list_updates(&self, machine: MachineId, limit: usize)
    -> PersistenceResult<Vec<UpdateRecord>>;
}
