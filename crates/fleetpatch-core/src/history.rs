use std::sync::Arc;
use std::time::SystemTime;

use crate::models::{MachineId, NewUpdateRecord, PackageVersion, UpdateRecord};
use crate::outcome::OutcomeClassifier;
use crate::persistence::{PersistenceResult, UpdateHistoryStore};

/// Writes one audit row per planned package for a finished update dispatch.
pub struct HistoryRecorder {
    store: Arc<dyn UpdateHistoryStore>,
    classifier: Arc<dyn OutcomeClassifier>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn UpdateHistoryStore>, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        Self { store, classifier }
    }

    /// Every row shares `raw_output` and `recorded_at`; each status is classified separately.
    pub fn record(
        &self,
        machine: MachineId,
        display_list: &[PackageVersion],
        raw_output: &str,
        recorded_at: SystemTime,
    ) -> PersistenceResult<Vec<UpdateRecord>> {
        let records: Vec<NewUpdateRecord> = display_list
            .iter()
            .map(|entry| NewUpdateRecord {
                machine_id: machine,
                created_at: recorded_at,
                package: entry.name.clone(),
                version: entry.version.clone(),
                status: self.classifier.classify_package(raw_output, &entry.name),
                raw_output: raw_output.to_string(),
            })
            .collect();

        if records.is_empty() {
            return Ok(Vec::new());
        }

        self.store.append_updates(&records)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, UNIX_EPOCH};

    use super::HistoryRecorder;
    use crate::models::{
        MachineId, NewUpdateRecord, PackageVersion, UpdateRecord, UpdateRecordId, UpdateStatus,
    };
    use crate::outcome::TextOutcomeClassifier;
    use crate::persistence::{PersistenceResult, UpdateHistoryStore};

    #[derive(Default)]
    struct MemoryHistory {
        rows: Mutex<Vec<UpdateRecord>>,
    }

    impl UpdateHistoryStore for MemoryHistory {
        fn append_updates(
            &self,
            records: &[NewUpdateRecord],
        ) -> PersistenceResult<Vec<UpdateRecord>> {
            let mut rows = self.rows.lock().unwrap();
            let mut written = Vec::new();
            for record in records {
                let row = UpdateRecord {
                    id: UpdateRecordId(rows.len() as u64 + 1),
                    machine_id: record.machine_id,
                    created_at: record.created_at,
                    package: record.package.clone(),
                    version: record.version.clone(),
                    status: record.status,
                    raw_output: record.raw_output.clone(),
                };
                rows.push(row.clone());
                written.push(row);
            }
            Ok(written)
        }

        fn list_updates(
            &self,
            machine: MachineId,
            limit: usize,
        ) -> PersistenceResult<Vec<UpdateRecord>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .rev()
                .filter(|row| row.machine_id == machine)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn entry(name: &str, version: &str) -> PackageVersion {
        PackageVersion {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn records_one_row_per_package_with_shared_output() {
        let store = Arc::new(MemoryHistory::default());
        let recorder = HistoryRecorder::new(store.clone(), Arc::new(TextOutcomeClassifier));
        let output = "changed: [web] => (item=curl)\nfailed: [web] => (item=vim)\n";
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let written = recorder
            .record(
                MachineId(4),
                &[entry("curl", "8.5.0"), entry("vim", "9.0"), entry("git", "2.43")],
                output,
                at,
            )
            .unwrap();

        assert_eq!(written.len(), 3);
        assert_eq!(written[0].status, UpdateStatus::Success);
        assert_eq!(written[1].status, UpdateStatus::Failed);
        assert_eq!(written[2].status, UpdateStatus::Unknown);
        assert!(written.iter().all(|row| row.raw_output == output));
        assert!(written.iter().all(|row| row.created_at == at));
        assert_eq!(written[1].version, "9.0");
        assert_eq!(store.list_updates(MachineId(4), 10).unwrap().len(), 3);
    }

    #[test]
    fn empty_display_list_writes_nothing() {
        let store = Arc::new(MemoryHistory::default());
        let recorder = HistoryRecorder::new(store.clone(), Arc::new(TextOutcomeClassifier));

        let written = recorder.record(MachineId(1), &[], "", UNIX_EPOCH).unwrap();
        assert!(written.is_empty());
        assert!(store.rows.lock().unwrap().is_empty());
    }
}
