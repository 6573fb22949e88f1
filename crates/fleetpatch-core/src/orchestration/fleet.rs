use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::FleetConfig;
use crate::execution::{PlaybookExecutor, PlaybookRequest};
use crate::history::HistoryRecorder;
use crate::inventory::InventorySynchronizer;
use crate::models::{
    CoreError, CoreErrorKind, Machine, MachineId, NewMachine, Operation, PackageState,
    RunStatus, ScanSnapshot, UpdateRecord, UpdateSelection,
};
use crate::orchestration::{
    EnrollmentOutcome, FleetStores, OrchestrationResult, ScanOutcome, UpdateReport,
};
use crate::outcome::{OutcomeClassifier, TextOutcomeClassifier};
use crate::plan::build_plan;
use crate::scan_parser::parse_scan_payload;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatchSettings {
    pub scan_playbook: PathBuf,
    pub update_playbook: PathBuf,
    pub scan_report_dir: PathBuf,
    pub timeout: Duration,
    pub default_username: String,
}

impl DispatchSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            scan_playbook: config.ansible.scan_playbook.clone(),
            update_playbook: config.ansible.update_playbook.clone(),
            scan_report_dir: config.scan_report_dir.clone(),
            timeout: config.ansible.timeout(),
            default_username: config.enrollment.default_username.clone(),
        }
    }
}

/// Runs scans and updates against registered machines.
///
/// Every dispatch rebuilds the inventory from the full registry first. Dispatches for the
/// same machine are not serialized here; callers that allow concurrent operators must hold
/// a per-machine lock around [`FleetOrchestrator::scan`] and [`FleetOrchestrator::update`].
pub struct FleetOrchestrator {
    stores: FleetStores,
    executor: Arc<dyn PlaybookExecutor>,
    classifier: Arc<dyn OutcomeClassifier>,
    history: HistoryRecorder,
    inventory: InventorySynchronizer,
    settings: DispatchSettings,
}

impl FleetOrchestrator {
    pub fn new(
        stores: FleetStores,
        executor: Arc<dyn PlaybookExecutor>,
        inventory: InventorySynchronizer,
        settings: DispatchSettings,
    ) -> Self {
        let classifier: Arc<dyn OutcomeClassifier> = Arc::new(TextOutcomeClassifier);
        let history = HistoryRecorder::new(stores.history.clone(), classifier.clone());
        Self {
            stores,
            executor,
            classifier,
            history,
            inventory,
            settings,
        }
    }

    pub fn from_config(
        config: &FleetConfig,
        stores: FleetStores,
        executor: Arc<dyn PlaybookExecutor>,
    ) -> Self {
        Self::new(
            stores,
            executor,
            InventorySynchronizer::new(&config.inventory_path),
            DispatchSettings::from_config(config),
        )
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        self.history = HistoryRecorder::new(self.stores.history.clone(), classifier.clone());
        self.classifier = classifier;
        self
    }

    pub fn inventory(&self) -> &InventorySynchronizer {
        &self.inventory
    }

    pub fn machines(&self) -> OrchestrationResult<Vec<Machine>> {
        self.stores.machines.list_machines()
    }

    pub fn machine(&self, id: MachineId) -> OrchestrationResult<Machine> {
        self.stores
            .machines
            .machine(id)?
            .ok_or_else(|| machine_not_found(id))
    }

    /// Rewrites the inventory from the current registry.
    pub fn sync_inventory(&self) -> OrchestrationResult<()> {
        let machines = self.stores.machines.list_machines()?;
        self.inventory.sync(&machines)
    }

    pub fn add_machine(
        &self,
        hostname: &str,
        ip: &str,
        username: &str,
    ) -> OrchestrationResult<Machine> {
        let hostname = hostname_field(hostname)?;
        let ip = inventory_field("ip", ip)?;
        let username = inventory_field("username", username)?;

        if self.stores.machines.machine_by_hostname(hostname)?.is_some() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("hostname '{hostname}' is already registered"),
            ));
        }

        let machine = self
            .stores
            .machines
            .add_machine(&NewMachine::new(hostname, ip, username))?;
        tracing::info!(
            machine = machine.id.0,
            hostname = %machine.hostname,
            "machine added"
        );
        self.sync_inventory()?;
        Ok(machine)
    }

    pub fn remove_machine(&self, id: MachineId) -> OrchestrationResult<()> {
        if !self.stores.machines.delete_machine(id)? {
            return Err(machine_not_found(id));
        }
        tracing::info!(machine = id.0, "machine removed");
        self.sync_inventory()
    }

    pub fn set_machine_username(
        &self,
        id: MachineId,
        username: &str,
    ) -> OrchestrationResult<Machine> {
        let username = inventory_field("username", username)?;
        if !self.stores.machines.update_machine_username(id, username)? {
            return Err(machine_not_found(id));
        }
        self.sync_inventory()?;
        self.machine(id)
    }

    /// Registers a host reporting in. A known hostname only has its address refreshed.
    pub fn enroll(&self, hostname: &str, ip: &str) -> OrchestrationResult<EnrollmentOutcome> {
        let hostname = hostname_field(hostname)?;
        let ip = inventory_field("ip", ip)?;

        let (machine, created) = match self.stores.machines.machine_by_hostname(hostname)? {
            Some(existing) => {
                self.stores.machines.update_machine_ip(hostname, ip)?;
                tracing::info!(
                    machine = existing.id.0,
                    hostname,
                    previous_ip = %existing.ip,
                    ip,
                    "machine re-enrolled"
                );
                (
                    Machine {
                        ip: ip.to_string(),
                        ..existing
                    },
                    false,
                )
            }
            None => {
                let machine = self.stores.machines.add_machine(&NewMachine::new(
                    hostname,
                    ip,
                    self.settings.default_username.as_str(),
                ))?;
                tracing::info!(machine = machine.id.0, hostname, ip, "machine enrolled");
                (machine, true)
            }
        };

        self.sync_inventory()?;
        Ok(EnrollmentOutcome { machine, created })
    }

    pub fn scans(&self, id: MachineId) -> OrchestrationResult<Vec<ScanSnapshot>> {
        self.stores.scans.list_scans(id)
    }

    /// Package states derived from the most recent scan; empty when the machine was never scanned.
    pub fn latest_packages(&self, id: MachineId) -> OrchestrationResult<Vec<PackageState>> {
        Ok(self
            .stores
            .scans
            .latest_scan(id)?
            .map(|snapshot| parse_scan_payload(&snapshot.decode()))
            .unwrap_or_default())
    }

    pub fn history(&self, id: MachineId, limit: usize) -> OrchestrationResult<Vec<UpdateRecord>> {
        self.stores.history.list_updates(id, limit)
    }

    pub async fn scan(&self, id: MachineId) -> OrchestrationResult<ScanOutcome> {
        let machine = self.machine(id)?;
        self.sync_inventory()?;

        let report_path = self
            .settings
            .scan_report_dir
            .join(format!("{}.json", machine.hostname));
        match std::fs::remove_file(&report_path) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                return Err(CoreError::new(
                    CoreErrorKind::Configuration,
                    format!(
                        "failed to clear stale scan report '{}': {error}",
                        report_path.display()
                    ),
                )
                .machine(id)
                .operation(Operation::Scan));
            }
        }

        tracing::info!(machine = id.0, hostname = %machine.hostname, "dispatching scan");
        let request = PlaybookRequest::new(
            id,
            Operation::Scan,
            &self.settings.scan_playbook,
            machine.hostname.as_str(),
            self.settings.timeout,
        );
        let (output, execution_error) = match self.executor.run_playbook(request).await {
            Ok(output) => (output, None),
            Err(error) if error.kind == CoreErrorKind::ProcessFailure => {
                tracing::warn!(
                    machine = id.0,
                    kind = ?error.kind,
                    "scan playbook failed; checking for a report anyway"
                );
                (error.message.clone(), Some(error))
            }
            Err(error) => return Err(error),
        };

        let payload = match std::fs::read_to_string(&report_path) {
            Ok(payload) => payload,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    machine = id.0,
                    path = %report_path.display(),
                    "scan finished without writing a report"
                );
                return Ok(ScanOutcome::MissingReport {
                    output,
                    execution_error,
                });
            }
            Err(error) => {
                return Err(CoreError::new(
                    CoreErrorKind::Internal,
                    format!(
                        "failed to read scan report '{}': {error}",
                        report_path.display()
                    ),
                )
                .machine(id)
                .operation(Operation::Scan));
            }
        };

        let snapshot = self.stores.scans.save_scan(id, SystemTime::now(), &payload)?;
        let packages = parse_scan_payload(&snapshot.decode());
        tracing::info!(
            machine = id.0,
            scan = snapshot.id.0,
            upgradable = packages.len(),
            "scan recorded"
        );

        Ok(ScanOutcome::Recorded {
            snapshot,
            packages,
            output,
            execution_error,
        })
    }

    /// Plans, dispatches and records an update.
    ///
    /// An empty plan is rejected before the inventory is touched. A failed playbook run is
    /// still recorded, with statuses classified from whatever output the failure carried.
    pub async fn update(
        &self,
        id: MachineId,
        selection: &UpdateSelection,
    ) -> OrchestrationResult<UpdateReport> {
        let machine = self.machine(id)?;
        let packages = self.latest_packages(id)?;
        let plan = build_plan(selection, &packages).map_err(|error| error.machine(id))?;

        self.sync_inventory()?;

        let packages_var = serde_json::to_value(plan.execution_list()).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to encode update package list: {error}"),
            )
            .machine(id)
            .operation(Operation::Update)
        })?;
        let request = PlaybookRequest::new(
            id,
            Operation::Update,
            &self.settings.update_playbook,
            machine.hostname.as_str(),
            self.settings.timeout,
        )
        .extra_var("packages", packages_var);

        tracing::info!(
            machine = id.0,
            hostname = %machine.hostname,
            packages = plan.len(),
            "dispatching update"
        );
        let (raw_output, execution_error) = match self.executor.run_playbook(request).await {
            Ok(output) => (output, None),
            Err(error) if error.kind == CoreErrorKind::ProcessFailure => {
                tracing::warn!(
                    machine = id.0,
                    kind = ?error.kind,
                    "update playbook failed; recording outcome from its output"
                );
                (error.message.clone(), Some(error))
            }
            Err(error) => return Err(error),
        };

        let mut run = self.classifier.classify_run(&raw_output);
        if execution_error.is_some() && run.status != RunStatus::Timeout {
            run.status = RunStatus::Failed;
        }

        let records =
            self.history
                .record(id, &plan.display_list(), &raw_output, SystemTime::now())?;
        tracing::info!(
            machine = id.0,
            status = ?run.status,
            records = records.len(),
            "update recorded"
        );

        Ok(UpdateReport {
            machine,
            run,
            records,
            raw_output,
            execution_error,
        })
    }
}

fn machine_not_found(id: MachineId) -> CoreError {
    CoreError::new(CoreErrorKind::NotFound, format!("machine {id} not found")).machine(id)
}

/// Inventory lines are whitespace separated, so registry fields may not contain any.
fn inventory_field<'a>(name: &str, value: &'a str) -> OrchestrationResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("{name} must not be empty"),
        ));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("{name} '{value}' must not contain whitespace"),
        ));
    }
    Ok(value)
}

/// Hostnames also name the scan report file, so they must stay inside the report directory.
fn hostname_field(value: &str) -> OrchestrationResult<&str> {
    let value = inventory_field("hostname", value)?;
    if value.contains(['/', '\\']) || value.contains("..") {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("hostname '{value}' must not contain path separators or '..'"),
        ));
    }
    Ok(value)
}
