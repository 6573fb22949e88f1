pub mod fleet;

pub use fleet::{DispatchSettings, FleetOrchestrator};

use std::sync::Arc;

use crate::models::{CoreError, Machine, PackageState, RunOutcome, ScanSnapshot, UpdateRecord};
use crate::persistence::{MachineStore, ScanStore, UpdateHistoryStore};

pub type OrchestrationResult<T> = Result<T, CoreError>;

/// Repositories the orchestrator reads and writes through.
#[derive(Clone)]
pub struct FleetStores {
    pub machines: Arc<dyn MachineStore>,
    pub scans: Arc<dyn ScanStore>,
    pub history: Arc<dyn UpdateHistoryStore>,
}

impl FleetStores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: MachineStore + ScanStore + UpdateHistoryStore + 'static,
    {
        Self {
            machines: store.clone(),
            scans: store.clone(),
            history: store,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnrollmentOutcome {
    pub machine: Machine,
    pub created: bool,
}

/// What a scan dispatch produced. A playbook that exits non-zero still has its report stored
/// when it wrote one; `execution_error` then carries the failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanOutcome {
    Recorded {
        snapshot: ScanSnapshot,
        packages: Vec<PackageState>,
        output: String,
        execution_error: Option<CoreError>,
    },
    /// The playbook ran but left no report behind; `output` is what it printed.
    MissingReport {
        output: String,
        execution_error: Option<CoreError>,
    },
}

impl ScanOutcome {
    pub fn execution_error(&self) -> Option<&CoreError> {
        match self {
            Self::Recorded {
                execution_error, ..
            }
            | Self::MissingReport {
                execution_error, ..
            } => execution_error.as_ref(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateReport {
    pub machine: Machine,
    pub run: RunOutcome,
    /// One row per planned package, in plan order.
    pub records: Vec<UpdateRecord>,
    pub raw_output: String,
    pub execution_error: Option<CoreError>,
}
