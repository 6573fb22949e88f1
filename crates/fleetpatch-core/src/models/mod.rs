pub mod error;
pub mod machine;
pub mod package;
pub mod scan;
pub mod update;

pub use error::{CoreError, CoreErrorKind, Operation};
pub use machine::{Machine, MachineId, NewMachine};
pub use package::{LATEST_VERSION, PackageState, PackageVersion, PlannedPackage, RequestedVersion};
pub use scan::{ScanId, ScanPayload, ScanSnapshot, VersionListResult};
pub use update::{
    NewUpdateRecord, RunOutcome, RunStatus, UpdateRecord, UpdateRecordId, UpdateSelection,
    UpdateStatus,
};
