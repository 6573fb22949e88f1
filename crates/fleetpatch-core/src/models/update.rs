use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::{MachineId, RequestedVersion};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct UpdateRecordId(pub u64);

/// What the operator asked to update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpdateSelection {
    AllLatest,
    Packages(BTreeMap<String, RequestedVersion>),
}

impl UpdateSelection {
    pub fn packages<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, RequestedVersion)>,
        N: Into<String>,
    {
        Self::Packages(
            entries
                .into_iter()
                .map(|(name, version)| (name.into(), version))
                .collect(),
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    Failed,
    Skipped,
    Unknown,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Timeout,
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub recap_line: Option<String>,
}

impl RunOutcome {
    pub fn unknown() -> Self {
        Self {
            status: RunStatus::Unknown,
            recap_line: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewUpdateRecord {
    pub machine_id: MachineId,
    pub created_at: SystemTime,
    pub package: String,
    pub version: String,
    pub status: UpdateStatus,
    pub raw_output: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateRecord {
    pub id: UpdateRecordId,
    pub machine_id: MachineId,
    pub created_at: SystemTime,
    pub package: String,
    pub version: String,
    pub status: UpdateStatus,
    pub raw_output: String,
}
