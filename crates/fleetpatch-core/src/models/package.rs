use serde::{Deserialize, Serialize};

/// Version sentinel understood by the update playbook as "newest available".
pub const LATEST_VERSION: &str = "latest";

/// One upgradable package as reported by the most recent scan of a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageState {
    pub name: String,
    pub current_version: String,
    pub upgrade_from_version: Option<String>,
    pub available_versions: Vec<String>,
}

impl PackageState {
    pub fn known_current_version(&self) -> Option<&str> {
        let version = self.current_version.trim();
        if version.is_empty() {
            None
        } else {
            Some(version)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RequestedVersion {
    Latest,
    Exact(String),
}

impl RequestedVersion {
    /// Blank input and the literal `latest` both mean [`RequestedVersion::Latest`].
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == LATEST_VERSION {
            Self::Latest
        } else {
            Self::Exact(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Latest => LATEST_VERSION,
            Self::Exact(version) => version.as_str(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub name: String,
    pub version: String,
}

/// A package in an update plan, carrying the version sent to the executor and the
/// version shown to operators and written to history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedPackage {
    pub name: String,
    pub execution_version: String,
    pub display_version: String,
}
