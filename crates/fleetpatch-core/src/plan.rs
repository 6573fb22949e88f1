use crate::models::{
    CoreError, CoreErrorKind, LATEST_VERSION, Operation, PackageState, PackageVersion,
    PlannedPackage, RequestedVersion, UpdateSelection,
};

/// Execution and display views of one selection. Both lists come from the same
/// entries, so index `i` always refers to the same package in either list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdatePlan {
    packages: Vec<PlannedPackage>,
}

impl UpdatePlan {
    pub fn packages(&self) -> &[PlannedPackage] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// What the update playbook is asked to install; unresolved versions stay `latest`.
    pub fn execution_list(&self) -> Vec<PackageVersion> {
        self.packages
            .iter()
            .map(|package| PackageVersion {
                name: package.name.clone(),
                version: package.execution_version.clone(),
            })
            .collect()
    }

    /// What operators see and what history records.
    pub fn display_list(&self) -> Vec<PackageVersion> {
        self.packages
            .iter()
            .map(|package| PackageVersion {
                name: package.name.clone(),
                version: package.display_version.clone(),
            })
            .collect()
    }
}

/// Resolves a selection against the packages known from the latest scan.
///
/// Selected names that the scan does not know about are dropped. A selection that leaves
/// nothing to do is rejected with [`CoreErrorKind::InvalidSelection`].
pub fn build_plan(
    selection: &UpdateSelection,
    latest_packages: &[PackageState],
) -> Result<UpdatePlan, CoreError> {
    let packages: Vec<PlannedPackage> = match selection {
        UpdateSelection::AllLatest => latest_packages
            .iter()
            .map(|state| PlannedPackage {
                name: state.name.clone(),
                execution_version: LATEST_VERSION.to_string(),
                display_version: scanned_version(state),
            })
            .collect(),
        UpdateSelection::Packages(requested) => latest_packages
            .iter()
            .filter_map(|state| {
                let version = requested.get(&state.name)?;
                let display_version = match version {
                    RequestedVersion::Latest => scanned_version(state),
                    RequestedVersion::Exact(exact) => exact.clone(),
                };
                Some(PlannedPackage {
                    name: state.name.clone(),
                    execution_version: version.as_str().to_string(),
                    display_version,
                })
            })
            .collect(),
    };

    if packages.is_empty() {
        return Err(CoreError::new(
            CoreErrorKind::InvalidSelection,
            "no packages selected for update",
        )
        .operation(Operation::Update));
    }

    Ok(UpdatePlan { packages })
}

fn scanned_version(state: &PackageState) -> String {
    state
        .known_current_version()
        .unwrap_or(LATEST_VERSION)
        .to_string()
}
