use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::models::{CoreError, CoreErrorKind, Machine};

const INVENTORY_HEADER: &str = "# managed by fleetpatch; regenerated before every dispatch\n";
const INVENTORY_GROUP: &str = "[fleet]\n";

/// Writes the Ansible inventory the playbooks run against.
#[derive(Clone, Debug)]
pub struct InventorySynchronizer {
    inventory_path: PathBuf,
}

impl InventorySynchronizer {
    pub fn new(inventory_path: impl Into<PathBuf>) -> Self {
        Self {
            inventory_path: inventory_path.into(),
        }
    }

    pub fn inventory_path(&self) -> &Path {
        &self.inventory_path
    }

    /// Replaces the inventory file with one entry per machine. Output depends only on the
    /// machines passed in, so the same registry always produces the same bytes.
    pub fn sync(&self, machines: &[Machine]) -> Result<(), CoreError> {
        let contents = render_inventory(machines);

        let parent = match self.inventory_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|error| {
            configuration_error(format!(
                "failed to create inventory directory '{}': {error}",
                parent.display()
            ))
        })?;

        // Each sync stages its own file, so concurrent syncs never publish a partial write.
        let mut staged = NamedTempFile::new_in(parent).map_err(|error| {
            configuration_error(format!(
                "failed to stage inventory in '{}': {error}",
                parent.display()
            ))
        })?;
        staged.write_all(contents.as_bytes()).map_err(|error| {
            configuration_error(format!(
                "failed to write inventory '{}': {error}",
                staged.path().display()
            ))
        })?;
        staged.persist(&self.inventory_path).map_err(|error| {
            configuration_error(format!(
                "failed to replace inventory '{}': {}",
                self.inventory_path.display(),
                error.error
            ))
        })?;

        tracing::debug!(
            path = %self.inventory_path.display(),
            machines = machines.len(),
            "inventory rebuilt"
        );
        Ok(())
    }
}

pub fn render_inventory(machines: &[Machine]) -> String {
    let mut ordered: Vec<&Machine> = machines.iter().collect();
    ordered.sort_by_key(|machine| machine.id);

    let mut contents = String::from(INVENTORY_HEADER);
    contents.push_str(INVENTORY_GROUP);
    for machine in ordered {
        contents.push_str(&format!(
            "{} ansible_host={} ansible_user={}\n",
            machine.hostname, machine.ip, machine.username
        ));
    }
    contents
}

fn configuration_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::Configuration, message)
}
