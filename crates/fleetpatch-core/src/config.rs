use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

pub const CONFIG_ENV_VAR: &str = "FLEETPATCH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "fleetpatch.toml";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub database_path: PathBuf,
    pub inventory_path: PathBuf,
    /// Directory the scan playbook writes `<hostname>.json` reports into.
    pub scan_report_dir: PathBuf,
    pub ansible: AnsibleConfig,
    pub enrollment: EnrollmentConfig,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnsibleConfig {
    pub program: PathBuf,
    pub scan_playbook: PathBuf,
    pub update_playbook: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrollmentConfig {
    pub default_username: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("fleetpatch.sqlite3"),
            inventory_path: PathBuf::from("ansible/inventory.ini"),
            scan_report_dir: PathBuf::from("ansible/scans"),
            ansible: AnsibleConfig::default(),
            enrollment: EnrollmentConfig::default(),
        }
    }
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ansible-playbook"),
            scan_playbook: PathBuf::from("ansible/playbook_scan.yml"),
            update_playbook: PathBuf::from("ansible/playbook_update.yml"),
            timeout_secs: 300,
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            default_username: "ansible".to_string(),
        }
    }
}

impl AnsibleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FleetConfig {
    /// Loads configuration from, in order: `explicit`, `$FLEETPATCH_CONFIG`, `./fleetpatch.toml`.
    /// Falls back to defaults when none of them is present. The first two must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            return Self::from_file(Path::new(&path));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }

        tracing::debug!("no configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            configuration_error(format!(
                "failed to read config '{}': {error}",
                path.display()
            ))
        })?;
        let config = Self::from_toml_str(&raw).map_err(|error| CoreError {
            message: format!("{} ({})", error.message, path.display()),
            ..error
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(raw)
            .map_err(|error| configuration_error(format!("invalid config: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let required_paths = [
            ("database_path", &self.database_path),
            ("inventory_path", &self.inventory_path),
            ("scan_report_dir", &self.scan_report_dir),
            ("ansible.program", &self.ansible.program),
            ("ansible.scan_playbook", &self.ansible.scan_playbook),
            ("ansible.update_playbook", &self.ansible.update_playbook),
        ];
        if let Some((name, _)) = required_paths
            .iter()
            .find(|(_, path)| path.as_os_str().is_empty())
        {
            return Err(configuration_error(format!("{name} must not be empty")));
        }

        if self.ansible.timeout_secs == 0 {
            return Err(configuration_error(
                "ansible.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.enrollment.default_username.trim().is_empty() {
            return Err(configuration_error(
                "enrollment.default_username must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Location the scan playbook writes the report for `hostname` to.
    pub fn scan_report_path(&self, hostname: &str) -> PathBuf {
        self.scan_report_dir.join(format!("{hostname}.json"))
    }
}

fn configuration_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::Configuration, message)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::FleetConfig;
    use crate::models::CoreErrorKind;

    #[test]
    fn empty_document_yields_defaults() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.ansible.timeout(), Duration::from_secs(300));
        assert_eq!(config.enrollment.default_username, "ansible");
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = FleetConfig::from_toml_str(
            r#"
database_path = "/var/lib/fleetpatch/fleet.db"

[ansible]
timeout_secs = 900
"#,
        )
        .unwrap();

        assert_eq!(
            config.database_path,
            PathBuf::from("/var/lib/fleetpatch/fleet.db")
        );
        assert_eq!(config.ansible.timeout_secs, 900);
        assert_eq!(config.ansible.program, PathBuf::from("ansible-playbook"));
        assert_eq!(config.inventory_path, PathBuf::from("ansible/inventory.ini"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let error = FleetConfig::from_toml_str("[ansible]\ntimeout_secs = 0\n").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Configuration);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = FleetConfig::from_toml_str("inventory = \"x\"\n").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Configuration);
    }

    #[test]
    fn blank_default_username_is_rejected() {
        let error =
            FleetConfig::from_toml_str("[enrollment]\ndefault_username = \" \"\n").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Configuration);
    }

    #[test]
    fn explicit_missing_file_is_a_configuration_error() {
        let error =
            FleetConfig::load(Some(Path::new("/nonexistent/fleetpatch/config.toml"))).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Configuration);
        assert!(error.message.contains("/nonexistent/fleetpatch/config.toml"));
    }

    #[test]
    fn scan_report_path_uses_hostname() {
        let config = FleetConfig::default();
        assert_eq!(
            config.scan_report_path("web-1"),
            PathBuf::from("ansible/scans/web-1.json")
        );
    }
}
