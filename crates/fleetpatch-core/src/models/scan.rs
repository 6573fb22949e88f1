use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::MachineId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ScanId(pub u64);

/// A stored scan report. `payload` is kept verbatim; package states are derived from it on read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanSnapshot {
    pub id: ScanId,
    pub machine_id: MachineId,
    pub created_at: SystemTime,
    pub payload: String,
}

impl ScanSnapshot {
    pub fn decode(&self) -> ScanPayload {
        ScanPayload::from_json(&self.payload)
    }
}

/// Output of `apt-cache madison`-style version listing for one package.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionListResult {
    pub item: Option<String>,
    pub stdout: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanPayload {
    pub upgradable: Vec<String>,
    pub version_list: Vec<VersionListResult>,
}

impl ScanPayload {
    /// Decodes a scan report without ever failing: anything that does not have the
    /// expected shape is dropped rather than reported.
    pub fn from_json(raw: &str) -> Self {
        let Ok(Value::Object(root)) = serde_json::from_str::<Value>(raw) else {
            return Self::default();
        };

        let upgradable = root
            .get("upgradable")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let version_list = root
            .get("version_list")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|entry| VersionListResult {
                        item: entry
                            .get("item")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        stdout: entry
                            .get("stdout")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            upgradable,
            version_list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScanPayload;

    #[test]
    fn decodes_well_formed_report() {
        let payload = ScanPayload::from_json(
            r#"{"upgradable":["Listing...","curl/jammy 8.0 amd64"],
                "version_list":[{"item":"curl","stdout":"curl | 8.0 | repo"}]}"#,
        );
        assert_eq!(payload.upgradable.len(), 2);
        assert_eq!(payload.version_list[0].item.as_deref(), Some("curl"));
        assert_eq!(payload.version_list[0].stdout, "curl | 8.0 | repo");
    }

    #[test]
    fn invalid_json_degrades_to_empty_payload() {
        assert_eq!(ScanPayload::from_json("{not json"), ScanPayload::default());
        assert_eq!(ScanPayload::from_json("[1, 2]"), ScanPayload::default());
    }

    #[test]
    fn wrongly_typed_fields_are_dropped_individually() {
        let payload = ScanPayload::from_json(
            r#"{"upgradable":["a/x 1.0", 7, null],
                "version_list":[{"item": 3, "stdout": "a | 1.0"}, "junk", {"item":"b"}]}"#,
        );
        assert_eq!(payload.upgradable, vec!["a/x 1.0".to_string()]);
        assert_eq!(payload.version_list.len(), 2);
        assert_eq!(payload.version_list[0].item, None);
        assert_eq!(payload.version_list[1].item.as_deref(), Some("b"));
        assert!(payload.version_list[1].stdout.is_empty());
    }
}
