use std::collections::HashMap;

use crate::models::{PackageState, ScanPayload, VersionListResult};

const LISTING_HEADER_PREFIX: &str = "Listing";
const UPGRADABLE_FROM_FRAGMENT: &str = "[upgradable from:";
const UPGRADABLE_FROM_LABEL: &str = "upgradable from:";

pub fn parse_scan_payload(payload: &ScanPayload) -> Vec<PackageState> {
    parse_upgradable(&payload.upgradable, &payload.version_list)
}

/// Turns `apt list --upgradable` lines plus per-package `apt-cache madison` output into
/// package states. Never fails; fragments that cannot be read are left empty.
///
/// Duplicate package lines are kept as separate entries, in input order.
pub fn parse_upgradable<S: AsRef<str>>(
    upgradable_lines: &[S],
    version_list_results: &[VersionListResult],
) -> Vec<PackageState> {
    let versions = candidate_versions(version_list_results);

    upgradable_lines
        .iter()
        .filter_map(|line| parse_upgradable_line(line.as_ref()))
        .map(|(name, current_version, upgrade_from_version)| {
            let available_versions = versions.get(name.as_str()).cloned().unwrap_or_default();
            PackageState {
                name,
                current_version,
                upgrade_from_version,
                available_versions,
            }
        })
        .collect()
}

fn candidate_versions(results: &[VersionListResult]) -> HashMap<&str, Vec<String>> {
    let mut versions = HashMap::new();

    for result in results {
        let Some(name) = result.item.as_deref().filter(|item| !item.is_empty()) else {
            continue;
        };

        let choices = result
            .stdout
            .lines()
            .filter_map(|line| line.split('|').nth(1))
            .map(|field| field.trim().to_string())
            .collect();

        versions.insert(name, choices);
    }

    versions
}

fn parse_upgradable_line(line: &str) -> Option<(String, String, Option<String>)> {
    if line.is_empty() || line.starts_with(LISTING_HEADER_PREFIX) {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let (Some(first), Some(second)) = (tokens.next(), tokens.next()) else {
        return None;
    };

    let name = first.split('/').next().unwrap_or(first).to_string();
    let upgrade_from = if line.contains(UPGRADABLE_FROM_FRAGMENT) {
        parse_upgradable_from(line)
    } else {
        None
    };

    Some((name, second.to_string(), upgrade_from))
}

fn parse_upgradable_from(line: &str) -> Option<String> {
    let start = line.find(UPGRADABLE_FROM_FRAGMENT)?;
    let fragment = &line[start..];
    let after_label = &fragment[fragment.find(UPGRADABLE_FROM_LABEL)? + UPGRADABLE_FROM_LABEL.len()..];
    let (version, _) = after_label.split_once(']')?;
    let version = version.trim();

    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_scan_payload, parse_upgradable};
    use crate::models::{ScanPayload, VersionListResult};

    fn version_list(item: &str, stdout: &str) -> VersionListResult {
        VersionListResult {
            item: Some(item.to_string()),
            stdout: stdout.to_string(),
        }
    }

    #[test]
    fn parses_upgradable_line_with_madison_versions() {
        let parsed = parse_upgradable(
            &["pkg-a/stable 2.0.1 [upgradable from: 1.9.0]"],
            &[version_list(
                "pkg-a",
                "pkg-a | 2.0.1 | repo\npkg-a | 2.0.0 | repo",
            )],
        );

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "pkg-a");
        assert_eq!(parsed[0].current_version, "2.0.1");
        assert_eq!(parsed[0].upgrade_from_version.as_deref(), Some("1.9.0"));
        assert_eq!(parsed[0].available_versions, vec!["2.0.1", "2.0.0"]);
    }

    #[test]
    fn parses_real_apt_output_with_architecture_column() {
        let lines = [
            "Listing... Done",
            "openssl/jammy-updates,jammy-security 3.0.2-0ubuntu1.15 amd64 [upgradable from: 3.0.2-0ubuntu1.14]",
            "",
            "tzdata/jammy-updates 2024a-0ubuntu0.22.04 all [upgradable from: 2023c-0ubuntu0.22.04.2]",
        ];
        let parsed = parse_upgradable(&lines, &[]);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "openssl");
        assert_eq!(parsed[0].current_version, "3.0.2-0ubuntu1.15");
        assert_eq!(
            parsed[0].upgrade_from_version.as_deref(),
            Some("3.0.2-0ubuntu1.14")
        );
        assert!(parsed[0].available_versions.is_empty());
        assert_eq!(parsed[1].name, "tzdata");
    }

    #[test]
    fn skips_header_blank_and_single_token_lines() {
        let parsed = parse_upgradable(&["Listing...", "", "lonely-token", "   "], &[]);
        assert!(parsed.is_empty());
    }

    #[test]
    fn malformed_upgradable_from_fragments_degrade_to_none() {
        let parsed = parse_upgradable(
            &[
                "a/x 1.0 [upgradable from: 0.9",
                "b/x 2.0 [upgradable from: ]",
                "c/x 3.0 [upgradable from:]",
                "d/x 4.0 upgradable from: 3.9]",
            ],
            &[],
        );

        assert_eq!(parsed.len(), 4);
        assert!(parsed.iter().all(|p| p.upgrade_from_version.is_none()));
    }

    #[test]
    fn text_after_closing_bracket_is_ignored() {
        let parsed = parse_upgradable(&["a/x 1.0 [upgradable from: 0.9] (held)"], &[]);
        assert_eq!(parsed[0].upgrade_from_version.as_deref(), Some("0.9"));
    }

    #[test]
    fn name_without_suite_suffix_is_taken_whole() {
        let parsed = parse_upgradable(&["vim 9.0"], &[]);
        assert_eq!(parsed[0].name, "vim");
        assert_eq!(parsed[0].current_version, "9.0");
    }

    #[test]
    fn duplicate_package_lines_are_preserved_in_order() {
        let parsed = parse_upgradable(
            &["curl/jammy 8.0 amd64", "curl/jammy-security 8.1 amd64"],
            &[version_list("curl", "curl | 8.1 | sec\ncurl | 8.0 | main")],
        );

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].current_version, "8.0");
        assert_eq!(parsed[1].current_version, "8.1");
        assert_eq!(parsed[0].available_versions, parsed[1].available_versions);
    }

    #[test]
    fn version_lines_without_pipe_and_entries_without_item_are_skipped() {
        let parsed = parse_upgradable(
            &["a/x 1.0", "b/x 2.0"],
            &[
                version_list("a", "no pipes here\na | 1.0 | repo\n"),
                VersionListResult {
                    item: None,
                    stdout: "b | 2.0 | repo".to_string(),
                },
            ],
        );

        assert_eq!(parsed[0].available_versions, vec!["1.0"]);
        assert!(parsed[1].available_versions.is_empty());
    }

    #[test]
    fn parses_decoded_scan_payload() {
        let payload = ScanPayload::from_json(
            r#"{"upgradable":["git/jammy 1:2.34.1 amd64 [upgradable from: 1:2.34.0]"],
                "version_list":[{"item":"git","stdout":" git | 1:2.34.1 | http://archive"}]}"#,
        );
        let parsed = parse_scan_payload(&payload);

        assert_eq!(parsed[0].name, "git");
        assert_eq!(parsed[0].upgrade_from_version.as_deref(), Some("1:2.34.0"));
        assert_eq!(parsed[0].available_versions, vec!["1:2.34.1"]);
    }
}
