use crate::execution::TIMEOUT_SENTINEL_PREFIX;
use crate::models::{RunOutcome, RunStatus, UpdateStatus};

const FAILED_COUNTER: &str = "failed=";
const UNREACHABLE_COUNTER: &str = "unreachable=";

/// Interprets the combined output of one playbook run.
///
/// The text-matching implementation keeps two different rules: the run summary takes the
/// *last* recap line, a package takes the *first* line mentioning it.
pub trait OutcomeClassifier: Send + Sync {
    fn classify_run(&self, raw_output: &str) -> RunOutcome;

    fn classify_package(&self, raw_output: &str, package: &str) -> UpdateStatus;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextOutcomeClassifier;

impl OutcomeClassifier for TextOutcomeClassifier {
    fn classify_run(&self, raw_output: &str) -> RunOutcome {
        classify_run(raw_output)
    }

    fn classify_package(&self, raw_output: &str, package: &str) -> UpdateStatus {
        classify_package(raw_output, package)
    }
}

pub fn classify_run(raw_output: &str) -> RunOutcome {
    if raw_output.is_empty() {
        return RunOutcome::unknown();
    }

    if raw_output.starts_with(TIMEOUT_SENTINEL_PREFIX) {
        return RunOutcome {
            status: RunStatus::Timeout,
            recap_line: None,
        };
    }

    let Some(recap) = raw_output.lines().filter(|line| is_recap_line(line)).last() else {
        return RunOutcome::unknown();
    };

    let failed = counter_value(recap, FAILED_COUNTER);
    let unreachable = counter_value(recap, UNREACHABLE_COUNTER);
    let status = if failed == 0 && unreachable == 0 {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };

    RunOutcome {
        status,
        recap_line: Some(recap.to_string()),
    }
}

pub fn classify_package(raw_output: &str, package: &str) -> UpdateStatus {
    let marker = format!("(item={package}");

    let Some(line) = raw_output.lines().find(|line| line.contains(&marker)) else {
        return UpdateStatus::Unknown;
    };

    let line = line.trim();
    if line.starts_with("failed: [") {
        UpdateStatus::Failed
    } else if line.starts_with("changed: [") || line.starts_with("ok: [") {
        UpdateStatus::Success
    } else if line.starts_with("skipping: [") {
        UpdateStatus::Skipped
    } else {
        UpdateStatus::Unknown
    }
}

fn is_recap_line(line: &str) -> bool {
    line.contains(FAILED_COUNTER) && line.contains(UNREACHABLE_COUNTER) && line.contains(':')
}

/// Value of the first `<counter><digits>` occurrence, 0 when there is none.
/// Counts too large for `u64` saturate.
fn counter_value(line: &str, counter: &str) -> u64 {
    for (index, _) in line.match_indices(counter) {
        let digits: &str = {
            let rest = &line[index + counter.len()..];
            let end = rest
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(rest.len());
            &rest[..end]
        };
        if !digits.is_empty() {
            return digits.parse().unwrap_or(u64::MAX);
        }
    }
    0
}
