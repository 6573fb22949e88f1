use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessSpawnRequest,
    spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind, MachineId, Operation};

/// Prefix of the text returned in place of playbook output when a run exceeds its timeout.
pub const TIMEOUT_SENTINEL_PREFIX: &str = "Timed out after";

pub type PlaybookFuture = Pin<Box<dyn Future<Output = ExecutionResult<String>> + Send>>;

pub fn timeout_sentinel(timeout: Duration) -> String {
    format!("{TIMEOUT_SENTINEL_PREFIX} {}s", timeout.as_secs())
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybookRequest {
    pub machine: MachineId,
    pub operation: Operation,
    pub playbook: PathBuf,
    /// Inventory hostname the playbook limits itself to.
    pub target: String,
    pub extra_vars: Map<String, Value>,
    pub timeout: Duration,
}

impl PlaybookRequest {
    pub fn new(
        machine: MachineId,
        operation: Operation,
        playbook: impl Into<PathBuf>,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            machine,
            operation,
            playbook: playbook.into(),
            target: target.into(),
            extra_vars: Map::new(),
            timeout,
        }
    }

    pub fn extra_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_vars.insert(key.into(), value);
        self
    }
}

/// Runs a playbook against one host and returns its combined stdout and stderr.
///
/// Implementations fail with [`CoreErrorKind::ProcessFailure`] when the run exits non-zero or
/// cannot be started, and resolve to [`timeout_sentinel`] text instead of failing when the
/// run exceeds `request.timeout`.
pub trait PlaybookExecutor: Send + Sync {
    fn run_playbook(&self, request: PlaybookRequest) -> PlaybookFuture;
}

pub struct AnsiblePlaybookExecutor {
    executor: Arc<dyn ProcessExecutor>,
    program: PathBuf,
    inventory_path: PathBuf,
}

impl AnsiblePlaybookExecutor {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        program: impl Into<PathBuf>,
        inventory_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            program: program.into(),
            inventory_path: inventory_path.into(),
        }
    }

    fn command(&self, request: &PlaybookRequest) -> ExecutionResult<CommandSpec> {
        let mut vars = request.extra_vars.clone();
        vars.insert("target".to_string(), Value::String(request.target.clone()));
        let encoded = serde_json::to_string(&Value::Object(vars)).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to encode playbook extra vars: {error}"),
            )
            .machine(request.machine)
            .operation(request.operation)
        })?;

        Ok(CommandSpec::new(&self.program)
            .arg(request.playbook.display().to_string())
            .arg("-i")
            .arg(self.inventory_path.display().to_string())
            .arg("--extra-vars")
            .arg(encoded))
    }
}

impl PlaybookExecutor for AnsiblePlaybookExecutor {
    fn run_playbook(&self, request: PlaybookRequest) -> PlaybookFuture {
        let machine = request.machine;
        let operation = request.operation;
        let timeout = request.timeout;
        let program = self.program.display().to_string();

        let spawned = self.command(&request).and_then(|command| {
            let spawn_request = ProcessSpawnRequest::new(operation, command)
                .machine(machine)
                .timeout(timeout);
            spawn_validated(self.executor.as_ref(), spawn_request)
        });

        Box::pin(async move {
            let process = spawned?;
            let output = match process.wait().await {
                Ok(output) => output,
                Err(error) if error.kind == CoreErrorKind::Timeout => {
                    tracing::warn!(
                        machine = machine.0,
                        operation = operation.as_str(),
                        timeout_secs = timeout.as_secs(),
                        "playbook run timed out"
                    );
                    return Ok(timeout_sentinel(timeout));
                }
                Err(error) => return Err(error),
            };

            let text = output.combined_text();
            match output.status {
                ProcessExitStatus::ExitCode(0) => Ok(text),
                ProcessExitStatus::ExitCode(code) => Err(CoreError::new(
                    CoreErrorKind::ProcessFailure,
                    format!("{program} exited with code {code}\n{text}"),
                )
                .machine(machine)
                .operation(operation)),
                ProcessExitStatus::Terminated => Err(CoreError::new(
                    CoreErrorKind::ProcessFailure,
                    format!("{program} was terminated by signal\n{text}"),
                )
                .machine(machine)
                .operation(operation)),
            }
        })
    }
}
