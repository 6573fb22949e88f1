pub mod playbook;
pub mod tokio_process;

pub use playbook::{
    AnsiblePlaybookExecutor, PlaybookExecutor, PlaybookFuture, PlaybookRequest,
    TIMEOUT_SENTINEL_PREFIX, timeout_sentinel,
};
pub use tokio_process::TokioProcessExecutor;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use crate::models::{CoreError, CoreErrorKind, MachineId, Operation};

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// First reason this command cannot be handed to the OS, if any.
    fn problem(&self) -> Option<&'static str> {
        if self.program.as_os_str().is_empty() {
            return Some("command program path must not be empty");
        }
        if self
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            return Some("command args must be non-empty and must not contain NUL bytes");
        }
        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains('\0') || value.contains('\0'))
        {
            return Some(
                "environment keys and values must be non-empty and must not contain NUL bytes",
            );
        }
        None
    }
}

/// Shell-like rendering for logs. Arguments are not quoted.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub machine: Option<MachineId>,
    pub operation: Operation,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
    pub requested_at: SystemTime,
}

impl ProcessSpawnRequest {
    pub fn new(operation: Operation, command: CommandSpec) -> Self {
        Self {
            machine: None,
            operation,
            command,
            timeout: None,
            requested_at: SystemTime::now(),
        }
    }

    pub fn machine(mut self, machine: MachineId) -> Self {
        self.machine = Some(machine);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        let problem = self.command.problem().or_else(|| {
            self.timeout
                .filter(Duration::is_zero)
                .map(|_| "timeout must be greater than zero when provided")
        });

        match problem {
            Some(message) => Err(CoreError {
                machine: self.machine,
                operation: Some(self.operation),
                kind: CoreErrorKind::InvalidInput,
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl ProcessOutput {
    /// stdout followed by stderr when stderr carries anything besides whitespace.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }
}

pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::{CommandSpec, ProcessExitStatus, ProcessOutput};

    fn output(stdout: &str, stderr: &str) -> ProcessOutput {
        let now = SystemTime::now();
        ProcessOutput {
            status: ProcessExitStatus::ExitCode(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn combined_text_separates_streams_with_a_newline() {
        assert_eq!(output("ok", "warn\n").combined_text(), "ok\nwarn\n");
        assert_eq!(output("ok\n", "warn").combined_text(), "ok\nwarn");
        assert_eq!(output("", "warn").combined_text(), "warn");
        assert_eq!(output("ok\n", "\n  ").combined_text(), "ok\n");
    }

    #[test]
    fn command_renders_program_and_args() {
        let command = CommandSpec::new("ansible-playbook")
            .args(["scan.yml", "-i", "inventory.ini"])
            .env("ANSIBLE_NOCOLOR", "1");
        assert_eq!(command.to_string(), "ansible-playbook scan.yml -i inventory.ini");
    }
}
