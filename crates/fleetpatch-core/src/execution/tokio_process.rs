use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, MachineId, Operation};

/// How long pipe readers may keep draining once the child has exited. Hosts reached over ssh
/// can leave control-master descendants holding stdout open well past the playbook's exit;
/// whatever arrived before the deadline is kept.
const PIPE_DRAIN_DEADLINE: Duration = Duration::from_millis(250);

/// Grace given to a killed process group to be reaped after a timeout.
const REAP_DEADLINE: Duration = Duration::from_secs(1);

/// Spawns commands with tokio, each in its own process group so a timeout can take down
/// everything the playbook started.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let scope = DispatchScope {
            machine: request.machine,
            operation: request.operation,
        };
        let command = &request.command;

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            scope.failure(format!(
                "failed to spawn '{}': {error}",
                command.program.display()
            ))
        })?;
        let pid = child.id();

        tracing::debug!(
            machine = ?scope.machine,
            operation = scope.operation.as_str(),
            pid = ?pid,
            command = %command,
            "spawned process"
        );

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at: SystemTime::now(),
            timeout: request.timeout,
            scope,
        }))
    }
}

#[derive(Clone, Copy, Debug)]
struct DispatchScope {
    machine: Option<MachineId>,
    operation: Operation,
}

impl DispatchScope {
    fn failure(self, message: String) -> CoreError {
        self.error(CoreErrorKind::ProcessFailure, message)
    }

    fn error(self, kind: CoreErrorKind, message: String) -> CoreError {
        CoreError {
            machine: self.machine,
            operation: Some(self.operation),
            kind,
            message,
        }
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    scope: DispatchScope,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let Self {
            child,
            pid,
            started_at,
            timeout,
            scope,
        } = *self;
        let child = child.into_inner().ok().flatten();

        Box::pin(async move {
            let mut child = child
                .ok_or_else(|| scope.failure("child process already consumed".to_string()))?;

            let stdout_reader = drain(child.stdout.take());
            let stderr_reader = drain(child.stderr.take());

            let exited = match timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
                None => Some(child.wait().await),
            };

            let Some(exited) = exited else {
                if let Some(pid) = pid {
                    if let Err(message) = kill_group(pid) {
                        tracing::warn!(
                            machine = ?scope.machine,
                            pid,
                            %message,
                            "failed to kill timed out process group"
                        );
                    }
                }
                let _ = tokio::time::timeout(REAP_DEADLINE, child.wait()).await;
                stdout_reader.task.abort();
                stderr_reader.task.abort();

                let limit = timeout.unwrap_or_default();
                return Err(scope.error(
                    CoreErrorKind::Timeout,
                    format!("process timed out after {}ms", limit.as_millis()),
                ));
            };
            let exit = exited
                .map_err(|error| scope.failure(format!("failed to wait for process: {error}")))?;

            let stdout = collect(stdout_reader).await;
            let stderr = collect(stderr_reader).await;

            Ok(ProcessOutput {
                status: match exit.code() {
                    Some(code) => ProcessExitStatus::ExitCode(code),
                    None => ProcessExitStatus::Terminated,
                },
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

/// A pipe being read in the background. Chunks land in `received` as they arrive, so a reader
/// cut off by the drain deadline still hands back everything read so far.
struct PipeReader {
    task: JoinHandle<()>,
    received: Arc<Mutex<Vec<u8>>>,
}

fn drain<R>(pipe: Option<R>) -> PipeReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0_u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => match sink.lock() {
                    Ok(mut buffer) => buffer.extend_from_slice(&chunk[..read]),
                    Err(_) => break,
                },
            }
        }
    });
    PipeReader { task, received }
}

async fn collect(reader: PipeReader) -> Vec<u8> {
    let PipeReader { mut task, received } = reader;
    if tokio::time::timeout(PIPE_DRAIN_DEADLINE, &mut task)
        .await
        .is_err()
    {
        task.abort();
    }
    received
        .lock()
        .map(|mut buffer| std::mem::take(&mut *buffer))
        .unwrap_or_default()
}

#[cfg(unix)]
fn kill_group(pid: u32) -> Result<(), String> {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return Err(format!("process id {pid} is out of range"));
    };

    // SAFETY: kill(2) with a negated pgid only signals the group the child leads.
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            return Err(format!(
                "failed to kill process group {pid}: {os_error}"
            ));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_group(pid: u32) -> Result<(), String> {
    Err(format!(
        "killing process group {pid} is only supported on unix"
    ))
}
