use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fleetpatch_core::execution::{
    AnsiblePlaybookExecutor, CommandSpec, ExecutionResult, PlaybookExecutor, PlaybookRequest,
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest, ProcessWaitFuture,
    RunningProcess, spawn_validated,
};
use fleetpatch_core::models::{CoreError, CoreErrorKind, MachineId, Operation};

#[derive(Clone)]
enum FakeWait {
    Output(ProcessOutput),
    Error(CoreError),
}

#[derive(Clone)]
struct FakeExecutor {
    captured: Arc<Mutex<Option<ProcessSpawnRequest>>>,
    wait: FakeWait,
    spawn_count: Arc<Mutex<usize>>,
}

impl FakeExecutor {
    fn new(output: ProcessOutput) -> Self {
        Self::with_wait(FakeWait::Output(output))
    }

    fn failing(error: CoreError) -> Self {
        Self::with_wait(FakeWait::Error(error))
    }

    fn with_wait(wait: FakeWait) -> Self {
        Self {
            captured: Arc::new(Mutex::new(None)),
            wait,
            spawn_count: Arc::new(Mutex::new(0)),
        }
    }

    fn captured_request(&self) -> Option<ProcessSpawnRequest> {
        self.captured.lock().ok()?.clone()
    }

    fn spawns(&self) -> usize {
        self.spawn_count.lock().map(|count| *count).unwrap_or(0)
    }
}

struct FakeProcess {
    pid: Option<u32>,
    wait: FakeWait,
}

impl RunningProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let wait = self.wait.clone();
        Box::pin(async move {
            match wait {
                FakeWait::Output(output) => Ok(output),
                FakeWait::Error(error) => Err(error),
            }
        })
    }
}

impl ProcessExecutor for FakeExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut captured = self
            .captured
            .lock()
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "capture lock poisoned"))?;
        *captured = Some(request);
        if let Ok(mut count) = self.spawn_count.lock() {
            *count += 1;
        }

        Ok(Box::new(FakeProcess {
            pid: Some(4242),
            wait: self.wait.clone(),
        }))
    }
}

fn output(status: ProcessExitStatus, stdout: &str, stderr: &str) -> ProcessOutput {
    let now = SystemTime::now();
    ProcessOutput {
        status,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        started_at: now,
        finished_at: now,
    }
}

fn ansible(executor: &FakeExecutor) -> AnsiblePlaybookExecutor {
    AnsiblePlaybookExecutor::new(
        Arc::new(executor.clone()),
        "/usr/bin/ansible-playbook",
        "/srv/fleet/inventory.ini",
    )
}

fn update_request() -> PlaybookRequest {
    PlaybookRequest::new(
        MachineId(2),
        Operation::Update,
        "/srv/fleet/playbook_update.yml",
        "web-1",
        Duration::from_secs(300),
    )
}

#[test]
fn request_validation_rejects_empty_program() {
    let request =
        ProcessSpawnRequest::new(Operation::Scan, CommandSpec::new("")).machine(MachineId(1));

    let error = request.validate().expect_err("expected validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.machine, Some(MachineId(1)));
    assert_eq!(error.operation, Some(Operation::Scan));
}

#[test]
fn request_validation_rejects_zero_timeout() {
    let request = ProcessSpawnRequest::new(
        Operation::Update,
        CommandSpec::new("ansible-playbook").args(["playbook_update.yml", "-i", "inventory.ini"]),
    )
    .timeout(Duration::ZERO);

    let error = request
        .validate()
        .expect_err("expected timeout validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.machine, None);
    assert_eq!(error.operation, Some(Operation::Update));
}

#[test]
fn request_validation_rejects_empty_args() {
    let request = ProcessSpawnRequest::new(
        Operation::Scan,
        CommandSpec::new("ansible-playbook").arg(""),
    );

    let error = request.validate().expect_err("expected arg validation failure");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[tokio::test]
async fn validated_spawn_passes_structured_request_through() {
    let expected = output(ProcessExitStatus::ExitCode(0), "ok", "");
    let executor = FakeExecutor::new(expected.clone());

    let request = ProcessSpawnRequest::new(
        Operation::Scan,
        CommandSpec::new("/usr/bin/ansible-playbook")
            .args(["playbook_scan.yml", "-i", "inventory.ini"])
            .env("ANSIBLE_NOCOLOR", "1")
            .working_dir("/srv/fleet"),
    )
    .machine(MachineId(9))
    .timeout(Duration::from_secs(30));

    let process = spawn_validated(&executor, request.clone()).expect("spawn should succeed");
    assert_eq!(process.pid(), Some(4242));

    let waited = process.wait().await.expect("wait should succeed");
    assert_eq!(waited, expected);

    let captured = executor
        .captured_request()
        .expect("spawn request should be captured");
    assert_eq!(captured, request);
    assert_eq!(
        captured.command.working_dir,
        Some(PathBuf::from("/srv/fleet"))
    );
    assert_eq!(executor.spawns(), 1);
}

#[tokio::test]
async fn playbook_command_passes_inventory_and_extra_vars_with_target() {
    let executor = FakeExecutor::new(output(ProcessExitStatus::ExitCode(0), "PLAY RECAP\n", ""));
    let playbooks = ansible(&executor);

    let request = update_request().extra_var(
        "packages",
        serde_json::json!([{ "name": "curl", "version": "latest" }]),
    );
    let text = playbooks
        .run_playbook(request)
        .await
        .expect("playbook should succeed");
    assert_eq!(text, "PLAY RECAP\n");

    let captured = executor
        .captured_request()
        .expect("spawn request should be captured");
    assert_eq!(captured.machine, Some(MachineId(2)));
    assert_eq!(captured.operation, Operation::Update);
    assert_eq!(captured.timeout, Some(Duration::from_secs(300)));
    assert_eq!(
        captured.command.program,
        PathBuf::from("/usr/bin/ansible-playbook")
    );
    assert_eq!(
        &captured.command.args[..4],
        [
            "/srv/fleet/playbook_update.yml",
            "-i",
            "/srv/fleet/inventory.ini",
            "--extra-vars",
        ]
    );

    let vars: serde_json::Value =
        serde_json::from_str(&captured.command.args[4]).expect("extra vars should be json");
    assert_eq!(vars["target"], "web-1");
    assert_eq!(vars["packages"][0]["name"], "curl");
    assert_eq!(vars["packages"][0]["version"], "latest");
}

#[tokio::test]
async fn playbook_output_appends_non_blank_stderr() {
    let executor = FakeExecutor::new(output(
        ProcessExitStatus::ExitCode(0),
        "ok: [web-1]",
        "[WARNING]: deprecated option\n",
    ));

    let text = ansible(&executor)
        .run_playbook(update_request())
        .await
        .expect("playbook should succeed");
    assert_eq!(text, "ok: [web-1]\n[WARNING]: deprecated option\n");

    let quiet = FakeExecutor::new(output(ProcessExitStatus::ExitCode(0), "ok: [web-1]\n", " \n"));
    let text = ansible(&quiet)
        .run_playbook(update_request())
        .await
        .expect("playbook should succeed");
    assert_eq!(text, "ok: [web-1]\n");
}

#[tokio::test]
async fn non_zero_exit_is_a_process_failure_carrying_output() {
    let executor = FakeExecutor::new(output(
        ProcessExitStatus::ExitCode(2),
        "failed: [web-1] => (item=curl)\nweb-1 : ok=1 changed=0 unreachable=0 failed=1\n",
        "",
    ));

    let error = ansible(&executor)
        .run_playbook(update_request())
        .await
        .expect_err("non-zero exit should fail");
    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
    assert_eq!(error.machine, Some(MachineId(2)));
    assert_eq!(error.operation, Some(Operation::Update));
    assert!(error.message.contains("exited with code 2"));
    assert!(error.message.contains("failed: [web-1] => (item=curl)"));
}

#[tokio::test]
async fn terminated_run_is_a_process_failure() {
    let executor = FakeExecutor::new(output(ProcessExitStatus::Terminated, "", ""));

    let error = ansible(&executor)
        .run_playbook(update_request())
        .await
        .expect_err("terminated run should fail");
    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
    assert!(error.message.contains("terminated by signal"));
}

#[tokio::test]
async fn timeout_resolves_to_sentinel_text() {
    let executor = FakeExecutor::failing(
        CoreError::new(CoreErrorKind::Timeout, "process timed out after 300000ms")
            .machine(MachineId(2))
            .operation(Operation::Update),
    );

    let text = ansible(&executor)
        .run_playbook(update_request())
        .await
        .expect("timeout should resolve to sentinel text");
    assert_eq!(text, "Timed out after 300s");
}

#[tokio::test]
async fn other_wait_errors_propagate() {
    let executor = FakeExecutor::failing(CoreError::new(
        CoreErrorKind::ProcessFailure,
        "failed while waiting for process",
    ));

    let error = ansible(&executor)
        .run_playbook(update_request())
        .await
        .expect_err("wait error should propagate");
    assert_eq!(error.kind, CoreErrorKind::ProcessFailure);
}

#[tokio::test]
async fn invalid_command_fails_before_spawning() {
    let executor = FakeExecutor::new(output(ProcessExitStatus::ExitCode(0), "", ""));
    let playbooks = AnsiblePlaybookExecutor::new(
        Arc::new(executor.clone()),
        "",
        "/srv/fleet/inventory.ini",
    );

    let error = playbooks
        .run_playbook(update_request())
        .await
        .expect_err("empty program should be rejected");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(executor.captured_request().is_none());
}
