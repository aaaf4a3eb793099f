//! The command façade: typed VM operations on top of `VBoxManage`.
//!
//! Every call builds a fresh `CommandRequest`, runs its steps through the
//! `ProcessRunner`, and turns the outcome into a typed value or a classified
//! `VbmError`. Nothing is cached between calls; the tool owns all state.

use std::path::PathBuf;
use std::time::Duration;

use crate::classify;
use crate::error::VbmError;
use crate::parse::{self, LongRecords, VmDescriptor, VmInfo};
use crate::request::{
    CloneOptions, CommandRequest, CreateDefaults, CreateSpec, Expect, InfoFormat, Operation,
};
use crate::runner::{Invocation, ProcessRunner, RunError, SystemRunner, ToolOutput};

/// Explicit configuration handed to the façade at construction.
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    pub tool: PathBuf,
    pub timeout: Duration,
    pub defaults: CreateDefaults,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("VBoxManage"),
            timeout: Duration::from_secs(30),
            defaults: CreateDefaults::default(),
        }
    }
}

/// Output of a successful `list`. Parsing happens lazily in [`VmListing::iter`].
#[derive(Debug, Clone)]
pub struct VmListing {
    raw: String,
    detailed: bool,
}

impl VmListing {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Result<VmDescriptor, VbmError>> + '_> {
        let to_error = |failure: parse::ParseFailure| VbmError::ParseError {
            operation: Operation::List,
            target: "*".into(),
            message: failure.to_string(),
        };
        if self.detailed {
            Box::new(LongRecords::new(&self.raw).map(move |r| r.map_err(to_error)))
        } else {
            Box::new(parse::brief_records(&self.raw).map(move |r| r.map_err(to_error)))
        }
    }
}

#[derive(Debug, Clone)]
pub enum VmInfoReport {
    Text(String),
    Structured(VmInfo),
}

/// Typed result of [`Facade::execute`].
#[derive(Debug, Clone)]
pub enum Outcome {
    Created { name: String, uuid: String },
    Completed { operation: Operation, name: String },
    Listing(VmListing),
    Info { name: String, report: VmInfoReport },
    Version(String),
}

pub struct Facade<R = SystemRunner> {
    runner: R,
    config: FacadeConfig,
}

impl Facade<SystemRunner> {
    pub fn new(config: FacadeConfig) -> Self {
        let runner = SystemRunner::new(config.timeout);
        Self { runner, config }
    }
}

impl<R: ProcessRunner> Facade<R> {
    pub fn with_runner(config: FacadeConfig, runner: R) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Check that the tool can be launched; returns its version string.
    pub async fn probe(&self) -> Result<String, VbmError> {
        let outputs = self.run_steps(&CommandRequest::probe()).await?;
        Ok(last_stdout(&outputs).trim().to_string())
    }

    /// Create and register a VM; returns the UUID the tool assigned.
    pub async fn create(&self, spec: &CreateSpec) -> Result<String, VbmError> {
        let request = CommandRequest::create(spec, &self.config.defaults)?;
        let outputs = self.run_steps(&request).await?;
        created_uuid(&request, &outputs)
    }

    pub async fn delete(&self, name: &str, remove_disks: bool) -> Result<(), VbmError> {
        let request = CommandRequest::delete(name, remove_disks)?;
        self.run_steps(&request).await.map(drop)
    }

    pub async fn start(&self, name: &str, headless: bool) -> Result<(), VbmError> {
        let request = CommandRequest::start(name, headless)?;
        self.run_steps(&request).await.map(drop)
    }

    pub async fn stop(&self, name: &str, force: bool) -> Result<(), VbmError> {
        let request = CommandRequest::stop(name, force)?;
        self.run_steps(&request).await.map(drop)
    }

    pub async fn clone_vm(
        &self,
        source: &str,
        new_name: &str,
        options: &CloneOptions,
    ) -> Result<(), VbmError> {
        let request = CommandRequest::clone_vm(source, new_name, options)?;
        self.run_steps(&request).await.map(drop)
    }

    /// Run the tool's listing. Each call re-invokes the tool.
    pub async fn list(&self, detailed: bool) -> Result<VmListing, VbmError> {
        let outputs = self.run_steps(&CommandRequest::list(detailed)).await?;
        Ok(VmListing {
            raw: last_stdout(&outputs).to_string(),
            detailed,
        })
    }

    pub async fn info(&self, name: &str, format: InfoFormat) -> Result<VmInfoReport, VbmError> {
        let request = CommandRequest::info(name, format)?;
        let outputs = self.run_steps(&request).await?;
        info_report(&request, format, last_stdout(&outputs))
    }

    /// Run a prebuilt request. Lets callers validate every parameter before
    /// anything is spawned.
    pub async fn execute(&self, request: &CommandRequest) -> Result<Outcome, VbmError> {
        let outputs = self.run_steps(request).await?;
        let name = request.target_label().to_string();
        Ok(match request.expect() {
            Expect::Uuid => Outcome::Created {
                uuid: created_uuid(request, &outputs)?,
                name,
            },
            Expect::Nothing => Outcome::Completed {
                operation: request.operation(),
                name,
            },
            Expect::Listing { detailed } => Outcome::Listing(VmListing {
                raw: last_stdout(&outputs).to_string(),
                detailed,
            }),
            Expect::Info(format) => Outcome::Info {
                report: info_report(request, format, last_stdout(&outputs))?,
                name,
            },
            Expect::Version => Outcome::Version(last_stdout(&outputs).trim().to_string()),
        })
    }

    /// Run every step in order, stopping at the first failure.
    async fn run_steps(&self, request: &CommandRequest) -> Result<Vec<ToolOutput>, VbmError> {
        let operation = request.operation();
        let target = request.target_label();
        let tool = self.config.tool.display().to_string();
        let multi_step = request.steps().len() > 1;

        let mut outputs = Vec::with_capacity(request.steps().len());
        for step in request.steps() {
            tracing::debug!(%operation, vm = target, step = step.label(), "running step");
            let invocation = Invocation::new(&self.config.tool, step.args().to_vec());
            let output = self
                .runner
                .run(&invocation)
                .await
                .map_err(|e| run_error(operation, target, &tool, e))?;

            if !output.success() {
                tracing::warn!(
                    %operation,
                    vm = target,
                    step = step.label(),
                    status = %output.status_text(),
                    "{tool} failed"
                );
                let status = if multi_step {
                    format!("{} during '{}'", output.status_text(), step.label())
                } else {
                    output.status_text()
                };
                return Err(classify::failure(operation, target, &tool, status, &output));
            }
            outputs.push(output);
        }

        tracing::info!(%operation, vm = target, "{operation} succeeded");
        Ok(outputs)
    }
}

fn run_error(operation: Operation, target: &str, tool: &str, err: RunError) -> VbmError {
    let target = target.to_string();
    match err {
        RunError::Spawn { source, .. } => VbmError::ToolUnavailable {
            operation,
            target,
            tool: tool.to_string(),
            cause: source.to_string(),
        },
        RunError::TimedOut { timeout, .. } => VbmError::Timeout {
            operation,
            target,
            tool: tool.to_string(),
            seconds: timeout.as_secs(),
        },
        RunError::Io { source, .. } => VbmError::Io {
            context: format!("{operation} '{target}': reading {tool} output"),
            source,
        },
    }
}

fn last_stdout(outputs: &[ToolOutput]) -> &str {
    outputs.last().map(|o| o.stdout.as_str()).unwrap_or_default()
}

/// `createvm --register` prints `UUID: <uuid>` on success.
fn created_uuid(request: &CommandRequest, outputs: &[ToolOutput]) -> Result<String, VbmError> {
    outputs
        .first()
        .and_then(|o| {
            o.stdout.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == "UUID").then(|| value.trim().to_string())
            })
        })
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| VbmError::ParseError {
            operation: request.operation(),
            target: request.target_label().to_string(),
            message: "createvm did not report a UUID".into(),
        })
}

fn info_report(
    request: &CommandRequest,
    format: InfoFormat,
    stdout: &str,
) -> Result<VmInfoReport, VbmError> {
    match format {
        InfoFormat::Text => Ok(VmInfoReport::Text(stdout.to_string())),
        InfoFormat::Structured => parse::parse_machine_readable(stdout)
            .map(VmInfoReport::Structured)
            .map_err(|failure| VbmError::ParseError {
                operation: request.operation(),
                target: request.target_label().to_string(),
                message: failure.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::request::NetworkMode;
    use crate::vm_state::VmState;

    /// Replays scripted results and records every invocation.
    #[derive(Default)]
    struct StubRunner {
        replies: Mutex<VecDeque<Result<ToolOutput, RunError>>>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl StubRunner {
        fn new() -> Self {
            Self::default()
        }

        fn ok(self, stdout: &str) -> Self {
            self.reply(Ok(ToolOutput {
                code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            }))
        }

        fn fail(self, stderr: &str) -> Self {
            self.reply(Ok(ToolOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: stderr.into(),
            }))
        }

        fn reply(self, reply: Result<ToolOutput, RunError>) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for StubRunner {
        async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
            self.calls.lock().unwrap().push(invocation.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected invocation: {invocation:?}"))
        }
    }

    fn facade(runner: StubRunner) -> Facade<StubRunner> {
        Facade::with_runner(FacadeConfig::default(), runner)
    }

    fn spec() -> CreateSpec {
        CreateSpec {
            name: "web-01".into(),
            memory_mb: 2048,
            cpu_count: 2,
            disk_gb: 10,
            network: NetworkMode::Nat,
            ..CreateSpec::default()
        }
    }

    const CREATED: &str = "Virtual machine 'web-01' is created and registered.\n\
                           UUID: 4f1c7a3e-0000-4000-8000-000000000001\n\
                           Settings file: '/home/u/VirtualBox VMs/web-01/web-01.vbox'\n";

    #[tokio::test]
    async fn create_runs_plan_and_returns_uuid() {
        let runner = StubRunner::new().ok(CREATED).ok("").ok("").ok("").ok("");
        let f = facade(runner);
        let uuid = f.create(&spec()).await.unwrap();
        assert_eq!(uuid, "4f1c7a3e-0000-4000-8000-000000000001");

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|c| c.program == PathBuf::from("VBoxManage")));
        assert_eq!(calls[0].args[0], "createvm");
        assert_eq!(calls[4].args[0], "storageattach");
    }

    #[tokio::test]
    async fn invalid_create_never_spawns() {
        let f = facade(StubRunner::new());
        for bad in [
            CreateSpec {
                memory_mb: 0,
                ..spec()
            },
            CreateSpec {
                cpu_count: 0,
                ..spec()
            },
        ] {
            let err = f.create(&bad).await.unwrap_err();
            assert!(matches!(err, VbmError::InvalidParameter { .. }), "{err}");
        }
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn create_stops_at_first_failing_step() {
        let runner = StubRunner::new()
            .ok(CREATED)
            .fail("VBoxManage: error: Invalid memory size");
        let f = facade(runner);
        let err = f.create(&spec()).await.unwrap_err();
        match err {
            VbmError::ExternalToolError { status, .. } => {
                assert_eq!(status, "exit code 1 during 'configure hardware'");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn create_existing_name_is_conflict() {
        let runner = StubRunner::new().fail(
            "VBoxManage: error: Machine settings file '/vms/web-01/web-01.vbox' already exists",
        );
        let err = facade(runner).create(&spec()).await.unwrap_err();
        assert!(matches!(err, VbmError::Conflict { .. }), "{err}");
    }

    #[tokio::test]
    async fn start_on_running_vm_is_already_in_state() {
        let runner = StubRunner::new().fail(
            "VBoxManage: error: The machine 'web-01' is already locked by a session \
             (or being locked or unlocked)",
        );
        let err = facade(runner).start("web-01", true).await.unwrap_err();
        assert!(
            matches!(err, VbmError::AlreadyInState { state: "running", .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn stop_on_stopped_vm_is_already_in_state() {
        let runner =
            StubRunner::new().fail("VBoxManage: error: Machine 'web-01' is not currently running");
        let err = facade(runner).stop("web-01", false).await.unwrap_err();
        assert!(
            matches!(err, VbmError::AlreadyInState { state: "stopped", .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn delete_missing_vm_is_not_found() {
        let runner = StubRunner::new()
            .fail("VBoxManage: error: Could not find a registered machine named 'ghost'");
        let f = facade(runner);
        let err = f.delete("ghost", true).await.unwrap_err();
        assert!(matches!(err, VbmError::NotFound { .. }), "{err}");
        assert_eq!(f.runner.calls()[0].args, ["unregistervm", "ghost", "--delete"]);
    }

    #[tokio::test]
    async fn delete_running_vm_is_in_use() {
        let runner = StubRunner::new().fail(
            "VBoxManage: error: Cannot unregister the machine 'web-01' while it is locked",
        );
        let err = facade(runner).delete("web-01", false).await.unwrap_err();
        assert!(matches!(err, VbmError::InUse { .. }), "{err}");
    }

    #[tokio::test]
    async fn clone_existing_target_is_conflict() {
        let runner = StubRunner::new().fail(
            "VBoxManage: error: Machine settings file '/vms/copy/copy.vbox' already exists",
        );
        let err = facade(runner)
            .clone_vm("web-01", "copy", &CloneOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VbmError::Conflict { .. }), "{err}");
    }

    #[tokio::test]
    async fn spawn_failure_is_tool_unavailable() {
        let runner = StubRunner::new().reply(Err(RunError::Spawn {
            program: "VBoxManage".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        }));
        let err = facade(runner).probe().await.unwrap_err();
        assert!(matches!(err, VbmError::ToolUnavailable { .. }), "{err}");
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let runner = StubRunner::new().reply(Err(RunError::TimedOut {
            program: "VBoxManage".into(),
            timeout: Duration::from_secs(30),
        }));
        let err = facade(runner).start("web-01", false).await.unwrap_err();
        assert!(matches!(err, VbmError::Timeout { seconds: 30, .. }), "{err}");
    }

    #[tokio::test]
    async fn list_is_never_cached() {
        let runner = StubRunner::new()
            .ok("\"a\" {1}\n")
            .ok("\"a\" {1}\n\"b\" {2}\n");
        let f = facade(runner);

        let first: Vec<_> = f.list(false).await.unwrap().iter().map(|r| r.unwrap().name).collect();
        let second: Vec<_> = f.list(false).await.unwrap().iter().map(|r| r.unwrap().name).collect();

        assert_eq!(first, ["a"]);
        assert_eq!(second, ["a", "b"]);
        assert_eq!(f.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn listing_iteration_is_restartable() {
        let f = facade(StubRunner::new().ok("\"a\" {1}\n\"b\" {2}\n"));
        let listing = f.list(false).await.unwrap();
        assert_eq!(listing.iter().count(), 2);
        assert_eq!(listing.iter().count(), 2);
        assert_eq!(f.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn detailed_list_parses_long_format() {
        let f = facade(StubRunner::new().ok(
            "Name:            web-01\nUUID:            1\nState:           paused (since x)\n",
        ));
        let listing = f.list(true).await.unwrap();
        assert!(listing.is_detailed());
        let vms: Vec<_> = listing.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(vms[0].state, Some(VmState::Paused));
        assert_eq!(f.runner.calls()[0].args, ["list", "--long", "vms"]);
    }

    #[tokio::test]
    async fn info_structured_maps_fields() {
        let f = facade(StubRunner::new().ok("Memory=2048\nCPUs=2\nState=running\n"));
        let report = f.info("web-01", InfoFormat::Structured).await.unwrap();
        let VmInfoReport::Structured(info) = report else {
            panic!("expected structured report");
        };
        assert_eq!(info.get("Memory"), Some("2048"));
        assert_eq!(info.get("CPUs"), Some("2"));
        assert_eq!(info.get("State"), Some("running"));
        assert_eq!(info.fields.len(), 3);
        assert!(info.extra.is_empty());
    }

    #[tokio::test]
    async fn info_text_is_passthrough() {
        let f = facade(StubRunner::new().ok("Name:   web-01\n"));
        let report = f.info("web-01", InfoFormat::Text).await.unwrap();
        assert!(matches!(report, VmInfoReport::Text(ref t) if t == "Name:   web-01\n"));
    }

    #[tokio::test]
    async fn info_garbage_is_parse_error() {
        let f = facade(StubRunner::new().ok("nothing useful here\n"));
        let err = f.info("web-01", InfoFormat::Structured).await.unwrap_err();
        assert!(matches!(err, VbmError::ParseError { .. }), "{err}");
    }

    #[tokio::test]
    async fn info_missing_vm_is_not_found() {
        let f = facade(StubRunner::new().fail(
            "VBoxManage: error: Could not find a registered machine named 'ghost'",
        ));
        let err = f.info("ghost", InfoFormat::Structured).await.unwrap_err();
        assert!(matches!(err, VbmError::NotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn execute_prebuilt_requests() {
        let f = facade(StubRunner::new().ok("7.0.14r161095\n").ok(""));
        let version = f.execute(&CommandRequest::probe()).await.unwrap();
        assert!(matches!(version, Outcome::Version(ref v) if v == "7.0.14r161095"));

        let stop = CommandRequest::stop("web-01", true).unwrap();
        let done = f.execute(&stop).await.unwrap();
        assert!(matches!(
            done,
            Outcome::Completed {
                operation: Operation::Stop,
                ref name
            } if name == "web-01"
        ));
    }

    #[tokio::test]
    async fn create_without_uuid_is_parse_error() {
        let f = facade(StubRunner::new().ok("registered\n").ok(""));
        let s = CreateSpec {
            disk_gb: 0,
            ..spec()
        };
        let err = f.create(&s).await.unwrap_err();
        assert!(matches!(err, VbmError::ParseError { .. }), "{err}");
    }
}
