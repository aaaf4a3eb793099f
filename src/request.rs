//! Immutable command requests and the `VBoxManage` argument vectors they map to.
//!
//! A `CommandRequest` is validated when it is built and has no setters, so
//! everything downstream can assume well-formed input. Building a request
//! never spawns a process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::VbmError;

/// The façade operation a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
    Start,
    Stop,
    Clone,
    List,
    Info,
    Probe,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Clone => "clone",
            Operation::List => "list",
            Operation::Info => "info",
            Operation::Probe => "probe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network attachment for the first NIC of a new VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum NetworkMode {
    #[default]
    Nat,
    Bridged,
    #[value(name = "hostonly")]
    HostOnly,
    None,
}

impl NetworkMode {
    fn nic_value(self) -> &'static str {
        match self {
            NetworkMode::Nat => "nat",
            NetworkMode::Bridged => "bridged",
            NetworkMode::HostOnly => "hostonly",
            NetworkMode::None => "none",
        }
    }
}

/// Virtual disk container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DiskFormat {
    #[default]
    #[value(name = "VDI", alias = "vdi")]
    Vdi,
    #[value(name = "VHD", alias = "vhd")]
    Vhd,
    #[value(name = "VMDK", alias = "vmdk")]
    Vmdk,
}

impl DiskFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Vdi => "VDI",
            DiskFormat::Vhd => "VHD",
            DiskFormat::Vmdk => "VMDK",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            DiskFormat::Vdi => "vdi",
            DiskFormat::Vhd => "vhd",
            DiskFormat::Vmdk => "vmdk",
        }
    }
}

impl FromStr for DiskFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VDI" => Ok(DiskFormat::Vdi),
            "VHD" => Ok(DiskFormat::Vhd),
            "VMDK" => Ok(DiskFormat::Vmdk),
            other => Err(format!("unknown disk format '{other}' (use VDI, VHD or VMDK)")),
        }
    }
}

/// How `info` output is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoFormat {
    Text,
    Structured,
}

/// Values that fill in whatever a create request leaves unspecified.
#[derive(Debug, Clone)]
pub struct CreateDefaults {
    pub os_type: String,
    pub disk_format: DiskFormat,
    pub bridge_adapter: String,
    pub hostonly_adapter: String,
    /// Directory for new disk images. `None` lets VBoxManage resolve a bare filename.
    pub disk_dir: Option<PathBuf>,
}

impl Default for CreateDefaults {
    fn default() -> Self {
        Self {
            os_type: "Other_64".into(),
            disk_format: DiskFormat::Vdi,
            bridge_adapter: "eth0".into(),
            hostonly_adapter: "vboxnet0".into(),
            disk_dir: None,
        }
    }
}

/// Caller input for `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: String,
    pub os_type: Option<String>,
    pub memory_mb: u64,
    pub cpu_count: u32,
    pub disk_gb: u64,
    pub disk_format: Option<DiskFormat>,
    pub iso_path: Option<PathBuf>,
    pub network: NetworkMode,
    /// Start the VM once it is fully configured.
    pub start_after: bool,
    pub headless: bool,
}

/// Caller input for `clone`.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Share storage with the source instead of copying disks.
    pub linked: bool,
    pub snapshot: Option<String>,
}

/// One `VBoxManage` invocation within a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    label: &'static str,
    args: Vec<String>,
}

impl Step {
    fn new(label: &'static str, args: Vec<String>) -> Self {
        Self { label, args }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// How a request's output is interpreted once its steps succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Uuid,
    Nothing,
    Listing { detailed: bool },
    Info(InfoFormat),
    Version,
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    operation: Operation,
    target: Option<String>,
    steps: Vec<Step>,
    expect: Expect,
}

impl CommandRequest {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The VM the request acts on; `None` for `list` and `probe`.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Target name for messages: the VM name, or a placeholder for registry-wide calls.
    pub fn target_label(&self) -> &str {
        self.target.as_deref().unwrap_or("*")
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn expect(&self) -> Expect {
        self.expect
    }

    pub fn probe() -> Self {
        Self {
            operation: Operation::Probe,
            target: None,
            steps: vec![Step::new("version", strings(["--version"]))],
            expect: Expect::Version,
        }
    }

    /// Validate `spec` and build the creation plan.
    pub fn create(spec: &CreateSpec, defaults: &CreateDefaults) -> Result<Self, VbmError> {
        let op = Operation::Create;
        let name = validate_name(op, &spec.name)?;
        let invalid = |message: String| VbmError::InvalidParameter {
            operation: op,
            target: name.to_string(),
            message,
        };

        if spec.memory_mb == 0 {
            return Err(invalid("memory must be a positive number of MB".into()));
        }
        if spec.cpu_count == 0 {
            return Err(invalid("cpu count must be at least 1".into()));
        }
        let disk_mb = spec
            .disk_gb
            .checked_mul(1024)
            .ok_or_else(|| invalid(format!("disk size {} GB is too large", spec.disk_gb)))?;
        if let Some(iso) = &spec.iso_path
            && !iso.is_file()
        {
            return Err(invalid(format!("ISO file {} does not exist", iso.display())));
        }
        let os_type = match spec.os_type.as_deref() {
            Some(t) if t.trim().is_empty() => return Err(invalid("OS type cannot be empty".into())),
            Some(t) => t.trim(),
            None => defaults.os_type.as_str(),
        };

        let mut steps = vec![Step::new(
            "register machine",
            strings(["createvm", "--name", name, "--ostype", os_type, "--register"]),
        )];

        let mut modify = strings(["modifyvm", name]);
        modify.extend(strings(["--memory", &spec.memory_mb.to_string()]));
        modify.extend(strings(["--cpus", &spec.cpu_count.to_string()]));
        modify.extend(strings(["--nic1", spec.network.nic_value()]));
        match spec.network {
            NetworkMode::Bridged => {
                modify.extend(strings(["--bridgeadapter1", &defaults.bridge_adapter]));
            }
            NetworkMode::HostOnly => {
                modify.extend(strings(["--hostonlyadapter1", &defaults.hostonly_adapter]));
            }
            NetworkMode::Nat | NetworkMode::None => {}
        }
        steps.push(Step::new("configure hardware", modify));

        if disk_mb > 0 {
            let format = spec.disk_format.unwrap_or(defaults.disk_format);
            let disk = disk_file(defaults.disk_dir.as_deref(), name, format);
            steps.push(Step::new(
                "create disk",
                strings([
                    "createmedium",
                    "disk",
                    "--filename",
                    &disk,
                    "--size",
                    &disk_mb.to_string(),
                    "--format",
                    format.as_str(),
                ]),
            ));
            steps.push(Step::new(
                "add SATA controller",
                strings([
                    "storagectl",
                    name,
                    "--name",
                    "SATA",
                    "--add",
                    "sata",
                    "--controller",
                    "IntelAhci",
                ]),
            ));
            steps.push(Step::new(
                "attach disk",
                strings([
                    "storageattach",
                    name,
                    "--storagectl",
                    "SATA",
                    "--port",
                    "0",
                    "--device",
                    "0",
                    "--type",
                    "hdd",
                    "--medium",
                    &disk,
                ]),
            ));
        }

        if let Some(iso) = &spec.iso_path {
            let iso = iso.display().to_string();
            steps.push(Step::new(
                "add IDE controller",
                strings(["storagectl", name, "--name", "IDE", "--add", "ide"]),
            ));
            steps.push(Step::new(
                "attach ISO",
                strings([
                    "storageattach",
                    name,
                    "--storagectl",
                    "IDE",
                    "--port",
                    "0",
                    "--device",
                    "0",
                    "--type",
                    "dvddrive",
                    "--medium",
                    &iso,
                ]),
            ));
        }

        if spec.start_after {
            steps.push(Step::new("start", start_args(name, spec.headless)));
        }

        Ok(Self {
            operation: op,
            target: Some(name.to_string()),
            steps,
            expect: Expect::Uuid,
        })
    }

    pub fn delete(name: &str, remove_disks: bool) -> Result<Self, VbmError> {
        let op = Operation::Delete;
        let name = validate_name(op, name)?;
        let mut args = strings(["unregistervm", name]);
        if remove_disks {
            args.push("--delete".into());
        }
        Ok(Self::single(op, name, "unregister", args, Expect::Nothing))
    }

    pub fn start(name: &str, headless: bool) -> Result<Self, VbmError> {
        let op = Operation::Start;
        let name = validate_name(op, name)?;
        Ok(Self::single(op, name, "start", start_args(name, headless), Expect::Nothing))
    }

    pub fn stop(name: &str, force: bool) -> Result<Self, VbmError> {
        let op = Operation::Stop;
        let name = validate_name(op, name)?;
        let action = if force { "poweroff" } else { "acpipowerbutton" };
        let args = strings(["controlvm", name, action]);
        Ok(Self::single(op, name, "stop", args, Expect::Nothing))
    }

    pub fn clone_vm(source: &str, new_name: &str, options: &CloneOptions) -> Result<Self, VbmError> {
        let op = Operation::Clone;
        let source = validate_name(op, source)?;
        let new_name = validate_name(op, new_name)?;
        if source == new_name {
            return Err(VbmError::Conflict {
                operation: op,
                target: new_name.to_string(),
                cause: "clone name must differ from the source machine".into(),
            });
        }
        let mut args = strings(["clonevm", source, "--name", new_name, "--register"]);
        if let Some(snapshot) = &options.snapshot {
            if snapshot.trim().is_empty() {
                return Err(VbmError::InvalidParameter {
                    operation: op,
                    target: new_name.to_string(),
                    message: "snapshot name cannot be empty".into(),
                });
            }
            args.extend(strings(["--snapshot", snapshot.trim()]));
        }
        if options.linked {
            args.extend(strings(["--options", "link"]));
        }
        Ok(Self::single(op, new_name, "clone", args, Expect::Nothing))
    }

    pub fn list(detailed: bool) -> Self {
        let args = if detailed {
            strings(["list", "--long", "vms"])
        } else {
            strings(["list", "vms"])
        };
        Self {
            operation: Operation::List,
            target: None,
            steps: vec![Step::new("list", args)],
            expect: Expect::Listing { detailed },
        }
    }

    pub fn info(name: &str, format: InfoFormat) -> Result<Self, VbmError> {
        let op = Operation::Info;
        let name = validate_name(op, name)?;
        let mut args = strings(["showvminfo", name]);
        if format == InfoFormat::Structured {
            args.push("--machinereadable".into());
        }
        Ok(Self::single(op, name, "show info", args, Expect::Info(format)))
    }

    fn single(
        operation: Operation,
        target: &str,
        label: &'static str,
        args: Vec<String>,
        expect: Expect,
    ) -> Self {
        Self {
            operation,
            target: Some(target.to_string()),
            steps: vec![Step::new(label, args)],
            expect,
        }
    }
}

fn start_args(name: &str, headless: bool) -> Vec<String> {
    let mode = if headless { "headless" } else { "gui" };
    strings(["startvm", name, "--type", mode])
}

fn disk_file(dir: Option<&Path>, name: &str, format: DiskFormat) -> String {
    let file = format!("{name}_disk.{}", format.extension());
    match dir {
        Some(dir) => dir.join(file).display().to_string(),
        None => file,
    }
}

/// Names end up as positional arguments, so anything VBoxManage could read
/// as a flag or a path is rejected.
fn validate_name(operation: Operation, name: &str) -> Result<&str, VbmError> {
    let problem = if name.trim().is_empty() {
        Some("machine name cannot be empty")
    } else if name.trim() != name {
        Some("machine name cannot start or end with whitespace")
    } else if name.starts_with('-') {
        Some("machine name cannot start with '-'")
    } else if name.contains(['/', '\\']) {
        Some("machine name cannot contain path separators")
    } else if name.chars().any(char::is_control) {
        Some("machine name cannot contain control characters")
    } else {
        None
    };
    match problem {
        Some(message) => Err(VbmError::InvalidParameter {
            operation,
            target: name.to_string(),
            message: message.into(),
        }),
        None => Ok(name),
    }
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}
