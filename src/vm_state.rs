//! Shared vocabulary for the machine states VirtualBox reports.
//!
//! The same state shows up in two spellings: `VMState="poweroff"` in
//! machine-readable output and `State: powered off (since ...)` in the
//! human-readable listing. Both parse into `VmState`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    PoweredOff,
    Running,
    Paused,
    Saved,
    Aborted,
    Starting,
    Stopping,
    Saving,
    Restoring,
    /// A state this version of vbm has no name for, kept verbatim.
    Other(String),
}

impl VmState {
    /// Parse the `VMState` value from `showvminfo --machinereadable`.
    pub fn from_machine(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "poweroff" | "poweredoff" => VmState::PoweredOff,
            "running" => VmState::Running,
            "paused" => VmState::Paused,
            "saved" => VmState::Saved,
            "aborted" | "aborted-saved" => VmState::Aborted,
            "starting" => VmState::Starting,
            "stopping" => VmState::Stopping,
            "saving" => VmState::Saving,
            "restoring" => VmState::Restoring,
            _ => VmState::Other(value.trim().to_string()),
        }
    }

    /// Parse the `State:` value of the human-readable output, which carries a
    /// trailing `(since ...)` timestamp.
    pub fn from_human(value: &str) -> Self {
        let state = value.split(" (").next().unwrap_or(value).trim();
        match state.to_ascii_lowercase().as_str() {
            "powered off" => VmState::PoweredOff,
            other => match VmState::from_machine(other) {
                VmState::Other(_) => VmState::Other(state.to_string()),
                known => known,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            VmState::PoweredOff => "poweroff",
            VmState::Running => "running",
            VmState::Paused => "paused",
            VmState::Saved => "saved",
            VmState::Aborted => "aborted",
            VmState::Starting => "starting",
            VmState::Stopping => "stopping",
            VmState::Saving => "saving",
            VmState::Restoring => "restoring",
            VmState::Other(s) => s,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
