//! Maps a failed `VBoxManage` call onto the error taxonomy.
//!
//! This is the only module that knows the tool's message texts. The matched
//! substrings were captured from VirtualBox 6.1 and 7.0 and are compared
//! case-insensitively:
//!
//! | substring                                   | meaning                       |
//! |---------------------------------------------|-------------------------------|
//! | `could not find a registered machine`       | not found                     |
//! | `could not find a machine`                  | not found                     |
//! | `vbox_e_object_not_found`                   | not found                     |
//! | `already exists`                            | conflict                      |
//! | `is already locked by a session`            | running: start / in use: else |
//! | `is already running`                        | running: start / in use: else |
//! | `is not currently running`                  | stopped (stop only)           |
//! | `machine is not running`                    | stopped (stop only)           |
//! | `while it is locked`, `is locked`           | in use                        |
//! | `vbox_e_invalid_object_state`               | in use (delete only)          |

use crate::error::VbmError;
use crate::request::Operation;
use crate::runner::ToolOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NotFound,
    Conflict,
    InUse,
    /// The machine is already in the state the operation would produce.
    AlreadyInState(&'static str),
    Unrecognized,
}

const NOT_FOUND: &[&str] = &[
    "could not find a registered machine",
    "could not find a machine",
    "vbox_e_object_not_found",
];
const CONFLICT: &[&str] = &["already exists"];
const RUNNING: &[&str] = &["is already locked by a session", "is already running"];
const STOPPED: &[&str] = &["is not currently running", "machine is not running"];
const LOCKED: &[&str] = &["while it is locked", "is locked"];

pub fn classify(operation: Operation, stderr: &str) -> Classification {
    let text = stderr.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(NOT_FOUND) {
        return Classification::NotFound;
    }
    match operation {
        Operation::Start if has(RUNNING) => Classification::AlreadyInState("running"),
        Operation::Stop if has(STOPPED) => Classification::AlreadyInState("stopped"),
        Operation::Create | Operation::Clone if has(CONFLICT) => Classification::Conflict,
        Operation::Delete if has(RUNNING) || has(LOCKED) => Classification::InUse,
        Operation::Delete if text.contains("vbox_e_invalid_object_state") => Classification::InUse,
        Operation::Clone | Operation::Info | Operation::Stop if has(RUNNING) || has(LOCKED) => {
            Classification::InUse
        }
        _ => Classification::Unrecognized,
    }
}

/// Build the caller-facing error for a non-zero exit.
pub fn failure(
    operation: Operation,
    target: &str,
    tool: &str,
    status: String,
    output: &ToolOutput,
) -> VbmError {
    let cause = output.stderr.trim().to_string();
    let target = target.to_string();
    match classify(operation, &output.stderr) {
        Classification::NotFound => VbmError::NotFound {
            operation,
            target,
            cause,
        },
        Classification::Conflict => VbmError::Conflict {
            operation,
            target,
            cause,
        },
        Classification::InUse => VbmError::InUse {
            operation,
            target,
            cause,
        },
        Classification::AlreadyInState(state) => VbmError::AlreadyInState {
            operation,
            target,
            state,
            cause,
        },
        Classification::Unrecognized => VbmError::ExternalToolError {
            operation,
            target,
            tool: tool.to_string(),
            status,
            stderr: cause,
        },
    }
}
