use miette::Diagnostic;
use thiserror::Error;

use crate::request::Operation;

#[derive(Debug, Error, Diagnostic)]
pub enum VbmError {
    #[error("{operation} '{target}': invalid parameter: {message}")]
    #[diagnostic(code(vbm::invalid_parameter))]
    InvalidParameter {
        operation: Operation,
        target: String,
        message: String,
    },

    #[error("{operation} '{target}': cannot launch {tool}: {cause}")]
    #[diagnostic(
        code(vbm::tool_unavailable),
        help("install VirtualBox or point `--tool` / `[tool] path` at VBoxManage")
    )]
    ToolUnavailable {
        operation: Operation,
        target: String,
        tool: String,
        cause: String,
    },

    #[error("{operation} '{target}': virtual machine not found: {cause}")]
    #[diagnostic(code(vbm::not_found), help("run `vbm list` to see registered machines"))]
    NotFound {
        operation: Operation,
        target: String,
        cause: String,
    },

    #[error("{operation} '{target}': name already in use: {cause}")]
    #[diagnostic(code(vbm::conflict))]
    Conflict {
        operation: Operation,
        target: String,
        cause: String,
    },

    #[error("{operation} '{target}': machine is in use: {cause}")]
    #[diagnostic(code(vbm::in_use), help("stop the machine first with `vbm stop --force`"))]
    InUse {
        operation: Operation,
        target: String,
        cause: String,
    },

    #[error("{operation} '{target}': machine is already {state}: {cause}")]
    #[diagnostic(code(vbm::already_in_state))]
    AlreadyInState {
        operation: Operation,
        target: String,
        state: &'static str,
        cause: String,
    },

    #[error("{operation} '{target}': {tool} did not finish within {seconds}s")]
    #[diagnostic(code(vbm::timeout), help("raise `--timeout` or `[tool] timeout_s`"))]
    Timeout {
        operation: Operation,
        target: String,
        tool: String,
        seconds: u64,
    },

    #[error("{operation} '{target}': {tool} exited with {status}: {stderr}")]
    #[diagnostic(code(vbm::external_tool))]
    ExternalToolError {
        operation: Operation,
        target: String,
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{operation} '{target}': unexpected tool output: {message}")]
    #[diagnostic(code(vbm::parse))]
    ParseError {
        operation: Operation,
        target: String,
        message: String,
    },

    #[error("{operation} '{target}': cancelled")]
    #[diagnostic(code(vbm::cancelled))]
    Cancelled { operation: Operation, target: String },

    #[error("failed to load config from {path}")]
    #[diagnostic(code(vbm::config))]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(code(vbm::config))]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    #[diagnostic(code(vbm::config))]
    Validation { message: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl VbmError {
    /// Process exit code for this error, stable across releases.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidParameter { .. } => 2,
            Self::NotFound { .. } => 3,
            Self::Conflict { .. } => 4,
            Self::ToolUnavailable { .. } => 5,
            Self::Timeout { .. } => 6,
            Self::InUse { .. } => 7,
            Self::AlreadyInState { .. } => 8,
            Self::ParseError { .. } => 9,
            Self::Cancelled { .. } => 130,
            Self::ExternalToolError { .. }
            | Self::ConfigLoad { .. }
            | Self::ConfigParse { .. }
            | Self::Validation { .. }
            | Self::Io { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let op = Operation::Start;
        let errors = [
            VbmError::InvalidParameter {
                operation: op,
                target: "a".into(),
                message: "m".into(),
            },
            VbmError::NotFound {
                operation: op,
                target: "a".into(),
                cause: String::new(),
            },
            VbmError::Conflict {
                operation: op,
                target: "a".into(),
                cause: String::new(),
            },
            VbmError::ToolUnavailable {
                operation: op,
                target: "a".into(),
                tool: "VBoxManage".into(),
                cause: String::new(),
            },
            VbmError::Timeout {
                operation: op,
                target: "a".into(),
                tool: "VBoxManage".into(),
                seconds: 1,
            },
            VbmError::InUse {
                operation: op,
                target: "a".into(),
                cause: String::new(),
            },
            VbmError::AlreadyInState {
                operation: op,
                target: "a".into(),
                state: "running",
                cause: String::new(),
            },
            VbmError::ParseError {
                operation: op,
                target: "a".into(),
                message: String::new(),
            },
        ];
        let mut codes: Vec<u8> = errors.iter().map(VbmError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&1));
    }

    #[test]
    fn message_names_operation_and_target() {
        let err = VbmError::NotFound {
            operation: Operation::Delete,
            target: "web-01".into(),
            cause: "Could not find a registered machine named 'web-01'".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("delete 'web-01'"), "{msg}");
        assert!(msg.contains("Could not find a registered machine"), "{msg}");
    }
}
