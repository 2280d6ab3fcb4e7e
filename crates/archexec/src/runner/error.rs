use miette::Diagnostic;
use serde_json::Value;
use std::fmt;

use crate::model::ErrorInfo;

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable error codes surfaced in results, JSON output and exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PolicyDenied,
    ElevationUnavailable,
    AuthRequired,
    AuthFailed,
    Locked,
    Spawn,
    Io,
    Timeout,
    Cancelled,
    ExitNonZero,
    Config,
    CliInvalidArg,
    Internal,
}

impl ErrorCode {
    pub const ALL: &'static [ErrorCode] = &[
        ErrorCode::PolicyDenied,
        ErrorCode::ElevationUnavailable,
        ErrorCode::AuthRequired,
        ErrorCode::AuthFailed,
        ErrorCode::Locked,
        ErrorCode::Spawn,
        ErrorCode::Io,
        ErrorCode::Timeout,
        ErrorCode::Cancelled,
        ErrorCode::ExitNonZero,
        ErrorCode::Config,
        ErrorCode::CliInvalidArg,
        ErrorCode::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyDenied => "E_POLICY_DENIED",
            Self::ElevationUnavailable => "E_ELEVATION_UNAVAILABLE",
            Self::AuthRequired => "E_AUTH_REQUIRED",
            Self::AuthFailed => "E_AUTH_FAILED",
            Self::Locked => "E_LOCKED",
            Self::Spawn => "E_SPAWN",
            Self::Io => "E_IO",
            Self::Timeout => "E_TIMEOUT",
            Self::Cancelled => "E_CANCELLED",
            Self::ExitNonZero => "E_EXIT_NONZERO",
            Self::Config => "E_CONFIG",
            Self::CliInvalidArg => "E_CLI_INVALID_ARG",
            Self::Internal => "E_INTERNAL",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == code)
    }

    /// Process exit code used by the CLI for this error.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::ExitNonZero => 1,
            Self::PolicyDenied => 2,
            Self::Locked => 3,
            Self::Timeout => 4,
            Self::ElevationUnavailable | Self::AuthRequired | Self::AuthFailed => 5,
            Self::Spawn | Self::Io => 6,
            Self::Config | Self::CliInvalidArg => 7,
            Self::Internal => 8,
            Self::Cancelled => 130,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::PolicyDenied => "command rejected by the safety policy",
            Self::ElevationUnavailable => "elevation helper is not installed",
            Self::AuthRequired => "elevation requires a credential that was not supplied",
            Self::AuthFailed => "credential validation failed",
            Self::Locked => "package database is locked",
            Self::Spawn => "failed to start the command",
            Self::Io => "i/o error while supervising the command",
            Self::Timeout => "command exceeded its timeout",
            Self::Cancelled => "command was cancelled",
            Self::ExitNonZero => "command exited with a non-zero status",
            Self::Config => "invalid configuration",
            Self::CliInvalidArg => "invalid command-line argument",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn policy_denied(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::PolicyDenied, message, context)
    }

    pub fn timeout(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Timeout, message, context)
    }

    pub fn io(code: ErrorCode, message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            code,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    pub fn cli_invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CliInvalidArg, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code.as_str()))
    }
}
