//! Command safety policy.
//!
//! Validation is a tripwire against obviously destructive input, not a
//! sandbox: a command is rejected when it is empty, contains a denylisted
//! substring, names an executable outside the allowlist, or cannot be split
//! into shell words.

use serde::Serialize;
use std::path::Path;

use crate::elevation::{is_helper, plan_elevation};
use crate::lockcheck::targets_package_manager;
use crate::model::{RunnerConfig, SafetyPolicy};

/// Verdict of [`validate_command`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub accepted: bool,
    pub reason: String,
}

impl Validation {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: "command validated".to_string(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Check a command line against the safety policy.
///
/// Pure: touches neither the filesystem nor the process table.
pub fn validate_command(command: &str, policy: &SafetyPolicy, helper: &str) -> Validation {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Validation::reject("empty command");
    }

    let lowered = trimmed.to_lowercase();
    if let Some(pattern) = policy
        .dangerous_patterns
        .iter()
        .find(|pattern| !pattern.is_empty() && lowered.contains(&pattern.to_lowercase()))
    {
        return Validation::reject(format!("dangerous pattern detected: {pattern}"));
    }

    let Some(executable) = base_executable(trimmed, helper) else {
        return Validation::reject("empty command");
    };
    if !policy.allowed_commands.iter().any(|allowed| *allowed == executable) {
        return Validation::reject(format!("command not allowed: {executable}"));
    }

    if let Err(reason) = tokenize(trimmed) {
        return Validation::reject(reason);
    }
    Validation::accept()
}

/// Basename of the executable a command line runs, looking past every
/// leading elevation helper token.
///
/// Helper tokens are matched by basename, so `/usr/bin/sudo curl` and
/// `sudo sudo curl` both resolve to `curl`. A line made only of helper
/// tokens resolves to the helper itself.
pub fn base_executable(command: &str, helper: &str) -> Option<String> {
    let mut words = command.split_whitespace().peekable();
    let first = *words.peek()?;
    let candidate = words.find(|word| !is_helper(word, helper)).unwrap_or(first);
    let name = Path::new(candidate)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(candidate);
    Some(name.to_string())
}

/// Split a command line into argv using POSIX shell-word rules.
pub fn tokenize(command: &str) -> Result<Vec<String>, String> {
    let tokens = shell_words::split(command.trim())
        .map_err(|err| format!("malformed command line: {err}"))?;
    if tokens.is_empty() {
        return Err("empty command".to_string());
    }
    Ok(tokens)
}

/// Everything the runner would decide about a command, without running it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandExplanation {
    pub command: String,
    pub accepted: bool,
    pub reason: String,
    pub executable: Option<String>,
    /// Final argv, empty when the command is rejected.
    pub argv: Vec<String>,
    pub elevated: bool,
    pub credential_on_stdin: bool,
    pub lock_check: bool,
}

/// `argv` is planned for the configured mode. At run time a helper that
/// elevates without a credential is run with the non-interactive flags.
pub fn explain_command(
    command: &str,
    use_elevation: bool,
    config: &RunnerConfig,
) -> CommandExplanation {
    let helper = config.elevation.helper.as_str();
    let validation = validate_command(command, &config.policy, helper);
    let executable = base_executable(command.trim(), helper);
    let plan = validation
        .accepted
        .then(|| tokenize(command).ok())
        .flatten()
        .map(|tokens| plan_elevation(tokens, use_elevation, &config.elevation));

    CommandExplanation {
        command: command.to_string(),
        accepted: validation.accepted,
        reason: validation.reason,
        executable,
        elevated: plan.as_ref().is_some_and(|p| p.elevated),
        credential_on_stdin: plan.as_ref().is_some_and(|p| p.needs_credential),
        argv: plan.map(|p| p.argv).unwrap_or_default(),
        lock_check: validation.accepted && targets_package_manager(command, &config.lock),
    }
}
