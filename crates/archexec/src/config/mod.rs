use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::model::{QueueFile, RunnerConfig, CONFIG_VERSION};
use crate::runner::{ErrorCode, RunnerError, RunnerResult};

/// A configuration value the runner cannot work with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("policy.allowed_commands is empty, every command would be rejected")]
    EmptyAllowlist,
    #[error("policy.dangerous_patterns contains an empty pattern")]
    EmptyPattern,
    #[error("elevation.helper must not be empty")]
    EmptyHelper,
    #[error("elevation.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("elevation.probe_timeout_ms must be greater than zero")]
    ZeroProbeTimeout,
    #[error("execution.poll_interval_ms must be between 1 and 1000, got {0}")]
    PollInterval(u64),
    #[error("lock.manager must not be empty when the lock check is enabled")]
    EmptyLockManager,
    #[error("lock.lock_path must be absolute")]
    RelativeLockPath,
}

/// Load a [`RunnerConfig`] from `.yaml`/`.yml` or JSON and validate it.
pub fn load_config_file(path: &Path) -> RunnerResult<RunnerConfig> {
    let config: RunnerConfig = load_document(path, "config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load a queue document (a list of catalog items).
pub fn load_queue_file(path: &Path) -> RunnerResult<QueueFile> {
    load_document(path, "queue")
}

fn load_document<T: DeserializeOwned>(path: &Path, kind: &str) -> RunnerResult<T> {
    let data = fs::read_to_string(path).map_err(|err| {
        RunnerError::io(
            ErrorCode::Io,
            format!("failed to read {kind} file {}", path.display()),
            err,
        )
    })?;
    let name = path.to_string_lossy();
    if name.ends_with(".yaml") || name.ends_with(".yml") {
        serde_yml::from_str(&data).map_err(|err| {
            RunnerError::io(ErrorCode::Config, format!("failed to parse {kind} yaml"), err)
        })
    } else {
        serde_json::from_str(&data).map_err(|err| {
            RunnerError::io(ErrorCode::Config, format!("failed to parse {kind} json"), err)
        })
    }
}

pub fn config_issues(config: &RunnerConfig) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    if let Some(found) = config.config_version {
        if found != CONFIG_VERSION {
            issues.push(ConfigIssue::UnsupportedVersion {
                found,
                expected: CONFIG_VERSION,
            });
        }
    }
    if config.policy.allowed_commands.is_empty() {
        issues.push(ConfigIssue::EmptyAllowlist);
    }
    if config.policy.dangerous_patterns.iter().any(|p| p.trim().is_empty()) {
        issues.push(ConfigIssue::EmptyPattern);
    }
    if config.elevation.helper.trim().is_empty() {
        issues.push(ConfigIssue::EmptyHelper);
    }
    if config.elevation.max_attempts == 0 {
        issues.push(ConfigIssue::ZeroAttempts);
    }
    if config.elevation.probe_timeout_ms == 0 {
        issues.push(ConfigIssue::ZeroProbeTimeout);
    }
    let poll = config.execution.poll_interval_ms;
    if !(1..=1000).contains(&poll) {
        issues.push(ConfigIssue::PollInterval(poll));
    }
    if config.lock.enabled {
        if config.lock.manager.trim().is_empty() {
            issues.push(ConfigIssue::EmptyLockManager);
        }
        if !config.lock.lock_path.is_absolute() {
            issues.push(ConfigIssue::RelativeLockPath);
        }
    }
    issues
}

/// # Errors
/// - `E_CONFIG`: at least one [`ConfigIssue`]; all of them are listed in
///   the error context
pub fn validate_config(config: &RunnerConfig) -> RunnerResult<()> {
    let issues = config_issues(config);
    let Some(first) = issues.first() else {
        return Ok(());
    };
    let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
    Err(RunnerError::config(
        first.to_string(),
        serde_json::json!({ "issues": messages }),
    ))
}
