use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::request::{CommandRequest, DEFAULT_TIMEOUT_SECS};

/// Current configuration format version.
pub const CONFIG_VERSION: u32 = 1;

/// Executables a command line may start with (after an optional `sudo`).
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "pacman",
    "sudo",
    "flatpak",
    "yay",
    "paru",
    "reflector",
    "systemctl",
    "mkdir",
    "cp",
    "mv",
    "rm",
    "echo",
    "cat",
    "ls",
    "whoami",
    "which",
    "test",
    "true",
    "false",
];

/// Substrings that reject a command line outright (matched case-insensitively).
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "dd if=",
    ":(){ :|:& };:",
    "chmod -R 777 /",
    "mkfs.",
    "fdisk",
    "parted",
];

pub const DEFAULT_ELEVATION_HELPER: &str = "sudo";
pub const DEFAULT_LOCK_MANAGER: &str = "pacman";
pub const DEFAULT_LOCK_PATH: &str = "/var/lib/pacman/db.lck";

// =============================================================================
// Sections
// =============================================================================

/// Allowlist and denylist applied to every command line before it runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    pub allowed_commands: Vec<String>,
    pub dangerous_patterns: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            dangerous_patterns: DEFAULT_DANGEROUS_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// How elevated commands obtain their privileges.
///
/// - `NonInteractive`: the helper runs with `-n` and fails instead of prompting
/// - `CachedCredential`: a credential is requested once, validated, cached
///   for the runner's lifetime and fed to the helper on stdin (`-S`)
/// - `Direct`: the caller is already privileged; commands run unwrapped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMode {
    NonInteractive,
    #[default]
    CachedCredential,
    Direct,
}

impl ElevationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonInteractive => "non_interactive",
            Self::CachedCredential => "cached_credential",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for ElevationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    /// Elevation helper executable, resolved on `PATH`.
    pub helper: String,
    pub mode: ElevationMode,
    /// Consecutive failed credential validations before the cache is cleared.
    pub max_attempts: u32,
    /// Budget for availability probes and credential validation.
    pub probe_timeout_ms: u64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            helper: DEFAULT_ELEVATION_HELPER.to_string(),
            mode: ElevationMode::default(),
            max_attempts: 3,
            probe_timeout_ms: 5_000,
        }
    }
}

/// Package-manager lock preflight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub enabled: bool,
    /// Process name that legitimately holds the lock; also the substring
    /// that marks a command as touching the package database.
    pub manager: String,
    pub lock_path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manager: DEFAULT_LOCK_MANAGER.to_string(),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout applied by front ends that do not set one per request.
    pub default_timeout_secs: u64,
    /// Sleep between supervision passes when no output is pending.
    pub poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL when stopping a process group.
    pub grace_period_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: 10,
            grace_period_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 100 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub stop_on_failure: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
        }
    }
}

// =============================================================================
// RunnerConfig
// =============================================================================

/// Complete runner configuration. Every section falls back to its defaults,
/// so an empty document is a valid configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub config_version: Option<u32>,
    pub policy: SafetyPolicy,
    pub elevation: ElevationConfig,
    pub lock: LockConfig,
    pub execution: ExecutionConfig,
    pub history: HistoryConfig,
    pub queue: QueueConfig,
}

impl RunnerConfig {
    /// Start a [`ConfigBuilder`] from the defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// An elevated request for `command` with the configured default timeout.
    pub fn request(&self, command: impl Into<String>) -> CommandRequest {
        CommandRequest::new(command).with_timeout_secs(self.execution.default_timeout_secs)
    }
}

// =============================================================================
// ConfigBuilder
// =============================================================================

/// Fluent builder for [`RunnerConfig`].
///
/// ```ignore
/// use archexec::model::{ConfigBuilder, ElevationMode};
///
/// let config = ConfigBuilder::new()
///     .elevation_mode(ElevationMode::NonInteractive)
///     .allow_command("sh")
///     .history_limit(20)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: RunnerConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    // =========================================================================
    // Policy
    // =========================================================================

    /// Add one executable to the allowlist (no-op if already present).
    #[must_use]
    pub fn allow_command(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.config.policy.allowed_commands.contains(&name) {
            self.config.policy.allowed_commands.push(name);
        }
        self
    }

    /// Replace the allowlist.
    #[must_use]
    pub fn allowed_commands<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.policy.allowed_commands = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn deny_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.policy.dangerous_patterns.push(pattern.into());
        self
    }

    // =========================================================================
    // Elevation
    // =========================================================================

    #[must_use]
    pub fn elevation_mode(mut self, mode: ElevationMode) -> Self {
        self.config.elevation.mode = mode;
        self
    }

    #[must_use]
    pub fn elevation_helper(mut self, helper: impl Into<String>) -> Self {
        self.config.elevation.helper = helper.into();
        self
    }

    #[must_use]
    pub fn max_auth_attempts(mut self, attempts: u32) -> Self {
        self.config.elevation.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.elevation.probe_timeout_ms = ms;
        self
    }

    // =========================================================================
    // Lock / execution / history / queue
    // =========================================================================

    #[must_use]
    pub fn lock_check(mut self, enabled: bool) -> Self {
        self.config.lock.enabled = enabled;
        self
    }

    #[must_use]
    pub fn lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lock.lock_path = path.into();
        self
    }

    #[must_use]
    pub fn lock_manager(mut self, manager: impl Into<String>) -> Self {
        self.config.lock.manager = manager.into();
        self
    }

    #[must_use]
    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.config.execution.default_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.execution.poll_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.config.execution.grace_period_ms = ms;
        self
    }

    #[must_use]
    pub fn history_limit(mut self, max_entries: usize) -> Self {
        self.config.history.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.config.queue.stop_on_failure = stop;
        self
    }

    #[must_use]
    pub fn build(self) -> RunnerConfig {
        self.config
    }
}
