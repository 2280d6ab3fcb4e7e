use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock budget for a single command, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// A request to run one command line.
///
/// `timeout_secs == 0` disables the timeout. When `working_directory` is
/// `None` the child inherits the caller's working directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Literal command line; may already start with the elevation helper.
    pub command: String,
    /// Prepend the elevation helper if the command does not already use it.
    #[serde(default = "default_use_elevation")]
    pub use_elevation: bool,
    /// Wall-clock budget in seconds, measured from spawn.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Working directory for the child process.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_use_elevation() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl CommandRequest {
    /// Create a request with elevation enabled and the default timeout.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            use_elevation: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            working_directory: None,
        }
    }

    #[must_use]
    pub fn with_elevation(mut self, use_elevation: bool) -> Self {
        self.use_elevation = use_elevation;
        self
    }

    /// Set the timeout in seconds (`0` disables it).
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Effective timeout, or `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

