//! Elevation planning and the privilege helper seam.
//!
//! A command that needs elevation is rewritten into the helper's argv
//! according to the configured [`ElevationMode`]. The helper itself sits
//! behind [`PrivilegeHelper`] so availability probes and credential
//! validation can be replaced in tests.

pub mod credential;

pub use credential::{Credential, CredentialCache, Redactor, REDACTION_MARKER};

use serde::{Deserialize, Serialize};
use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

use crate::model::{ElevationConfig, ElevationMode};
use crate::runner::RunnerResult;
use crate::session::{Session, SpawnConfig};

const PROBE_GRACE: Duration = Duration::from_millis(200);

/// Result of [`Runner::elevation_status`](crate::runner::Runner::elevation_status).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationStatus {
    /// The helper runs without asking for a credential.
    Available,
    /// The helper is installed but needs a credential.
    RequiresCredential,
    /// The helper is not installed.
    Unavailable,
}

/// Final argv for a validated command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElevationPlan {
    pub argv: Vec<String>,
    /// The argv starts with the elevation helper.
    pub elevated: bool,
    /// The helper reads a credential from stdin.
    pub needs_credential: bool,
}

/// Rewrite a tokenized command for the configured elevation mode.
///
/// A command that already starts with the helper is treated as elevated
/// whatever `use_elevation` says; the user-written helper tokens are replaced
/// so the mode's flags always come first. In `Direct` mode nothing is
/// rewritten.
pub fn plan_elevation(
    tokens: Vec<String>,
    use_elevation: bool,
    config: &ElevationConfig,
) -> ElevationPlan {
    plan_for_mode(tokens, use_elevation, &config.helper, config.mode)
}

/// [`plan_elevation`] with an explicit mode.
///
/// The runner uses this to downgrade `CachedCredential` to `NonInteractive`
/// when the helper turns out not to need a credential.
pub fn plan_for_mode(
    mut tokens: Vec<String>,
    use_elevation: bool,
    helper: &str,
    mode: ElevationMode,
) -> ElevationPlan {
    let unchanged = |argv| ElevationPlan {
        argv,
        elevated: false,
        needs_credential: false,
    };
    if !requests_elevation(&tokens, use_elevation, helper) {
        return unchanged(tokens);
    }

    // -k: sudo reads the piped secret itself even if a timestamp is valid.
    let flags: &[&str] = match mode {
        ElevationMode::Direct => return unchanged(tokens),
        ElevationMode::NonInteractive => &["-n"],
        ElevationMode::CachedCredential => &["-k", "-S", "-p", ""],
    };
    let leading = tokens.iter().take_while(|t| is_helper(t, helper)).count();
    tokens.drain(..leading);

    let mut argv = Vec::with_capacity(tokens.len() + flags.len() + 1);
    argv.push(helper.to_string());
    argv.extend(flags.iter().map(|flag| (*flag).to_string()));
    argv.extend(tokens);
    ElevationPlan {
        argv,
        elevated: true,
        needs_credential: mode == ElevationMode::CachedCredential,
    }
}

/// The command asks for the helper, explicitly or through `use_elevation`.
pub fn requests_elevation(tokens: &[String], use_elevation: bool, helper: &str) -> bool {
    use_elevation || tokens.first().is_some_and(|t| is_helper(t, helper))
}

/// `token` names the helper, by bare name or by any path to it.
pub fn is_helper(token: &str, helper: &str) -> bool {
    !token.is_empty() && basename(token) == basename(helper)
}

fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

/// Argv that force-removes the package-manager lock file.
pub fn removal_plan(lock_path: &Path, helper: &str, mode: ElevationMode) -> ElevationPlan {
    let tokens = vec![
        "rm".to_string(),
        "-f".to_string(),
        lock_path.display().to_string(),
    ];
    plan_for_mode(tokens, true, helper, mode)
}

/// The external program used to gain privileges.
pub trait PrivilegeHelper: Send + Sync {
    fn name(&self) -> &str;

    /// The helper executable resolves on `PATH`.
    fn is_installed(&self) -> bool;

    /// The helper can run a trivial command without prompting.
    fn can_elevate_without_prompt(&self, timeout: Duration) -> RunnerResult<bool>;

    /// The helper accepts `credential`. Must not prompt on a terminal.
    fn validate_credential(&self, credential: &Credential, timeout: Duration)
        -> RunnerResult<bool>;
}

/// [`PrivilegeHelper`] backed by a real executable such as `sudo`.
#[derive(Debug, Clone)]
pub struct SystemPrivilegeHelper {
    program: String,
}

impl SystemPrivilegeHelper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn probe(
        &self,
        args: &[&str],
        stdin: Option<Zeroizing<String>>,
        timeout: Duration,
    ) -> RunnerResult<bool> {
        let config = SpawnConfig {
            program: self.program.clone(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            cwd: None,
            stdin,
        };
        let mut session = Session::spawn(config)?;
        match session.wait_for_exit(timeout)? {
            Some(status) => Ok(status.success()),
            None => {
                debug!(helper = %self.program, "elevation probe timed out");
                session.terminate_process_group(PROBE_GRACE)?;
                Ok(false)
            }
        }
    }
}

impl PrivilegeHelper for SystemPrivilegeHelper {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_installed(&self) -> bool {
        find_in_path(&self.program).is_some()
    }

    fn can_elevate_without_prompt(&self, timeout: Duration) -> RunnerResult<bool> {
        self.probe(&["-n", "true"], None, timeout)
    }

    fn validate_credential(
        &self,
        credential: &Credential,
        timeout: Duration,
    ) -> RunnerResult<bool> {
        // -k: ignore any cached timestamp so the supplied secret is what gets checked.
        self.probe(
            &["-k", "-S", "-p", "", "true"],
            Some(credential.stdin_line()),
            timeout,
        )
    }
}

/// Resolve an executable the way a shell would: paths containing `/` are
/// taken as-is, bare names are searched on `PATH`.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
