//! The privileged command runner.
//!
//! [`Runner::execute`] takes a [`CommandRequest`] through validation,
//! elevation, the package-manager lock preflight, spawning and supervision,
//! and always returns a [`CommandResult`]. Internal errors and panics are
//! converted into `Failed` results at the outermost level.
//!
//! Executions on one runner are serialized; the runner itself is
//! `Send + Sync` so another thread can hold it to cancel the current command.

mod control;
mod error;
mod events;
mod interaction;
mod supervisor;

pub use control::{CancelHandle, ExecutionControl};
pub use error::{ErrorCode, RunnerError, RunnerResult};
pub use events::{CollectingObserver, ExecutionEvent, ExecutionObserver, NoopObserver};
pub use interaction::{CredentialRequest, Interaction, Unattended};

use chrono::{DateTime, Utc};
use std::any::Any;
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Dispatch};
use zeroize::Zeroizing;

use crate::elevation::{
    plan_for_mode, removal_plan, requests_elevation, Credential, CredentialCache,
    ElevationStatus, PrivilegeHelper, Redactor, SystemPrivilegeHelper,
};
use crate::history::{ExecutionHistory, ExecutionStats};
use crate::lockcheck::{
    inspect_lock, targets_package_manager, LockOutcome, LockState, ProcessTable,
    SysinfoProcessTable,
};
use crate::model::{
    CommandRequest, CommandResult, CommandStatus, ElevationMode, ExecutionId, RunnerConfig,
};
use crate::policy::{tokenize, validate_command};
use crate::session::{Launcher, SpawnConfig, SystemLauncher};
use supervisor::{supervise, Outcome, SuperviseOptions, Supervision};

/// Runs commands one at a time under the configured policy.
pub struct Runner {
    config: RunnerConfig,
    observer: Arc<dyn ExecutionObserver>,
    interaction: Arc<dyn Interaction>,
    launcher: Arc<dyn Launcher>,
    helper: Arc<dyn PrivilegeHelper>,
    processes: Arc<dyn ProcessTable>,
    dispatch: Option<Dispatch>,
    control: Arc<ExecutionControl>,
    credentials: Mutex<CredentialCache>,
    history: Mutex<ExecutionHistory>,
    serial: Mutex<()>,
}

/// Builder for [`Runner`]; every collaborator has a system default.
pub struct RunnerBuilder {
    config: RunnerConfig,
    observer: Option<Arc<dyn ExecutionObserver>>,
    interaction: Option<Arc<dyn Interaction>>,
    launcher: Option<Arc<dyn Launcher>>,
    helper: Option<Arc<dyn PrivilegeHelper>>,
    processes: Option<Arc<dyn ProcessTable>>,
    dispatch: Option<Dispatch>,
}

impl RunnerBuilder {
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
        self.interaction = Some(interaction);
        self
    }

    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    #[must_use]
    pub fn privilege_helper(mut self, helper: Arc<dyn PrivilegeHelper>) -> Self {
        self.helper = Some(helper);
        self
    }

    #[must_use]
    pub fn process_table(mut self, processes: Arc<dyn ProcessTable>) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Run every execution under this tracing dispatcher.
    #[must_use]
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(self) -> Runner {
        let helper = self.helper.unwrap_or_else(|| {
            Arc::new(SystemPrivilegeHelper::new(self.config.elevation.helper.clone()))
        });
        Runner {
            credentials: Mutex::new(CredentialCache::new(self.config.elevation.max_attempts)),
            history: Mutex::new(ExecutionHistory::new(self.config.history.max_entries)),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            interaction: self.interaction.unwrap_or_else(|| Arc::new(Unattended)),
            launcher: self.launcher.unwrap_or_else(|| Arc::new(SystemLauncher)),
            processes: self
                .processes
                .unwrap_or_else(|| Arc::new(SysinfoProcessTable)),
            helper,
            dispatch: self.dispatch,
            control: Arc::new(ExecutionControl::default()),
            serial: Mutex::new(()),
            config: self.config,
        }
    }
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: RunnerConfig) -> RunnerBuilder {
        RunnerBuilder {
            config,
            observer: None,
            interaction: None,
            launcher: None,
            helper: None,
            processes: None,
            dispatch: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one command to a terminal state. Never fails: every error ends
    /// up in the returned result.
    pub fn execute(&self, request: CommandRequest) -> CommandResult {
        self.execute_dispatched(&request, None)
    }

    /// [`Runner::execute`], except that a raised `abort` flag turns the
    /// execution into `Cancelled` before anything is spawned.
    ///
    /// The flag is read after the runner starts accepting cancellation, so a
    /// caller that raises it and then calls [`Runner::cancel`] never loses
    /// the request in between.
    pub(crate) fn execute_unless(
        &self,
        request: CommandRequest,
        abort: &AtomicBool,
    ) -> CommandResult {
        self.execute_dispatched(&request, Some(abort))
    }

    fn execute_dispatched(
        &self,
        request: &CommandRequest,
        abort: Option<&AtomicBool>,
    ) -> CommandResult {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || {
                self.execute_serialized(request, abort)
            }),
            None => self.execute_serialized(request, abort),
        }
    }

    /// Request cancellation of the current execution; `false` if idle.
    pub fn cancel(&self) -> bool {
        self.control.request_cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.control))
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Copy of the retained results, oldest first.
    pub fn history(&self) -> Vec<CommandResult> {
        self.history_guard().snapshot()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.history_guard().stats()
    }

    pub fn clear_history(&self) {
        self.history_guard().clear();
    }

    /// Validate a credential ahead of time and cache it on success.
    ///
    /// # Errors
    /// - `E_ELEVATION_UNAVAILABLE`: the helper is not installed
    /// - `E_AUTH_FAILED`: the helper rejected the credential
    pub fn provide_credential(&self, credential: Credential) -> RunnerResult<()> {
        self.ensure_helper_installed()?;
        match self.check_credential(credential)? {
            Some(_) => Ok(()),
            None => Err(RunnerError::new(
                ErrorCode::AuthFailed,
                format!("credential rejected by {}", self.helper.name()),
                None,
            )),
        }
    }

    pub fn forget_credential(&self) {
        self.credential_cache().clear();
    }

    pub fn has_cached_credential(&self) -> bool {
        self.credential_cache().cached().is_some()
    }

    pub fn elevation_status(&self) -> ElevationStatus {
        if !self.helper.is_installed() {
            return ElevationStatus::Unavailable;
        }
        match self.helper.can_elevate_without_prompt(self.probe_timeout()) {
            Ok(true) => ElevationStatus::Available,
            Ok(false) => ElevationStatus::RequiresCredential,
            Err(err) => {
                warn!(error = %err, "elevation probe failed");
                ElevationStatus::Unavailable
            }
        }
    }

    // =========================================================================
    // Execution pipeline
    // =========================================================================

    fn execute_serialized(
        &self,
        request: &CommandRequest,
        abort: Option<&AtomicBool>,
    ) -> CommandResult {
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        // Cancellable from here on, including validation and prompts.
        self.control.begin();
        let draft = Draft::new(&request.command);
        let span = tracing::info_span!("execute", execution_id = %draft.execution_id);
        let _entered = span.enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if abort.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                debug!("execution aborted before validation");
                return Ok(draft.cancelled_before_spawn());
            }
            self.run_request(request, &draft)
        }));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(code = %err.code, message = %err.message, "execution failed");
                draft.failed(&err)
            }
            Err(payload) => {
                let err = RunnerError::internal(format!(
                    "execution panicked: {}",
                    panic_message(payload.as_ref())
                ));
                warn!(message = %err.message, "execution panicked");
                draft.failed(&err)
            }
        };
        self.control.finish();
        self.record(result)
    }

    fn run_request(&self, request: &CommandRequest, draft: &Draft) -> RunnerResult<CommandResult> {
        let validation = validate_command(
            &request.command,
            &self.config.policy,
            &self.config.elevation.helper,
        );
        if !validation.accepted {
            warn!(reason = %validation.reason, "command rejected by policy");
            return Ok(draft.rejected(&validation.reason));
        }
        let tokens = match tokenize(&request.command) {
            Ok(tokens) => tokens,
            Err(reason) => return Ok(draft.rejected(&reason)),
        };

        self.observer.on_event(&ExecutionEvent::Started {
            execution_id: draft.execution_id,
            command: request.command.clone(),
        });
        self.status(format!("starting: {}", request.command));

        let helper = self.config.elevation.helper.as_str();
        let access = if requests_elevation(&tokens, request.use_elevation, helper) {
            Some(self.prepare_elevation(&request.command)?)
        } else {
            None
        };
        let mode = access
            .as_ref()
            .map_or(self.config.elevation.mode, |access| access.mode);
        let plan = plan_for_mode(tokens, request.use_elevation, helper, mode);
        if targets_package_manager(&request.command, &self.config.lock) {
            self.preflight_lock(&request.command, access.as_ref())?;
        }
        if self.control.cancel_requested() {
            return Ok(draft.cancelled_before_spawn());
        }

        let mut spawn = SpawnConfig::from_argv(plan.argv)?;
        spawn.cwd = request.working_directory.clone();
        spawn.stdin = access.as_ref().and_then(Access::stdin_line);
        self.spawn_and_supervise(request, draft, spawn)
    }

    fn spawn_and_supervise(
        &self,
        request: &CommandRequest,
        draft: &Draft,
        spawn: SpawnConfig,
    ) -> RunnerResult<CommandResult> {
        debug!(program = %spawn.program, args = ?spawn.args, "launching command");
        let mut session = self.launcher.launch(spawn)?;
        let pid = session.pid();
        self.control.set_pid(Some(pid));

        let redactor = Redactor::new(self.credential_cache().cached().cloned());
        let options = SuperviseOptions {
            timeout: request.timeout(),
            poll_interval: Duration::from_millis(self.config.execution.poll_interval_ms.max(1)),
            grace_period: Duration::from_millis(self.config.execution.grace_period_ms),
            control: &self.control,
            redactor: &redactor,
            observer: self.observer.as_ref(),
        };
        let supervision = supervise(&mut session, &options);
        self.control.set_pid(None);
        Ok(draft.finished(supervision?, pid, request.timeout_secs))
    }

    fn record(&self, result: CommandResult) -> CommandResult {
        self.history_guard().push(result.clone());
        self.status(format!("command finished: {}", result.status));
        info!(
            status = %result.status,
            exit_code = result.exit_code,
            duration_secs = result.duration_secs,
            "command finished"
        );
        self.observer.on_event(&ExecutionEvent::Finished {
            result: Box::new(result.clone()),
        });
        result
    }

    fn status(&self, message: String) {
        debug!(%message, "status");
        self.observer.on_event(&ExecutionEvent::Status { message });
    }

    // =========================================================================
    // Elevation
    // =========================================================================

    fn ensure_helper_installed(&self) -> RunnerResult<()> {
        if self.helper.is_installed() {
            return Ok(());
        }
        Err(RunnerError::new(
            ErrorCode::ElevationUnavailable,
            format!("elevation helper '{}' is not installed", self.helper.name()),
            serde_json::json!({ "helper": self.helper.name() }),
        ))
    }

    /// Decide how the helper runs for this execution.
    ///
    /// A helper that already elevates without a prompt (passwordless rule,
    /// valid timestamp, running as root) is run non-interactively with
    /// nothing on stdin, so a secret can never reach the command itself.
    fn prepare_elevation(&self, command: &str) -> RunnerResult<Access> {
        let mode = self.config.elevation.mode;
        if mode == ElevationMode::Direct {
            return Ok(Access::without_credential(mode));
        }
        self.ensure_helper_installed()?;
        if self.helper.can_elevate_without_prompt(self.probe_timeout())? {
            debug!(helper = self.helper.name(), "helper elevates without a credential");
            return Ok(Access::without_credential(ElevationMode::NonInteractive));
        }
        if mode == ElevationMode::NonInteractive {
            return Err(RunnerError::new(
                ErrorCode::AuthRequired,
                format!(
                    "{} requires a credential and non-interactive mode cannot prompt",
                    self.helper.name()
                ),
                serde_json::json!({ "mode": ElevationMode::NonInteractive.as_str() }),
            ));
        }
        Ok(Access {
            mode,
            credential: Some(self.obtain_credential(command)?),
        })
    }

    fn obtain_credential(&self, command: &str) -> RunnerResult<Credential> {
        loop {
            let (attempt, max_attempts) = {
                let cache = self.credential_cache();
                if let Some(credential) = cache.cached() {
                    return Ok(credential.clone());
                }
                (cache.failed_attempts() + 1, cache.max_attempts())
            };
            let request = CredentialRequest {
                helper: self.helper.name().to_string(),
                command: command.to_string(),
                attempt,
                max_attempts,
            };
            let Some(credential) = self.interaction.request_credential(&request) else {
                return Err(RunnerError::new(
                    ErrorCode::AuthFailed,
                    "credential entry cancelled",
                    None,
                ));
            };
            if let Some(credential) = self.check_credential(credential)? {
                return Ok(credential);
            }
        }
    }

    /// Validate and cache. `Ok(None)` means rejected with attempts left.
    fn check_credential(&self, credential: Credential) -> RunnerResult<Option<Credential>> {
        let valid = !credential.is_empty()
            && self
                .helper
                .validate_credential(&credential, self.probe_timeout())?;
        let mut cache = self.credential_cache();
        if valid {
            cache.store(credential.clone());
            debug!("credential validated and cached");
            return Ok(Some(credential));
        }

        let attempt = cache.failed_attempts() + 1;
        let max_attempts = cache.max_attempts();
        if cache.record_failure() {
            warn!(max_attempts, "credential rejected, attempt limit reached");
            return Err(RunnerError::new(
                ErrorCode::AuthFailed,
                format!("authentication failed after {max_attempts} attempts"),
                serde_json::json!({ "max_attempts": max_attempts }),
            ));
        }
        drop(cache);
        warn!(attempt, max_attempts, "credential rejected");
        self.status(format!(
            "authentication failed ({attempt}/{max_attempts}), try again"
        ));
        Ok(None)
    }

    // =========================================================================
    // Lock preflight
    // =========================================================================

    fn preflight_lock(&self, command: &str, access: Option<&Access>) -> RunnerResult<()> {
        let lock = &self.config.lock;
        let outcome = match inspect_lock(lock, self.processes.as_ref()) {
            LockState::Absent => LockOutcome::Clear,
            LockState::Held => LockOutcome::ActiveProcess,
            LockState::Stale => {
                warn!(path = %lock.lock_path.display(), "stale package database lock");
                self.status(format!("stale lock file found: {}", lock.lock_path.display()));
                if !self.interaction.confirm_stale_lock_removal(&lock.lock_path) {
                    LockOutcome::Declined
                } else if self.remove_stale_lock(command, access)? {
                    LockOutcome::Removed
                } else {
                    LockOutcome::RemovalFailed
                }
            }
        };
        debug!(?outcome, "lock preflight finished");

        let context = serde_json::json!({
            "lock_path": lock.lock_path.display().to_string(),
            "outcome": outcome,
        });
        match outcome {
            LockOutcome::Clear => Ok(()),
            LockOutcome::Removed => {
                self.status("stale lock removed".to_string());
                Ok(())
            }
            LockOutcome::ActiveProcess => Err(RunnerError::new(
                ErrorCode::Locked,
                format!("another {} instance is running", lock.manager),
                context,
            )),
            LockOutcome::Declined => Err(RunnerError::new(
                ErrorCode::Locked,
                "cancelled: database is locked",
                context,
            )),
            LockOutcome::RemovalFailed => Err(RunnerError::new(
                ErrorCode::Locked,
                "failed to remove stale lock file",
                context,
            )),
        }
    }

    fn remove_stale_lock(&self, command: &str, access: Option<&Access>) -> RunnerResult<bool> {
        let lock = &self.config.lock;
        let prepared;
        let access = match access {
            Some(access) => access,
            None => {
                prepared = self.prepare_elevation(command)?;
                &prepared
            }
        };
        let plan = removal_plan(&lock.lock_path, &self.config.elevation.helper, access.mode);

        let mut spawn = SpawnConfig::from_argv(plan.argv)?;
        spawn.stdin = access.stdin_line();
        let mut session = self.launcher.launch(spawn)?;
        let status = match session.wait_for_exit(self.probe_timeout())? {
            Some(status) => Some(status),
            None => {
                session.terminate_process_group(Duration::from_millis(
                    self.config.execution.grace_period_ms,
                ))?;
                None
            }
        };

        let removed = status.is_some_and(|s| s.success()) && !lock.lock_path.exists();
        if removed {
            info!(path = %lock.lock_path.display(), "removed stale lock");
        } else {
            warn!(path = %lock.lock_path.display(), ?status, "stale lock removal failed");
        }
        Ok(removed)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.elevation.probe_timeout_ms)
    }

    fn credential_cache(&self) -> MutexGuard<'_, CredentialCache> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn history_guard(&self) -> MutexGuard<'_, ExecutionHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How the helper is invoked for one execution.
struct Access {
    mode: ElevationMode,
    /// Piped to the helper; only present in `CachedCredential` mode.
    credential: Option<Credential>,
}

impl Access {
    fn without_credential(mode: ElevationMode) -> Self {
        Self {
            mode,
            credential: None,
        }
    }

    fn stdin_line(&self) -> Option<Zeroizing<String>> {
        self.credential.as_ref().map(Credential::stdin_line)
    }
}

/// Identity and clock of an execution in progress.
struct Draft {
    execution_id: ExecutionId,
    command: String,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl Draft {
    fn new(command: &str) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            command: command.to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn result(&self, status: CommandStatus) -> CommandResult {
        CommandResult {
            execution_id: self.execution_id,
            command: self.command.clone(),
            status,
            exit_code: -1,
            signal: None,
            pid: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration_secs: self.clock.elapsed().as_secs_f64(),
            error: None,
        }
    }

    fn rejected(&self, reason: &str) -> CommandResult {
        let mut result = self.result(CommandStatus::RejectedByPolicy);
        result.ended_at = result.started_at;
        result.duration_secs = 0.0;
        result.stderr = format!("security validation failed: {reason}");
        result.error = Some(
            RunnerError::policy_denied(reason, serde_json::json!({ "command": self.command }))
                .to_error_info(),
        );
        result
    }

    fn failed(&self, err: &RunnerError) -> CommandResult {
        let mut result = self.result(CommandStatus::Failed);
        result.stderr = err.message.clone();
        result.error = Some(err.to_error_info());
        result
    }

    fn cancelled_before_spawn(&self) -> CommandResult {
        let mut result = self.result(CommandStatus::Cancelled);
        result.stderr = "command cancelled before it started".to_string();
        result.error = Some(
            RunnerError::new(ErrorCode::Cancelled, "command cancelled before it started", None)
                .to_error_info(),
        );
        result
    }

    fn finished(&self, supervision: Supervision, pid: u32, timeout_secs: u64) -> CommandResult {
        let Supervision {
            outcome,
            status: reaped,
            stdout,
            mut stderr,
        } = supervision;
        let signal = reaped.and_then(|status| status.signal());
        let (status, error) = match outcome {
            Outcome::Exited(exit) if exit.success() => (CommandStatus::Success, None),
            Outcome::Exited(exit) => (CommandStatus::Failed, Some(exit_error(exit.code(), signal))),
            Outcome::TimedOut => {
                let marker = format!("timeout reached after {timeout_secs}s");
                stderr.push(marker.clone());
                (
                    CommandStatus::Timeout,
                    Some(RunnerError::timeout(
                        marker,
                        serde_json::json!({ "timeout_secs": timeout_secs }),
                    )),
                )
            }
            Outcome::Cancelled => (
                CommandStatus::Cancelled,
                Some(RunnerError::new(ErrorCode::Cancelled, "command cancelled", None)),
            ),
        };

        let mut result = self.result(status);
        result.exit_code = reaped.and_then(|status| status.code()).unwrap_or(-1);
        result.signal = signal;
        result.pid = Some(pid);
        result.stdout = stdout.join("\n");
        result.stderr = stderr.join("\n");
        result.error = error.map(|err| err.to_error_info());
        result
    }
}

fn exit_error(code: Option<i32>, signal: Option<i32>) -> RunnerError {
    match (code, signal) {
        (Some(code), _) => RunnerError::new(
            ErrorCode::ExitNonZero,
            format!("command exited with status {code}"),
            serde_json::json!({ "exit_code": code }),
        ),
        (None, Some(signal)) => RunnerError::new(
            ErrorCode::ExitNonZero,
            format!("command terminated by signal {signal}"),
            serde_json::json!({ "signal": signal }),
        ),
        (None, None) => RunnerError::new(ErrorCode::ExitNonZero, "command failed", None),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
