// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Credential flows against a scripted stand-in for the elevation helper.
//!
//! The fake helper understands the same flags the runner passes to `sudo`
//! (`-n`, `-k`, `-S`, `-p <prompt>`), checks the secret read from stdin and
//! then execs the remaining argv unprivileged.

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use archexec::elevation::{Credential, ElevationStatus, PrivilegeHelper};
use archexec::model::{
    CommandRequest, CommandStatus, ConfigBuilder, ElevationMode, RunnerConfig, StreamKind,
};
use archexec::runner::{
    CancelHandle, CollectingObserver, CredentialRequest, ErrorCode, Interaction, Runner,
    RunnerResult,
};

const SECRET: &str = "hunter2";

// =============================================================================
// Fixtures
// =============================================================================

fn write_helper(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fake_helper(dir: &Path, passwordless: bool) -> PathBuf {
    let on_no_prompt = if passwordless {
        "shift"
    } else {
        "echo 'a password is required' >&2; exit 1"
    };
    let script = format!(
        r#"#!/bin/sh
reads=0
while [ $# -gt 0 ]; do
  case "$1" in
    -S) reads=1; shift ;;
    -p) shift 2 ;;
    -k) shift ;;
    -n) {on_no_prompt} ;;
    *) break ;;
  esac
done
if [ "$reads" = 1 ]; then
  IFS= read -r pw || true
  if [ "$pw" != "{SECRET}" ]; then
    echo "sorry, try again" >&2
    exit 1
  fi
fi
exec "$@"
"#
    );
    write_helper(dir, "fake-sudo", &script)
}

/// Like a `NOPASSWD: ALL` rule: every flag is accepted and stdin is never read.
fn nopasswd_helper(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -S|-k|-n) shift ;;
    -p) shift 2 ;;
    *) break ;;
  esac
done
exec "$@"
"#;
    write_helper(dir, "nopasswd-sudo", script)
}

/// Holds a valid timestamp: stdin is only read when `-k` discards it, and
/// `-n` still refuses.
fn timestamp_helper(dir: &Path) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
reads=0
fresh=0
while [ $# -gt 0 ]; do
  case "$1" in
    -S) reads=1; shift ;;
    -k) fresh=1; shift ;;
    -p) shift 2 ;;
    -n) echo 'a password is required' >&2; exit 1 ;;
    *) break ;;
  esac
done
if [ "$reads" = 1 ] && [ "$fresh" = 1 ]; then
  IFS= read -r pw || true
  if [ "$pw" != "{SECRET}" ]; then
    echo "sorry, try again" >&2
    exit 1
  fi
fi
exec "$@"
"#
    );
    write_helper(dir, "timestamp-sudo", &script)
}

fn config(helper: &Path, mode: ElevationMode) -> RunnerConfig {
    ConfigBuilder::new()
        .elevation_helper(helper.display().to_string())
        .elevation_mode(mode)
        .lock_check(false)
        .build()
}

fn elevated(command: &str) -> CommandRequest {
    CommandRequest::new(command).with_timeout_secs(30)
}

/// Answers credential prompts from a script and counts them.
#[derive(Default)]
struct ScriptedInteraction {
    answers: Mutex<VecDeque<Option<String>>>,
    prompts: AtomicUsize,
    attempts_seen: Mutex<Vec<u32>>,
}

impl ScriptedInteraction {
    fn answering<I>(answers: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Option<&'static str>>,
    {
        Arc::new(Self {
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            ),
            ..Self::default()
        })
    }

    fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Interaction for ScriptedInteraction {
    fn request_credential(&self, request: &CredentialRequest) -> Option<Credential> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.attempts_seen.lock().unwrap().push(request.attempt);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .map(Credential::new)
    }

    fn confirm_stale_lock_removal(&self, _lock_path: &Path) -> bool {
        false
    }
}

// =============================================================================
// Cached credential mode
// =============================================================================

#[test]
fn cached_mode_prompts_once_and_reuses_credential() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let interaction = ScriptedInteraction::answering([Some(SECRET)]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let first = runner.execute(elevated("echo one"));
    let second = runner.execute(elevated("echo two"));

    assert_eq!(first.status, CommandStatus::Success, "{}", first.stderr);
    assert_eq!(first.stdout, "one");
    assert_eq!(second.status, CommandStatus::Success, "{}", second.stderr);
    assert_eq!(second.stdout, "two");
    assert_eq!(interaction.prompts(), 1);
    assert!(runner.has_cached_credential());
}

#[test]
fn wrong_credential_retries_until_cap() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let interaction = ScriptedInteraction::answering([Some("nope"), Some("nope"), Some("nope")]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let result = runner.execute(elevated("echo never"));

    assert_eq!(result.status, CommandStatus::Failed);
    assert_eq!(result.error_code(), Some(ErrorCode::AuthFailed.as_str()));
    assert!(result.stderr.contains("after 3 attempts"));
    assert_eq!(interaction.prompts(), 3);
    assert_eq!(*interaction.attempts_seen.lock().unwrap(), vec![1, 2, 3]);
    assert!(!runner.has_cached_credential());
}

#[test]
fn second_attempt_can_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let interaction = ScriptedInteraction::answering([Some("typo"), Some(SECRET)]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let result = runner.execute(elevated("echo ok"));
    assert_eq!(result.status, CommandStatus::Success, "{}", result.stderr);
    assert_eq!(interaction.prompts(), 2);
}

#[test]
fn declined_prompt_fails_without_spawning_command() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let runner = Runner::new(config(&helper, ElevationMode::CachedCredential));

    let result = runner.execute(elevated("echo never"));

    assert_eq!(result.status, CommandStatus::Failed);
    assert_eq!(result.error_code(), Some("E_AUTH_FAILED"));
    assert!(result.stderr.contains("credential entry cancelled"));
    assert!(result.pid.is_none());
}

#[test]
fn provide_and_forget_credential() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let interaction = ScriptedInteraction::answering([Some(SECRET)]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let err = runner.provide_credential(Credential::new("wrong")).unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthFailed);
    assert!(!runner.has_cached_credential());

    runner.provide_credential(Credential::new(SECRET)).unwrap();
    assert!(runner.has_cached_credential());
    assert_eq!(
        runner.execute(elevated("true")).status,
        CommandStatus::Success
    );
    assert_eq!(interaction.prompts(), 0);

    runner.forget_credential();
    assert!(!runner.has_cached_credential());
    assert_eq!(
        runner.execute(elevated("true")).status,
        CommandStatus::Success
    );
    assert_eq!(interaction.prompts(), 1);
}

#[test]
fn cached_credential_is_redacted_not_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let observer = Arc::new(CollectingObserver::new());
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .observer(observer.clone())
        .build();
    runner.provide_credential(Credential::new(SECRET)).unwrap();

    let result = runner.execute(elevated("echo token hunter2 end"));

    assert_eq!(result.status, CommandStatus::Success, "{}", result.stderr);
    assert_eq!(result.stdout, "token ******** end");
    assert!(!result.stdout.contains(SECRET));
    assert_eq!(
        observer.lines(StreamKind::Stdout),
        vec!["token ******** end"]
    );
}

// =============================================================================
// Non-interactive mode and availability
// =============================================================================

#[test]
fn non_interactive_runs_when_passwordless() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), true);
    let runner = Runner::new(config(&helper, ElevationMode::NonInteractive));

    assert_eq!(runner.elevation_status(), ElevationStatus::Available);
    let result = runner.execute(elevated("echo elevated"));
    assert_eq!(result.status, CommandStatus::Success, "{}", result.stderr);
    assert_eq!(result.stdout, "elevated");
}

#[test]
fn non_interactive_fails_when_a_password_is_needed() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(dir.path(), false);
    let runner = Runner::new(config(&helper, ElevationMode::NonInteractive));

    assert_eq!(runner.elevation_status(), ElevationStatus::RequiresCredential);
    let result = runner.execute(elevated("echo never"));
    assert_eq!(result.status, CommandStatus::Failed);
    assert_eq!(result.error_code(), Some("E_AUTH_REQUIRED"));
}

#[test]
fn missing_helper_is_reported_not_crashed() {
    let config = ConfigBuilder::new()
        .elevation_helper("archexec-no-such-helper")
        .lock_check(false)
        .build();
    let runner = Runner::new(config);

    assert_eq!(runner.elevation_status(), ElevationStatus::Unavailable);
    let result = runner.execute(elevated("echo hi"));
    assert_eq!(result.status, CommandStatus::Failed);
    assert_eq!(result.error_code(), Some("E_ELEVATION_UNAVAILABLE"));

    let err = runner
        .provide_credential(Credential::new(SECRET))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ElevationUnavailable);
}

// =============================================================================
// The secret never reaches the command
// =============================================================================

#[test]
fn passwordless_helper_runs_without_prompt_or_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let helper = nopasswd_helper(dir.path());
    let copied = dir.path().join("copied");
    let interaction = ScriptedInteraction::answering([Some(SECRET)]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let result = runner.execute(elevated(&format!("cp /dev/stdin {}", copied.display())));

    assert_eq!(result.status, CommandStatus::Success, "{}", result.stderr);
    assert_eq!(fs::read_to_string(&copied).unwrap(), "");
    assert_eq!(interaction.prompts(), 0);
    assert!(!runner.has_cached_credential());
}

#[test]
fn cached_mode_makes_helper_consume_secret_despite_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let helper = timestamp_helper(dir.path());
    let interaction = ScriptedInteraction::answering([Some(SECRET)]);
    let runner = Runner::builder(config(&helper, ElevationMode::CachedCredential))
        .interaction(interaction.clone())
        .build();

    let result = runner.execute(elevated("cat"));

    assert_eq!(result.status, CommandStatus::Success, "{}", result.stderr);
    assert_eq!(result.stdout, "");
    assert_eq!(interaction.prompts(), 1);
}

// =============================================================================
// PrivilegeHelper seam
// =============================================================================

struct CountingHelper {
    validations: AtomicUsize,
}

impl PrivilegeHelper for CountingHelper {
    fn name(&self) -> &str {
        "sudo"
    }

    fn is_installed(&self) -> bool {
        true
    }

    fn can_elevate_without_prompt(&self, _timeout: Duration) -> RunnerResult<bool> {
        Ok(false)
    }

    fn validate_credential(&self, credential: &Credential, _timeout: Duration) -> RunnerResult<bool> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        Ok(credential.expose() == SECRET)
    }
}

#[test]
fn empty_credential_is_rejected_without_asking_helper() {
    let helper = Arc::new(CountingHelper {
        validations: AtomicUsize::new(0),
    });
    let runner = Runner::builder(RunnerConfig::default())
        .privilege_helper(helper.clone())
        .build();

    assert!(runner.provide_credential(Credential::new("")).is_err());
    assert_eq!(helper.validations.load(Ordering::SeqCst), 0);

    runner.provide_credential(Credential::new(SECRET)).unwrap();
    assert_eq!(helper.validations.load(Ordering::SeqCst), 1);
    assert_eq!(
        runner.elevation_status(),
        ElevationStatus::RequiresCredential
    );
}

/// Cancels the runner from inside the credential prompt.
#[derive(Default)]
struct CancellingInteraction {
    handle: OnceLock<CancelHandle>,
    accepted: AtomicBool,
}

impl Interaction for CancellingInteraction {
    fn request_credential(&self, _request: &CredentialRequest) -> Option<Credential> {
        let accepted = self.handle.get().is_some_and(CancelHandle::cancel);
        self.accepted.store(accepted, Ordering::SeqCst);
        Some(Credential::new(SECRET))
    }

    fn confirm_stale_lock_removal(&self, _lock_path: &Path) -> bool {
        false
    }
}

#[test]
fn cancel_during_credential_prompt_stops_before_spawn() {
    let interaction = Arc::new(CancellingInteraction::default());
    let runner = Runner::builder(RunnerConfig::default())
        .privilege_helper(Arc::new(CountingHelper {
            validations: AtomicUsize::new(0),
        }))
        .interaction(interaction.clone())
        .build();
    interaction.handle.set(runner.cancel_handle()).unwrap();

    let result = runner.execute(elevated("echo never"));

    assert!(interaction.accepted.load(Ordering::SeqCst));
    assert_eq!(result.status, CommandStatus::Cancelled);
    assert_eq!(result.error_code(), Some("E_CANCELLED"));
    assert!(result.pid.is_none());
    assert!(!runner.is_running());
}
