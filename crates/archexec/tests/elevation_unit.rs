// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Elevation planning, credential cache and redaction.

use std::path::Path;

use archexec::elevation::{
    find_in_path, is_helper, plan_elevation, plan_for_mode, removal_plan, Credential,
    CredentialCache, Redactor, REDACTION_MARKER,
};
use archexec::model::{ElevationConfig, ElevationMode};

fn config(mode: ElevationMode) -> ElevationConfig {
    ElevationConfig {
        mode,
        ..ElevationConfig::default()
    }
}

fn words(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

// =============================================================================
// Planning
// =============================================================================

#[test]
fn cached_mode_prepends_helper_with_stdin_flags() {
    let plan = plan_elevation(
        words("pacman -Syu"),
        true,
        &config(ElevationMode::CachedCredential),
    );
    assert!(plan.elevated);
    assert!(plan.needs_credential);
    assert_eq!(
        plan.argv,
        vec!["sudo", "-k", "-S", "-p", "", "pacman", "-Syu"]
    );
}

#[test]
fn user_written_helper_is_not_doubled() {
    let plan = plan_elevation(
        words("sudo pacman -Syu"),
        true,
        &config(ElevationMode::NonInteractive),
    );
    assert_eq!(plan.argv, vec!["sudo", "-n", "pacman", "-Syu"]);
    assert!(!plan.needs_credential);
}

#[test]
fn user_written_helper_elevates_even_without_flag() {
    let plan = plan_elevation(
        words("sudo pacman -Syu"),
        false,
        &config(ElevationMode::CachedCredential),
    );
    assert!(plan.elevated);
    assert_eq!(plan.argv[0], "sudo");
    assert_eq!(plan.argv[1], "-k");
    assert_eq!(plan.argv[2], "-S");
}

#[test]
fn helper_tokens_by_path_or_repeated_are_replaced() {
    let plan = plan_elevation(
        words("/usr/bin/sudo sudo pacman -Syu"),
        false,
        &config(ElevationMode::NonInteractive),
    );
    assert!(plan.elevated);
    assert_eq!(plan.argv, vec!["sudo", "-n", "pacman", "-Syu"]);

    assert!(is_helper("/usr/bin/sudo", "sudo"));
    assert!(is_helper("sudo", "/usr/local/bin/sudo"));
    assert!(!is_helper("sudoedit", "sudo"));
}

#[test]
fn plan_for_mode_overrides_configured_mode() {
    let plan = plan_for_mode(words("pacman -Syu"), true, "sudo", ElevationMode::NonInteractive);
    assert_eq!(plan.argv, vec!["sudo", "-n", "pacman", "-Syu"]);
    assert!(!plan.needs_credential);
}

#[test]
fn unelevated_request_runs_unchanged() {
    let plan = plan_elevation(
        words("echo hello"),
        false,
        &config(ElevationMode::CachedCredential),
    );
    assert!(!plan.elevated);
    assert_eq!(plan.argv, vec!["echo", "hello"]);
}

#[test]
fn direct_mode_never_wraps() {
    let plan = plan_elevation(words("pacman -Syu"), true, &config(ElevationMode::Direct));
    assert!(!plan.elevated);
    assert_eq!(plan.argv, vec!["pacman", "-Syu"]);
}

#[test]
fn removal_plan_targets_lock_path() {
    let plan = removal_plan(
        Path::new("/var/lib/pacman/db.lck"),
        "sudo",
        ElevationMode::NonInteractive,
    );
    assert_eq!(
        plan.argv,
        vec!["sudo", "-n", "rm", "-f", "/var/lib/pacman/db.lck"]
    );

    let cached = removal_plan(Path::new("/tmp/db.lck"), "sudo", ElevationMode::CachedCredential);
    assert!(cached.needs_credential);
    assert_eq!(cached.argv[1], "-k");

    let direct = removal_plan(Path::new("/tmp/db.lck"), "sudo", ElevationMode::Direct);
    assert_eq!(direct.argv, vec!["rm", "-f", "/tmp/db.lck"]);
}

#[test]
fn find_in_path_resolves_shell() {
    assert!(find_in_path("sh").is_some());
    assert!(find_in_path("definitely-not-a-real-helper-binary").is_none());
}

// =============================================================================
// Credentials
// =============================================================================

#[test]
fn credential_debug_never_shows_secret() {
    let credential = Credential::new("hunter2");
    let debug = format!("{credential:?}");
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains(REDACTION_MARKER));
}

#[test]
fn redactor_replaces_every_occurrence() {
    let redactor = Redactor::new(Some(Credential::new("hunter2")));
    assert!(redactor.is_active());
    assert_eq!(
        redactor.redact("pw=hunter2 again hunter2".to_string()),
        "pw=******** again ********"
    );
    assert_eq!(redactor.redact("clean line".to_string()), "clean line");
}

#[test]
fn empty_credential_disables_redaction() {
    let redactor = Redactor::new(Some(Credential::new("")));
    assert!(!redactor.is_active());
    assert_eq!(redactor.redact("abc".to_string()), "abc");
}

#[test]
fn cache_clears_after_attempt_cap() {
    let mut cache = CredentialCache::new(3);
    assert!(!cache.record_failure());
    assert!(!cache.record_failure());
    assert_eq!(cache.failed_attempts(), 2);
    assert!(cache.record_failure());
    assert_eq!(cache.failed_attempts(), 0);
    assert!(cache.cached().is_none());
}

#[test]
fn storing_a_credential_resets_failures() {
    let mut cache = CredentialCache::new(3);
    cache.record_failure();
    cache.store(Credential::new("secret"));
    assert_eq!(cache.failed_attempts(), 0);
    assert_eq!(cache.cached().map(Credential::expose), Some("secret"));
    cache.clear();
    assert!(cache.cached().is_none());
}
