// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use archexec::model::{ConfigBuilder, ElevationMode, RunnerConfig, SafetyPolicy};
use archexec::policy::{base_executable, explain_command, tokenize, validate_command};

fn validate(command: &str) -> archexec::policy::Validation {
    validate_command(command, &SafetyPolicy::default(), "sudo")
}

// =============================================================================
// Rejections
// =============================================================================

#[test]
fn empty_and_whitespace_commands_are_rejected() {
    for command in ["", "   ", "\t\n"] {
        let verdict = validate(command);
        assert!(!verdict.accepted, "{command:?} should be rejected");
        assert_eq!(verdict.reason, "empty command");
    }
}

#[test]
fn dangerous_patterns_are_rejected_case_insensitively() {
    for command in [
        "sudo rm -rf /",
        "RM -RF / --no-preserve-root",
        "dd if=/dev/zero of=/dev/sda",
        "sudo mkfs.ext4 /dev/sda1",
        "sudo fdisk /dev/sda",
        "sudo PARTED /dev/sda",
        "chmod -R 777 /",
        ":(){ :|:& };:",
    ] {
        let verdict = validate(command);
        assert!(!verdict.accepted, "{command:?} should be rejected");
        assert!(
            verdict.reason.starts_with("dangerous pattern detected"),
            "unexpected reason for {command:?}: {}",
            verdict.reason
        );
    }
}

#[test]
fn denylist_is_checked_before_allowlist() {
    let verdict = validate("echo rm -rf /");
    assert!(!verdict.accepted);
    assert!(verdict.reason.contains("rm -rf /"));
}

#[test]
fn executables_outside_allowlist_are_rejected() {
    let verdict = validate("curl https://example.com");
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, "command not allowed: curl");

    let verdict = validate("sudo bash -c 'id'");
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, "command not allowed: bash");
}

#[test]
fn unbalanced_quotes_are_rejected_as_malformed() {
    let verdict = validate("echo 'unterminated");
    assert!(!verdict.accepted);
    assert!(verdict.reason.starts_with("malformed command line"));
}

// =============================================================================
// Acceptance
// =============================================================================

#[test]
fn package_manager_commands_validate() {
    for command in [
        "pacman -Syu",
        "sudo pacman -Syu --noconfirm",
        "/usr/bin/pacman -Qi linux",
        "  sudo   systemctl restart NetworkManager  ",
        "sudo",
        "true",
    ] {
        let verdict = validate(command);
        assert!(verdict.accepted, "{command:?}: {}", verdict.reason);
        assert_eq!(verdict.reason, "command validated");
    }
}

#[test]
fn base_executable_skips_helper_and_takes_basename() {
    assert_eq!(
        base_executable("sudo /usr/bin/pacman -Syu", "sudo").as_deref(),
        Some("pacman")
    );
    assert_eq!(base_executable("sudo", "sudo").as_deref(), Some("sudo"));
    assert_eq!(base_executable("doas pacman", "doas").as_deref(), Some("pacman"));
    assert_eq!(base_executable("   ", "sudo"), None);
}

#[test]
fn helper_by_path_or_repeated_does_not_hide_the_executable() {
    for command in ["/usr/bin/sudo curl example.com", "sudo sudo curl example.com"] {
        let verdict = validate(command);
        assert!(!verdict.accepted, "{command} accepted");
        assert_eq!(verdict.reason, "command not allowed: curl");
    }
    assert!(validate("/usr/bin/sudo pacman -Syu").accepted);
    assert_eq!(
        base_executable("sudo /usr/bin/sudo /usr/bin/pacman -Qu", "sudo").as_deref(),
        Some("pacman")
    );
    assert_eq!(
        base_executable("/tmp/fake/sudo sudo", "sudo").as_deref(),
        Some("sudo")
    );
}

#[test]
fn custom_allowlist_and_patterns_apply() {
    let config = ConfigBuilder::new()
        .allow_command("sh")
        .deny_pattern("--force")
        .build();
    assert!(validate_command("sh -c 'echo hi'", &config.policy, "sudo").accepted);

    let verdict = validate_command("pacman -Rdd --FORCE glibc", &config.policy, "sudo");
    assert!(!verdict.accepted);
    assert!(verdict.reason.contains("--force"));
}

#[test]
fn tokenize_honours_quotes() {
    let tokens = tokenize("echo 'hello world' \"a b\" c").unwrap();
    assert_eq!(tokens, vec!["echo", "hello world", "a b", "c"]);
    assert!(tokenize("  ").is_err());
}

// =============================================================================
// Explanation
// =============================================================================

#[test]
fn explain_reports_elevated_argv_for_cached_mode() {
    let explanation = explain_command("pacman -Syu", true, &RunnerConfig::default());
    assert!(explanation.accepted);
    assert_eq!(explanation.executable.as_deref(), Some("pacman"));
    assert!(explanation.elevated);
    assert!(explanation.credential_on_stdin);
    assert!(explanation.lock_check);
    assert_eq!(
        explanation.argv,
        vec!["sudo", "-k", "-S", "-p", "", "pacman", "-Syu"]
    );
}

#[test]
fn explain_rejected_command_has_no_argv() {
    let explanation = explain_command("rm -rf /", true, &RunnerConfig::default());
    assert!(!explanation.accepted);
    assert!(explanation.argv.is_empty());
    assert!(!explanation.elevated);
    assert!(!explanation.lock_check);
}

#[test]
fn explain_non_interactive_mode_uses_dash_n() {
    let config = ConfigBuilder::new()
        .elevation_mode(ElevationMode::NonInteractive)
        .build();
    let explanation = explain_command("sudo systemctl restart sshd", false, &config);
    assert_eq!(
        explanation.argv,
        vec!["sudo", "-n", "systemctl", "restart", "sshd"]
    );
    assert!(!explanation.credential_on_stdin);
    assert!(!explanation.lock_check);
}
