//! Terminal front end: live output, credential prompt and lock confirmation.

use archexec::elevation::Credential;
use archexec::model::{CommandResult, CommandStatus, StreamKind};
use archexec::runner::{CredentialRequest, ExecutionEvent, ExecutionObserver, Interaction};
use console::{style, Term};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::progress::QueueProgress;

/// Streams child output as it arrives: stdout to stdout, stderr to stderr.
pub struct LiveOutput {
    show_status: bool,
}

impl LiveOutput {
    pub fn new(show_status: bool) -> Self {
        Self { show_status }
    }
}

impl ExecutionObserver for LiveOutput {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::Output {
                stream: StreamKind::Stdout,
                line,
            } => {
                let _ = writeln!(std::io::stdout(), "{line}");
            }
            ExecutionEvent::Output {
                stream: StreamKind::Stderr,
                line,
            } => {
                let _ = writeln!(std::io::stderr(), "{line}");
            }
            ExecutionEvent::Status { message } if self.show_status => {
                let _ = writeln!(std::io::stderr(), "{}", style(message).dim());
            }
            _ => {}
        }
    }
}

/// Final one-line verdict on stderr.
pub fn print_summary(result: &CommandResult) {
    let elapsed = format!("{:.2}s", result.duration_secs);
    let line = if result.status == CommandStatus::Success {
        style(format!("✓ success ({elapsed})")).green()
    } else {
        let reason = result
            .error
            .as_ref()
            .map_or("", |error| error.message.as_str());
        style(format!("✗ {} ({elapsed}): {reason}", result.status)).red()
    };
    let _ = writeln!(std::io::stderr(), "{line}");
}

/// Answers runner questions on the controlling terminal.
///
/// Without a terminal the credential prompt is declined and stale locks are
/// kept, unless `--yes` was given.
pub struct TerminalInteraction {
    assume_yes: bool,
    progress: Option<Arc<QueueProgress>>,
}

impl TerminalInteraction {
    pub fn new(assume_yes: bool, progress: Option<Arc<QueueProgress>>) -> Self {
        Self {
            assume_yes,
            progress,
        }
    }

    /// Hide the queue spinner while asking.
    fn ask<R>(&self, question: impl FnOnce() -> R) -> R {
        match &self.progress {
            Some(progress) => progress.suspend(question),
            None => question(),
        }
    }
}

impl Interaction for TerminalInteraction {
    fn request_credential(&self, request: &CredentialRequest) -> Option<Credential> {
        let term = Term::stderr();
        if !term.is_term() {
            tracing::warn!(helper = %request.helper, "no terminal to ask for a password");
            return None;
        }
        let prompt = if request.attempt > 1 {
            format!(
                "[archexec] password for {} (attempt {}/{}): ",
                request.helper, request.attempt, request.max_attempts
            )
        } else {
            format!("[archexec] password for {}: ", request.helper)
        };
        self.ask(|| {
            term.write_str(&prompt).ok()?;
            let secret = term.read_secure_line().ok()?;
            (!secret.is_empty()).then(|| Credential::new(secret))
        })
    }

    fn confirm_stale_lock_removal(&self, lock_path: &Path) -> bool {
        if self.assume_yes {
            return true;
        }
        let term = Term::stderr();
        if !term.is_term() {
            return false;
        }
        let question = format!(
            "[archexec] {} exists but no package manager is running. Remove it? [y/N] ",
            lock_path.display()
        );
        self.ask(|| {
            term.write_str(&question).is_ok()
                && term.read_line().is_ok_and(|answer| {
                    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
                })
        })
    }
}
