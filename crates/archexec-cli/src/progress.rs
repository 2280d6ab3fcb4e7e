//! Queue progress on stderr using indicatif.

use archexec::model::{QueueStatus, StreamKind};
use archexec::queue::QueueUpdate;
use archexec::runner::{ExecutionEvent, ExecutionObserver};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One spinner per running entry, one line per finished entry. Child output
/// is printed above the spinner.
pub struct QueueProgress {
    spinner: Mutex<Option<ProgressBar>>,
    show_status: bool,
}

impl QueueProgress {
    pub fn new(show_status: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            show_status,
        }
    }

    pub fn on_update(&self, update: QueueUpdate<'_>) {
        let position = format!("[{}/{}]", update.index + 1, update.total);
        let entry = update.entry;
        match entry.status {
            QueueStatus::Running => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.set_message(format!("{position} {}", entry.description));
                pb.enable_steady_tick(Duration::from_millis(100));
                self.replace(Some(pb));
            }
            QueueStatus::Completed | QueueStatus::Failed => {
                if let Some(pb) = self.replace(None) {
                    pb.finish_and_clear();
                }
                let icon = if entry.status == QueueStatus::Completed {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                let elapsed = entry
                    .result
                    .as_ref()
                    .map(|result| format!(" ({:.2}s)", result.duration_secs))
                    .unwrap_or_default();
                let _ = writeln!(
                    std::io::stderr(),
                    "  {icon} {position} {}{elapsed}",
                    entry.description
                );
            }
            QueueStatus::Pending => {}
        }
    }

    /// Run `f` with the spinner hidden.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.current() {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    fn current(&self) -> Option<ProgressBar> {
        self.spinner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, next: Option<ProgressBar>) -> Option<ProgressBar> {
        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *spinner, next)
    }

    fn print(&self, line: &str) {
        match self.current() {
            Some(pb) if !pb.is_hidden() => pb.println(line),
            _ => {
                let _ = writeln!(std::io::stderr(), "{line}");
            }
        }
    }
}

impl ExecutionObserver for QueueProgress {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::Output {
                stream: StreamKind::Stdout,
                line,
            } => self.print(line),
            ExecutionEvent::Output {
                stream: StreamKind::Stderr,
                line,
            } => self.print(&style(line).yellow().to_string()),
            ExecutionEvent::Status { message } if self.show_status => {
                self.print(&style(message).dim().to_string());
            }
            _ => {}
        }
    }
}
