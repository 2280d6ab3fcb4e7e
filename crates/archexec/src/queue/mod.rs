//! Sequential command queues.
//!
//! Entries run one after another through a [`Runner`]. By default the queue
//! stops at the first entry that does not succeed and leaves the rest
//! `Pending`; a later [`CommandQueue::run`] resumes from the cursor.
//!
//! A [`QueueCanceller`] request is latched until a run observes it, so a
//! cancel that lands between entries, or just before a run starts, is never
//! lost.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::model::{CatalogItem, CommandRequest, QueueEntry, QueueStatus, RunnerConfig};
use crate::runner::{CancelHandle, Runner};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueOptions {
    pub stop_on_failure: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
        }
    }
}

impl From<&RunnerConfig> for QueueOptions {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            stop_on_failure: config.queue.stop_on_failure,
        }
    }
}

/// Reported before and after each entry runs.
#[derive(Debug, Clone, Copy)]
pub struct QueueUpdate<'a> {
    pub index: usize,
    pub total: usize,
    pub entry: &'a QueueEntry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// The run ended early because an entry failed.
    pub stopped_on_failure: bool,
    pub cancelled: bool,
}

impl QueueSummary {
    pub fn all_succeeded(&self) -> bool {
        self.completed == self.total
    }
}

/// Stops a running queue from another thread: no further entries start and
/// the current command is cancelled.
#[derive(Debug, Clone)]
pub struct QueueCanceller {
    cancel: Arc<AtomicBool>,
    handle: CancelHandle,
}

impl QueueCanceller {
    pub fn cancel(&self) {
        // Flag first; the runner reads it once it accepts cancellation.
        self.cancel.store(true, Ordering::SeqCst);
        self.handle.cancel();
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    entries: Vec<QueueEntry>,
    cursor: usize,
    options: QueueOptions,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl CommandQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            options,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append an elevated command with the default timeout.
    pub fn add_command(&mut self, command: impl Into<String>, description: impl Into<String>) {
        self.add_request(CommandRequest::new(command), description);
    }

    pub fn add_request(&mut self, request: CommandRequest, description: impl Into<String>) {
        self.entries.push(QueueEntry::new(request, description));
    }

    /// Append a catalog item, using `template` for everything but the command.
    pub fn add_catalog_item(&mut self, item: &CatalogItem, template: &CommandRequest) {
        let request = CommandRequest {
            command: item.command.clone(),
            ..template.clone()
        };
        let description = if item.description.is_empty() {
            item.name.clone()
        } else {
            item.description.clone()
        };
        self.add_request(request, description);
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `(finished, total)`, counting both completed and failed entries.
    pub fn progress(&self) -> (usize, usize) {
        let finished = self.entries.iter().filter(|e| e.is_finished()).count();
        (finished, self.entries.len())
    }

    pub fn canceller(&self, runner: &Runner) -> QueueCanceller {
        QueueCanceller {
            cancel: Arc::clone(&self.cancel),
            handle: runner.cancel_handle(),
        }
    }

    pub fn run(&mut self, runner: &Runner) -> QueueSummary {
        self.run_with(runner, |_| {})
    }

    /// Run pending entries in order, reporting each one before and after.
    ///
    /// A pending cancel request stops the run before the next entry starts
    /// and is consumed by it.
    pub fn run_with<F>(&mut self, runner: &Runner, mut on_update: F) -> QueueSummary
    where
        F: FnMut(QueueUpdate<'_>),
    {
        self.running.store(true, Ordering::SeqCst);
        let total = self.entries.len();
        let mut stopped_on_failure = false;
        let mut cancelled = false;

        while let Some(entry) = self.entries.get_mut(self.cursor) {
            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            let index = self.cursor;
            entry.status = QueueStatus::Running;
            on_update(QueueUpdate {
                index,
                total,
                entry: &*entry,
            });
            debug!(index, command = %entry.request.command, "queue entry started");

            let result = runner.execute_unless(entry.request.clone(), &self.cancel);
            let succeeded = result.succeeded();
            entry.status = if succeeded {
                QueueStatus::Completed
            } else {
                QueueStatus::Failed
            };
            entry.result = Some(result);
            on_update(QueueUpdate {
                index,
                total,
                entry: &*entry,
            });
            self.cursor += 1;

            if self.cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if !succeeded && self.options.stop_on_failure {
                stopped_on_failure = true;
                break;
            }
        }

        if cancelled {
            self.cancel.store(false, Ordering::SeqCst);
        }
        self.running.store(false, Ordering::SeqCst);
        let summary = self.summary(stopped_on_failure, cancelled);
        info!(
            completed = summary.completed,
            failed = summary.failed,
            pending = summary.pending,
            "queue finished"
        );
        summary
    }

    fn summary(&self, stopped_on_failure: bool, cancelled: bool) -> QueueSummary {
        let count = |status: QueueStatus| self.entries.iter().filter(|e| e.status == status).count();
        QueueSummary {
            total: self.entries.len(),
            completed: count(QueueStatus::Completed),
            failed: count(QueueStatus::Failed),
            pending: count(QueueStatus::Pending),
            stopped_on_failure,
            cancelled,
        }
    }
}
