//! Execution events delivered to front ends.
//!
//! Observers receive events on the thread that called
//! [`crate::runner::Runner::execute`]. Output lines arrive in the order they
//! were read from each stream; lines from stdout and stderr interleave in
//! arrival order.

use crate::model::{CommandResult, ExecutionId, StreamKind};

/// Event emitted while a command runs.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Validation passed and the command is about to be prepared.
    Started {
        execution_id: ExecutionId,
        command: String,
    },
    /// Human-readable progress message ("starting: ...", lock handling, ...).
    Status { message: String },
    /// One line of child output, already redacted and right-trimmed.
    Output { stream: StreamKind, line: String },
    /// The execution reached a terminal state.
    Finished { result: Box<CommandResult> },
}

/// Receives execution events.
///
/// Implementations must be cheap: the supervision loop waits for each call.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Observer that discards every event.
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_event(&self, _event: &ExecutionEvent) {}
}

impl<F> ExecutionObserver for F
where
    F: Fn(&ExecutionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ExecutionEvent) {
        self(event);
    }
}

/// Observer that records events, for inspection after a run.
#[derive(Default)]
pub struct CollectingObserver {
    events: std::sync::Mutex<Vec<ExecutionEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Output lines for one stream, in arrival order.
    pub fn lines(&self, stream: StreamKind) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::Output { stream: s, line } if s == stream => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::Status { message } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ExecutionObserver for CollectingObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
