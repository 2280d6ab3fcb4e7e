use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cancellation flag and current child pid shared between the executing
/// thread and any thread that wants to cancel it.
#[derive(Debug, Default)]
pub struct ExecutionControl {
    running: AtomicBool,
    cancel: AtomicBool,
    pid: Mutex<Option<u32>>,
}

impl ExecutionControl {
    /// Mark an execution as started and clear any stale cancel request.
    pub(crate) fn begin(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        self.set_pid(None);
        self.running.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Request cancellation. Returns `false` when nothing is running.
    pub fn request_cancel(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
    }

    pub fn current_pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle that cancels whatever the runner is executing.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    control: Arc<ExecutionControl>,
}

impl CancelHandle {
    pub(crate) fn new(control: Arc<ExecutionControl>) -> Self {
        Self { control }
    }

    /// Returns `false` when no execution is in progress.
    pub fn cancel(&self) -> bool {
        self.control.request_cancel()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn current_pid(&self) -> Option<u32> {
        self.control.current_pid()
    }
}
