use std::path::Path;

use crate::elevation::Credential;

/// Context handed to [`Interaction::request_credential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub helper: String,
    pub command: String,
    /// 1-based attempt number within the current failure streak.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Questions the runner asks the front end. Called synchronously on the
/// executing thread; the execution waits for the answer.
pub trait Interaction: Send + Sync {
    /// Ask for the elevation credential. `None` aborts the execution.
    fn request_credential(&self, request: &CredentialRequest) -> Option<Credential>;

    /// Ask whether a stale lock file may be removed.
    fn confirm_stale_lock_removal(&self, lock_path: &Path) -> bool;
}

/// Answers every question with "no": no credential, keep the lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Interaction for Unattended {
    fn request_credential(&self, _request: &CredentialRequest) -> Option<Credential> {
        None
    }

    fn confirm_stale_lock_removal(&self, _lock_path: &Path) -> bool {
        false
    }
}
