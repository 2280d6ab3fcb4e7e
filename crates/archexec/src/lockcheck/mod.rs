//! Package-manager lock preflight.
//!
//! A lock file left behind by a crashed package manager blocks every later
//! transaction. Before running a command that touches the package database
//! the runner inspects the lock: a lock held by a live package-manager
//! process refuses the command, a stale one may be removed after the user
//! confirms.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use crate::model::LockConfig;

/// Lists running processes by name.
pub trait ProcessTable: Send + Sync {
    fn is_running(&self, name: &str) -> bool;
}

/// [`ProcessTable`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn is_running(&self, name: &str) -> bool {
        let mut system = System::new();
        system.refresh_processes();
        let running = system.processes_by_exact_name(name).next().is_some();
        debug!(name, running, "process table lookup");
        running
    }
}

/// State of the lock file at preflight time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Absent,
    /// The lock exists and a package-manager process is alive.
    Held,
    /// The lock exists but no package-manager process is running.
    Stale,
}

/// How the preflight ended, reported in status messages and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOutcome {
    Clear,
    ActiveProcess,
    Declined,
    Removed,
    RemovalFailed,
}

/// Whether a command line touches the package database.
pub fn targets_package_manager(command: &str, config: &LockConfig) -> bool {
    config.enabled && !config.manager.is_empty() && command.contains(config.manager.as_str())
}

pub fn inspect_lock(config: &LockConfig, processes: &dyn ProcessTable) -> LockState {
    if !config.lock_path.exists() {
        return LockState::Absent;
    }
    if processes.is_running(&config.manager) {
        LockState::Held
    } else {
        LockState::Stale
    }
}
