//! archexec: privileged command execution for Arch Linux maintenance tools.
//!
//! The crate validates a requested command line against a safety policy,
//! wraps it with the elevation helper (`sudo`) when required, checks for a
//! stale package-manager lock, then runs it in its own process group while
//! streaming stdout and stderr to an observer. Every execution ends in a
//! [`CommandResult`], never in an error: rejections, failures, timeouts and
//! cancellations are all reported as data.
//!
//! Front ends drive a [`runner::Runner`] and plug in through two traits:
//! [`runner::ExecutionObserver`] for live output and status, and
//! [`runner::Interaction`] for credential prompts and stale-lock confirmation.

#![forbid(unsafe_code)]
// Public API types carry docs; internal helpers are documented where it helps.
#![allow(missing_docs)]

pub mod config;
pub mod elevation;
pub mod history;
pub mod lockcheck;
pub mod model;
pub mod policy;
pub mod queue;
pub mod runner;
pub mod session;

pub use crate::model::*;

pub mod run {
    use super::runner::Runner;
    use super::{CommandRequest, CommandResult, RunnerConfig};

    /// Execute a single request with a one-shot runner and no interaction.
    ///
    /// Credential prompts are answered with "no credential" and stale locks
    /// are never removed, so this is mostly useful for unelevated commands.
    pub fn run_command(request: CommandRequest, config: RunnerConfig) -> CommandResult {
        Runner::builder(config).build().execute(request)
    }

    /// Execute an unelevated command line with the default configuration.
    pub fn run_unelevated(command: &str) -> CommandResult {
        run_command(
            CommandRequest::new(command).with_elevation(false),
            RunnerConfig::default(),
        )
    }
}
