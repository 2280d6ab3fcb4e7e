//! Bounded execution history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::model::{CommandResult, CommandStatus};

/// Insertion-ordered results, oldest evicted first once the cap is reached.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<CommandResult>,
    max_entries: usize,
}

impl ExecutionHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
        }
    }

    pub fn push(&mut self, result: CommandResult) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    /// Copy of the entries, oldest first.
    pub fn snapshot(&self) -> Vec<CommandResult> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats::from_results(self.entries.iter())
    }
}

/// Aggregates over the retained history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub rejected: usize,
    /// Percentage of successful executions, `0.0` for an empty history.
    pub success_rate: f64,
    pub average_duration_secs: f64,
}

impl ExecutionStats {
    // Counts stay far below 2^52, so the f64 conversions are exact.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_results<'a>(results: impl Iterator<Item = &'a CommandResult>) -> Self {
        let mut stats = Self::default();
        let mut total_duration = 0.0;
        for result in results {
            stats.total += 1;
            total_duration += result.duration_secs;
            match result.status {
                CommandStatus::Success => stats.successful += 1,
                CommandStatus::Failed => stats.failed += 1,
                CommandStatus::Cancelled => stats.cancelled += 1,
                CommandStatus::Timeout => stats.timed_out += 1,
                CommandStatus::RejectedByPolicy => stats.rejected += 1,
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.successful as f64 / stats.total as f64 * 100.0;
            stats.average_duration_secs = total_duration / stats.total as f64;
        }
        stats
    }
}
