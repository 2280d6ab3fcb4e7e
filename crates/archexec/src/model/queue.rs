use serde::{Deserialize, Serialize};

use crate::model::request::CommandRequest;
use crate::model::result::CommandResult;

/// Lifecycle of a queued command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One command in a [`crate::queue::CommandQueue`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request: CommandRequest,
    pub description: String,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
}

impl QueueEntry {
    #[must_use]
    pub fn new(request: CommandRequest, description: impl Into<String>) -> Self {
        Self {
            request,
            description: description.into(),
            status: QueueStatus::Pending,
            result: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, QueueStatus::Completed | QueueStatus::Failed)
    }
}

/// A named maintenance operation offered by a command catalog.
///
/// Front ends build queues from these; `requires` lists executables that
/// must be installed for the item to be offered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Document shape of a queue file: a list of catalog items run in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFile {
    #[serde(default)]
    pub stop_on_failure: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub commands: Vec<CatalogItem>,
}
