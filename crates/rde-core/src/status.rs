//! The node and pipeline status machines.

use serde::{Deserialize, Serialize};

/// Status of a single node, and (reusing the same set) of the pipeline as
/// a whole per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Resuming,
    Running,
    Canceling,
    Canceled,
    Completed,
    Failed,
}

impl NodeStatus {
    /// Whether this status means the node will never run again and its
    /// output stream, if any, is settled.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Canceled | NodeStatus::Completed | NodeStatus::Failed)
    }
}

/// The pipeline shares the node status set.
pub type PipelineStatus = NodeStatus;
