//! Observer callbacks the pipeline drives for external monitoring.
//!
//! The core only defines the contract; concrete sinks (metrics exporters,
//! log aggregators, alerting) are external collaborators.

use crate::status::NodeStatus;

/// The category of error an [`Hooks::on_error`] callback receives,
/// matching the error-handling policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Checkpoint,
    TransientIo,
    Operator,
    Fatal,
}

/// Observer hooks invoked by the pipeline and its nodes.
///
/// Default (no-op) implementations are provided for every method so
/// callers can override only what they need.
pub trait Hooks: Send + Sync {
    /// A node transitioned to a new status.
    fn on_node_status(&self, _node_id: &str, _status: NodeStatus) {}

    /// A node advanced its durable progress counter.
    fn on_progress(&self, _node_id: &str, _progress: i64) {}

    /// An error occurred; invoked before the pipeline terminates.
    fn on_error(&self, _node_id: &str, _kind: ErrorKind, _detail: &str) {}
}

/// A [`Hooks`] implementation that does nothing, used when the caller
/// registers no observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl Hooks for NoopHooks {}
