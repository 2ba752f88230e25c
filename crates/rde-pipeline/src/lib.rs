//! # RDE Pipeline - Topology Planner & Lifecycle Controller
//!
//! Plans a linear chain of nodes from an operator list and boundary
//! URIs, welds intermediate streams, snapshots a durable runtime
//! manifest, and drives execution in sequential or streaming mode. Owns
//! `create`/`resume` and the checkpoint store that makes resume
//! possible: the manifest and checkpoint file are the sole source of
//! truth for "what has already been produced", not the caller's code.

mod checkpoint_hooks;
mod manifest;
mod pipeline;
mod plan;

pub use manifest::{Checkpoint, Manifest, ManifestNode, ManifestStore};
pub use pipeline::Pipeline;
pub use plan::{build_plan, is_streaming, Plan, PlanNode};
