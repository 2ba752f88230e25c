//! # RDE Core - Rust Data Engineering Core Library
//!
//! Foundational types, traits, and error taxonomy shared across the RDE
//! ecosystem: the boxed [`Record`] model, the [`BatchOperator`]/
//! [`ItemOperator`] contract user code implements, [`Context`] carried into
//! every invocation, and the [`PipelineSpec`] YAML configuration format.
//!
//! This crate has no I/O and no execution engine of its own — those live
//! in `rde-io` and `rde-tx`, wired together by `rde-pipeline`.

mod context;
mod error;
mod hooks;
mod operator;
mod record;
mod spec;
mod status;
mod uri;

pub use context::{Context, UsageStats};
pub use error::{RdeError, Result};
pub use hooks::{ErrorKind, Hooks, NoopHooks};
pub use operator::{BatchAdapter, BatchOperator, ItemOperator, OperatorKind, OperatorOutput};
pub use record::{Record, CHILD_INDEX_BASE, INDEX_KEY};
pub use spec::{AsyncWriterSpec, ExecutionMode, NodeSpec, OperatorSpec, PipelineSettings, PipelineSpec};
pub use status::{NodeStatus, PipelineStatus};
pub use uri::{Scheme, StreamUri};
