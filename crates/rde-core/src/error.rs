//! Error taxonomy shared across the RDE runtime.
//!
//! Mirrors the policy table in the error-handling design: configuration
//! errors fail fast before `run`, checkpoint errors refuse to run,
//! transient I/O errors are retried at the point of origin, operator
//! errors fail the node and propagate cancellation, and fatal errors
//! surface with node/`_i` context attached by the caller.

use thiserror::Error;

/// Errors produced by the RDE runtime.
#[derive(Debug, Error)]
pub enum RdeError {
    /// A URI used a scheme the stream factory does not recognize.
    #[error("unknown stream protocol: {0}")]
    ProtocolUnknown(String),

    /// A bounded read exceeded its caller-supplied timeout.
    #[error("timeout exceeded waiting for node '{node_id}'")]
    TimeoutExceeded { node_id: String },

    /// The first record read at a resume offset did not carry the
    /// expected `_i`; the stream and the checkpoint have diverged.
    #[error("checkpoint mismatch on '{node_id}': expected _i={expected}, found _i={found}")]
    CheckpointMismatch {
        node_id: String,
        expected: i64,
        found: i64,
    },

    /// Recovery was requested but an intermediate stream is memory-backed
    /// and therefore cannot survive a crash. Declared misconfiguration;
    /// never silently downgraded to a durable stream.
    #[error("pipeline '{pipeline_id}' requests recovery but node '{node_id}' has a memory-backed intermediate stream")]
    NonDurableIntermediate {
        pipeline_id: String,
        node_id: String,
    },

    /// Two configuration sources disagree about a node's parameters
    /// (e.g. a manifest on disk vs. a conflicting per-node override).
    #[error("conflicting configuration for node '{node_id}': {detail}")]
    ConfigConflict { node_id: String, detail: String },

    /// An I/O operation against a stream's backing storage failed.
    #[error("I/O failure on stream '{uri}': {source}")]
    IoFailure {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    /// A channel producer observed a full bounded queue. Informational,
    /// not fatal — reported for observability, not surfaced as failure.
    #[error("backpressure: channel for '{node_id}' is full")]
    BackpressureBlocked { node_id: String },

    /// An operator invocation returned an error or panicked.
    #[error("operator '{node_id}' failed: {source}")]
    OperatorFailed {
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Any other error, with context attached via `anyhow::Context`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RdeError>;
