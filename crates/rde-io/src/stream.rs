//! The `Stream` trait: a uniform interface over JSONL files, CSV files,
//! and in-memory queues, each giving reader/writer handles with the same
//! open/seal/resume semantics.

use async_trait::async_trait;
use rde_core::{RdeError, Record};
use serde::Serialize;

/// Content written into a `.done` seal marker: arbitrary per spec, but
/// carrying the final count and a timestamp is useful for a human
/// inspecting `tmp/` without cross-referencing the manifest.
#[derive(Serialize)]
struct SealMarker {
    record_count: i64,
    sealed_at: chrono::DateTime<chrono::Utc>,
}

/// Renders a `.done` marker's content for a stream sealed with
/// `record_count` records.
pub(crate) fn seal_marker_bytes(record_count: i64) -> rde_core::Result<Vec<u8>> {
    serde_json::to_vec(&SealMarker {
        record_count,
        sealed_at: chrono::Utc::now(),
    })
    .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))
}

/// Lifecycle state of a stream, tracked independently of the node that
/// produces or consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unopened,
    Open,
    Sealed,
}

/// A readable handle positioned at some offset into a stream.
#[async_trait]
pub trait StreamReader: Send {
    /// Read up to `batch_size` unboxed records. Returns fewer (including
    /// zero) when the stream is sealed and drained, or when no more data
    /// has arrived within `timeout` (if set).
    async fn read(
        &mut self,
        batch_size: usize,
        timeout: Option<std::time::Duration>,
    ) -> rde_core::Result<Vec<Record>>;
}

/// A writable handle appending boxed records to a stream.
#[async_trait]
pub trait StreamWriter: Send {
    /// Append already-boxed records. Never rewrites prior records.
    async fn write(&mut self, records: Vec<Record>) -> rde_core::Result<()>;

    /// Sync written data without sealing. Used on a non-`Completed` exit
    /// path, where the stream must remain appendable on resume.
    async fn flush(&mut self) -> rde_core::Result<()>;

    /// Flush, sync, and seal. Idempotent. Only ever called for a node
    /// that reached `Completed`.
    async fn close(&mut self) -> rde_core::Result<()>;
}

/// A stream bus: a codec-specific backing store exposing uniform
/// open/reader/writer/seal/resume operations.
#[async_trait]
pub trait Stream: Send + Sync {
    /// Current count of physical records written to this stream.
    async fn record_count(&self) -> rde_core::Result<i64>;

    /// Whether a `.done` marker (or in-memory equivalent) is present.
    async fn is_sealed(&self) -> rde_core::Result<bool>;

    /// Remove the seal marker, allowing append-resume.
    async fn unseal(&self) -> rde_core::Result<()>;

    /// Delete the stream's backing data and seal marker.
    async fn clear(&self) -> rde_core::Result<()>;

    /// Current lifecycle state: `Sealed` once a `.done` marker (or
    /// in-memory equivalent) is present, `Open` once a reader or writer
    /// has ever been handed out, `Unopened` otherwise.
    async fn state(&self) -> rde_core::Result<StreamState>;

    /// Obtain a reader positioned so the next `read` yields the record
    /// with `_i == offset`. `offset == 0` reads from the start.
    async fn get_reader(&self, offset: i64) -> rde_core::Result<Box<dyn StreamReader>>;

    /// Obtain a writer appending from the stream's current tail.
    async fn get_writer(&self) -> rde_core::Result<Box<dyn StreamWriter>>;
}
