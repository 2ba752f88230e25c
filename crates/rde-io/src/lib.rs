//! # RDE I/O - Stream Bus
//!
//! Addressable I/O endpoints for pipeline nodes: JSONL and CSV files,
//! in-memory queues, and the streaming bridge used between concurrent
//! nodes in streaming mode. A [`StreamFactory`] routes a URI to the right
//! codec; every codec implements the same [`Stream`] trait so the node
//! engines in `rde-tx` never special-case the backing format.

mod async_writer;
mod bridge;
mod csv;
mod factory;
mod jsonl;
mod memory;
mod stream;

pub use async_writer::{AsyncBatchWriter, AsyncWriterConfig};
pub use bridge::BridgeStream;
pub use csv::CsvStream;
pub use factory::StreamFactory;
pub use jsonl::JsonlStream;
pub use memory::MemoryStream;
pub use stream::{Stream, StreamReader, StreamState, StreamWriter};
