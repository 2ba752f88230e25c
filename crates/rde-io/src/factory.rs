//! Routes a [`StreamUri`] to the concrete stream implementation for its
//! scheme. `memory://` URIs sharing a path within one factory instance
//! resolve to the same backing queue, so a node's writer and the next
//! node's reader see the same data.

use std::collections::HashMap;
use std::sync::Arc;

use rde_core::{Scheme, StreamUri};
use tokio::sync::Mutex as AsyncMutex;

use crate::csv::CsvStream;
use crate::jsonl::JsonlStream;
use crate::memory::{MemoryState, MemoryStream};
use crate::stream::Stream;

/// Builds concrete [`Stream`] instances from URIs, keeping memory-backed
/// streams addressable by path for the lifetime of the factory.
#[derive(Default)]
pub struct StreamFactory {
    memory_registry: AsyncMutex<HashMap<String, Arc<tokio::sync::Mutex<MemoryState>>>>,
}

impl StreamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, uri: &str) -> rde_core::Result<Box<dyn Stream>> {
        let parsed = StreamUri::parse(uri)?;
        tracing::debug!(uri = %parsed.to_uri_string(), scheme = parsed.scheme.as_str(), "opening stream");
        match parsed.scheme {
            Scheme::Jsonl => Ok(Box::new(JsonlStream::new(parsed.path))),
            Scheme::Csv => Ok(Box::new(CsvStream::new(parsed.path))),
            Scheme::Memory => {
                let mut registry = self.memory_registry.lock().await;
                let state = registry
                    .entry(parsed.path.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(MemoryState::default())))
                    .clone();
                Ok(Box::new(MemoryStream::from_state(parsed.path, state)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_uris_with_same_path_share_state() {
        let factory = StreamFactory::new();
        let a = factory.open("memory://hop-1").await.unwrap();
        let b = factory.open("memory://hop-1").await.unwrap();

        let mut writer = a.get_writer().await.unwrap();
        writer
            .write(vec![rde_core::Record::boxed(0, serde_json::Map::new())])
            .await
            .unwrap();

        assert_eq!(b.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_memory_paths_are_independent() {
        let factory = StreamFactory::new();
        let a = factory.open("memory://hop-1").await.unwrap();
        let b = factory.open("memory://hop-2").await.unwrap();
        let mut writer = a.get_writer().await.unwrap();
        writer
            .write(vec![rde_core::Record::boxed(0, serde_json::Map::new())])
            .await
            .unwrap();
        assert_eq!(b.record_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn jsonl_and_csv_route_by_extension() {
        let factory = StreamFactory::new();
        let jsonl = factory.open("out.jsonl").await.unwrap();
        let csv = factory.open("out.csv").await.unwrap();
        assert_eq!(jsonl.record_count().await.unwrap(), 0);
        assert_eq!(csv.record_count().await.unwrap(), 0);
    }
}
