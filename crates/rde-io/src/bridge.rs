//! Streaming bridge: the bounded in-memory stream connecting adjacent
//! nodes in streaming mode, with zero-progress annealing so a downstream
//! reader starting before its upstream has written anything doesn't
//! misread "nothing yet" as "sealed and done".

use std::time::Duration;

use async_trait::async_trait;
use rde_core::Record;

use crate::memory::MemoryStream;
use crate::stream::{Stream, StreamReader, StreamState, StreamWriter};

/// Retry bound for zero-progress annealing: a `read` that returns empty
/// while the stream is still unsealed waits this many times, this long
/// each, before yielding empty to the caller.
const ANNEAL_ATTEMPTS: u32 = 5;
const ANNEAL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct BridgeStream {
    inner: MemoryStream,
}

impl BridgeStream {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: MemoryStream::new(label),
        }
    }
}

#[async_trait]
impl Stream for BridgeStream {
    async fn record_count(&self) -> rde_core::Result<i64> {
        self.inner.record_count().await
    }

    async fn is_sealed(&self) -> rde_core::Result<bool> {
        self.inner.is_sealed().await
    }

    async fn unseal(&self) -> rde_core::Result<()> {
        self.inner.unseal().await
    }

    async fn clear(&self) -> rde_core::Result<()> {
        self.inner.clear().await
    }

    async fn state(&self) -> rde_core::Result<StreamState> {
        self.inner.state().await
    }

    async fn get_reader(&self, offset: i64) -> rde_core::Result<Box<dyn StreamReader>> {
        let inner = self.inner.get_reader(offset).await?;
        Ok(Box::new(AnnealingReader {
            inner,
            stream: self.inner.clone(),
        }))
    }

    async fn get_writer(&self) -> rde_core::Result<Box<dyn StreamWriter>> {
        self.inner.get_writer().await
    }
}

struct AnnealingReader {
    inner: Box<dyn StreamReader>,
    stream: MemoryStream,
}

#[async_trait]
impl StreamReader for AnnealingReader {
    async fn read(
        &mut self,
        batch_size: usize,
        timeout: Option<Duration>,
    ) -> rde_core::Result<Vec<Record>> {
        for attempt in 0..=ANNEAL_ATTEMPTS {
            let batch = self.inner.read(batch_size, timeout).await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if self.stream.is_sealed().await? {
                return Ok(batch);
            }
            if attempt == ANNEAL_ATTEMPTS {
                return Ok(batch);
            }
            tokio::time::sleep(ANNEAL_INTERVAL).await;
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn empty_unsealed_stream_anneals_then_returns_empty() {
        let bridge = BridgeStream::new("t");
        let mut reader = bridge.get_reader(0).await.unwrap();
        let started = std::time::Instant::now();
        let batch = reader.read(10, None).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= ANNEAL_INTERVAL * ANNEAL_ATTEMPTS);
    }

    #[tokio::test]
    async fn sealed_empty_stream_returns_immediately() {
        let bridge = BridgeStream::new("t");
        let mut writer = bridge.get_writer().await.unwrap();
        writer.close().await.unwrap();

        let mut reader = bridge.get_reader(0).await.unwrap();
        let started = std::time::Instant::now();
        let batch = reader.read(10, None).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() < ANNEAL_INTERVAL);
    }

    #[tokio::test]
    async fn state_tracks_unopened_open_sealed() {
        let bridge = BridgeStream::new("t");
        assert_eq!(bridge.state().await.unwrap(), StreamState::Unopened);

        let mut writer = bridge.get_writer().await.unwrap();
        assert_eq!(bridge.state().await.unwrap(), StreamState::Open);

        writer.close().await.unwrap();
        assert_eq!(bridge.state().await.unwrap(), StreamState::Sealed);
    }

    #[tokio::test]
    async fn data_arriving_mid_anneal_is_observed() {
        let bridge = BridgeStream::new("t");
        let writer_state = bridge.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut w = writer_state.get_writer().await.unwrap();
            w.write(vec![Record::boxed(0, Map::new())]).await.unwrap();
        });
        let mut reader = bridge.get_reader(0).await.unwrap();
        let batch = reader.read(10, None).await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
