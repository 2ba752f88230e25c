//! In-memory queue stream (`memory://`). Backing storage for tests and
//! for intermediate hops nobody asked to persist to disk; the streaming
//! bridge in [`crate::bridge`] layers retry/annealing on top of the same
//! state.

use std::sync::Arc;

use async_trait::async_trait;
use rde_core::{Record, RdeError};
use tokio::sync::Mutex;

use crate::stream::{Stream, StreamReader, StreamState, StreamWriter};

#[derive(Default)]
pub(crate) struct MemoryState {
    pub(crate) records: Vec<Record>,
    pub(crate) sealed: bool,
    pub(crate) opened: bool,
}

/// An in-memory stream. Cloning shares the same backing state — used by
/// the factory to hand the same queue to a node's reader and writer.
#[derive(Clone)]
pub struct MemoryStream {
    label: String,
    pub(crate) state: Arc<Mutex<MemoryState>>,
}

impl MemoryStream {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub(crate) fn from_state(label: impl Into<String>, state: Arc<Mutex<MemoryState>>) -> Self {
        Self { label: label.into(), state }
    }
}

#[async_trait]
impl Stream for MemoryStream {
    async fn record_count(&self) -> rde_core::Result<i64> {
        Ok(self.state.lock().await.records.len() as i64)
    }

    async fn is_sealed(&self) -> rde_core::Result<bool> {
        Ok(self.state.lock().await.sealed)
    }

    async fn unseal(&self) -> rde_core::Result<()> {
        self.state.lock().await.sealed = false;
        Ok(())
    }

    async fn clear(&self) -> rde_core::Result<()> {
        let mut state = self.state.lock().await;
        state.records.clear();
        state.sealed = false;
        Ok(())
    }

    async fn state(&self) -> rde_core::Result<StreamState> {
        let state = self.state.lock().await;
        Ok(if state.sealed {
            StreamState::Sealed
        } else if state.opened {
            StreamState::Open
        } else {
            StreamState::Unopened
        })
    }

    async fn get_reader(&self, offset: i64) -> rde_core::Result<Box<dyn StreamReader>> {
        self.state.lock().await.opened = true;
        Ok(Box::new(MemoryReader {
            label: self.label.clone(),
            state: self.state.clone(),
            next_offset: offset,
        }))
    }

    async fn get_writer(&self) -> rde_core::Result<Box<dyn StreamWriter>> {
        self.state.lock().await.opened = true;
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
        }))
    }
}

pub(crate) struct MemoryReader {
    label: String,
    state: Arc<Mutex<MemoryState>>,
    next_offset: i64,
}

#[async_trait]
impl StreamReader for MemoryReader {
    async fn read(
        &mut self,
        batch_size: usize,
        _timeout: Option<std::time::Duration>,
    ) -> rde_core::Result<Vec<Record>> {
        let state = self.state.lock().await;
        let start = state
            .records
            .iter()
            .position(|r| r.index() >= self.next_offset)
            .unwrap_or(state.records.len());
        if let Some(first) = state.records.get(start) {
            if first.index() != self.next_offset {
                return Err(RdeError::CheckpointMismatch {
                    node_id: self.label.clone(),
                    expected: self.next_offset,
                    found: first.index(),
                });
            }
        }
        let end = (start + batch_size).min(state.records.len());
        let batch: Vec<Record> = state.records[start..end].to_vec();
        if let Some(last) = batch.last() {
            self.next_offset = last.index() + 1;
        }
        Ok(batch)
    }
}

pub(crate) struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl StreamWriter for MemoryWriter {
    async fn write(&mut self, mut records: Vec<Record>) -> rde_core::Result<()> {
        self.state.lock().await.records.append(&mut records);
        Ok(())
    }

    async fn flush(&mut self) -> rde_core::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> rde_core::Result<()> {
        self.state.lock().await.sealed = true;
        Ok(())
    }
}
