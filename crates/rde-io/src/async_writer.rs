//! Asynchronous batch writer: buffers records onto a bounded channel so
//! a node's hot path never blocks on physical I/O; a background task
//! drains the channel and performs the actual writes. Implements
//! [`StreamWriter`] itself, so a node can wrap any other writer in one of
//! these and nothing downstream has to know the difference.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rde_core::{RdeError, Record};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::stream::StreamWriter;

#[derive(Debug, Clone, Copy)]
pub struct AsyncWriterConfig {
    /// Capacity of the channel producers enqueue onto; a full channel
    /// makes `write` await (the sole backpressure mechanism).
    pub queue_size: usize,
    /// Physical write is triggered once this many records have
    /// accumulated...
    pub flush_batch_size: usize,
    /// ...or this long has elapsed since the last flush, whichever comes
    /// first.
    pub flush_interval: Duration,
}

impl Default for AsyncWriterConfig {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            flush_batch_size: 256,
            flush_interval: Duration::from_millis(500),
        }
    }
}

enum Command {
    Write(Vec<Record>),
    /// Drain pending records into the inner writer and sync. `seal`
    /// distinguishes `close` (flush + seal) from `flush` (sync only).
    Shutdown { seal: bool, reply: oneshot::Sender<rde_core::Result<()>> },
}

/// Wraps a [`StreamWriter`] with channel-backed asynchronous flushing.
/// `flush` and `close` both terminate the background worker — a node
/// only ever calls one of them once, at the end of its lifecycle, so
/// there's no later write that would find the worker gone.
pub struct AsyncBatchWriter {
    tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl AsyncBatchWriter {
    pub fn spawn(inner: Box<dyn StreamWriter>, config: AsyncWriterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let last_error = Arc::new(Mutex::new(None));
        let worker = tokio::spawn(drain_loop(inner, rx, config.flush_batch_size, config.flush_interval, last_error.clone()));
        Self {
            tx,
            worker: Some(worker),
            last_error,
        }
    }

    fn drain_failure(&self) -> RdeError {
        let detail = self
            .last_error
            .lock()
            .expect("last_error mutex poisoned")
            .clone()
            .unwrap_or_else(|| "async writer's drain task has exited".to_string());
        RdeError::Other(anyhow::anyhow!(detail))
    }
}

#[async_trait]
impl StreamWriter for AsyncBatchWriter {
    /// Enqueue records for background flush. Awaits if the channel is
    /// full — the only backpressure point in the async writer.
    async fn write(&mut self, records: Vec<Record>) -> rde_core::Result<()> {
        self.tx
            .send(Command::Write(records))
            .await
            .map_err(|_| self.drain_failure())
    }

    async fn flush(&mut self) -> rde_core::Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { seal: false, reply }).await.is_err() {
            return Err(self.drain_failure());
        }
        let result = rx.await.map_err(|_| self.drain_failure())?;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        result
    }

    async fn close(&mut self) -> rde_core::Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { seal: true, reply }).await.is_err() {
            return Err(self.drain_failure());
        }
        let result = rx.await.map_err(|_| self.drain_failure())?;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        result
    }
}

async fn drain_loop(
    mut inner: Box<dyn StreamWriter>,
    mut rx: mpsc::Receiver<Command>,
    flush_batch_size: usize,
    flush_interval: Duration,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let mut pending: Vec<Record> = Vec::new();
    loop {
        let timeout = tokio::time::sleep(flush_interval);
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(Command::Write(mut records)) => {
                        pending.append(&mut records);
                        if pending.len() >= flush_batch_size {
                            if let Err(e) = flush(&mut inner, &mut pending).await {
                                *last_error.lock().expect("last_error mutex poisoned") = Some(e.to_string());
                                return;
                            }
                        }
                    }
                    Some(Command::Shutdown { seal, reply }) => {
                        let result = shutdown(&mut inner, &mut pending, seal).await;
                        let _ = reply.send(result);
                        return;
                    }
                    None => return,
                }
            }
            _ = timeout => {
                if let Err(e) = flush(&mut inner, &mut pending).await {
                    *last_error.lock().expect("last_error mutex poisoned") = Some(e.to_string());
                    return;
                }
            }
        }
    }
}

async fn flush(inner: &mut Box<dyn StreamWriter>, pending: &mut Vec<Record>) -> rde_core::Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(pending);
    inner.write(batch).await
}

async fn shutdown(inner: &mut Box<dyn StreamWriter>, pending: &mut Vec<Record>, seal: bool) -> rde_core::Result<()> {
    flush(inner, pending).await?;
    if seal {
        inner.close().await
    } else {
        inner.flush().await
    }
}
