//! The node container: binds one operator to exactly one input and one
//! output stream, and drives it through its status machine.

use std::sync::Arc;
use std::time::Duration;

use rde_core::{BatchAdapter, Context, Hooks, NodeStatus, Record, RdeError, UsageStats};
use rde_io::{AsyncBatchWriter, AsyncWriterConfig, Stream, StreamReader, StreamWriter};
use tokio_util::sync::CancellationToken;

use crate::parallel;
use crate::sequential;

/// Scheduling parameters for one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    pub batch_size: usize,
    /// `1` (or less) runs the sequential engine; more activates the
    /// parallel engine with this many concurrent dispatches.
    pub parallel_size: usize,
    pub timeout: Option<Duration>,
    /// When set, the node's writer is wrapped in an `AsyncBatchWriter`
    /// tuned with these knobs instead of writing synchronously.
    pub async_writer: Option<AsyncWriterConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            parallel_size: 1,
            timeout: None,
            async_writer: None,
        }
    }
}

/// A snapshot of a node's state, suitable for the pipeline's checkpoint.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub status: NodeStatus,
    pub progress: i64,
    pub input_uri: String,
    pub output_uri: String,
    pub usage: UsageStats,
}

pub struct Node {
    node_id: Arc<str>,
    pipeline_id: Arc<str>,
    adapter: Arc<BatchAdapter>,
    config: NodeConfig,
    hooks: Arc<dyn Hooks>,
    cancel: CancellationToken,

    input_uri: String,
    output_uri: String,
    input: Option<Box<dyn Stream>>,
    output: Option<Box<dyn Stream>>,
    reader: Option<Box<dyn StreamReader>>,
    writer: Option<Box<dyn StreamWriter>>,
    ctx: Option<Context>,

    status: NodeStatus,
    progress: i64,
}

impl Node {
    pub fn new(
        node_id: impl Into<Arc<str>>,
        pipeline_id: impl Into<Arc<str>>,
        adapter: BatchAdapter,
        config: NodeConfig,
        hooks: Arc<dyn Hooks>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            pipeline_id: pipeline_id.into(),
            adapter: Arc::new(adapter),
            config,
            hooks,
            cancel,
            input_uri: String::new(),
            output_uri: String::new(),
            input: None,
            output: None,
            reader: None,
            writer: None,
            ctx: None,
            status: NodeStatus::Pending,
            progress: 0,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Wire the node's input and output streams. Must precede `open`.
    pub fn bind_io(&mut self, input_uri: String, input: Box<dyn Stream>, output_uri: String, output: Box<dyn Stream>) {
        self.input_uri = input_uri;
        self.output_uri = output_uri;
        self.input = Some(input);
        self.output = Some(output);
    }

    /// Open the node for execution, positioning its reader at
    /// `resume_progress` (0 for a fresh run) and its writer at the
    /// stream's current tail.
    pub async fn open(&mut self, resume_progress: i64) -> rde_core::Result<()> {
        self.status = if resume_progress > 0 {
            NodeStatus::Resuming
        } else {
            NodeStatus::Pending
        };
        self.hooks.on_node_status(&self.node_id, self.status);

        let input = self.input.as_ref().expect("bind_io not called");
        let output = self.output.as_ref().expect("bind_io not called");

        if resume_progress > 0 {
            output.unseal().await?;
        }

        self.reader = Some(input.get_reader(resume_progress).await?);
        let raw_writer = output.get_writer().await?;
        self.writer = Some(match self.config.async_writer {
            Some(async_config) => Box::new(AsyncBatchWriter::spawn(raw_writer, async_config)),
            None => raw_writer,
        });
        self.progress = resume_progress;
        self.ctx = Some(Context::new(self.node_id.clone(), self.pipeline_id.clone(), self.cancel.clone()));

        self.status = NodeStatus::Running;
        self.hooks.on_node_status(&self.node_id, self.status);
        Ok(())
    }

    /// Drive the node to completion (or cancellation/failure).
    pub async fn run(&mut self) -> rde_core::Result<()> {
        let result = if self.config.parallel_size > 1 {
            parallel::drive(self).await
        } else {
            sequential::drive(self).await
        };

        self.status = match &result {
            Ok(()) if self.cancel.is_cancelled() => NodeStatus::Canceled,
            Ok(()) => NodeStatus::Completed,
            Err(_) => NodeStatus::Failed,
        };
        self.hooks.on_node_status(&self.node_id, self.status);

        if let Err(e) = &result {
            self.hooks
                .on_error(&self.node_id, rde_core::ErrorKind::Operator, &e.to_string());
        }

        self.close().await?;
        result
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.status = NodeStatus::Canceling;
        self.hooks.on_node_status(&self.node_id, self.status);
    }

    /// Always runs on every exit path: flushes the writer, and seals the
    /// output stream only if the node reached `Completed`.
    pub async fn close(&mut self) -> rde_core::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            if self.status == NodeStatus::Completed {
                writer.close().await?;
            } else {
                writer.flush().await?;
            }
        }
        self.reader = None;
        Ok(())
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            status: self.status,
            progress: self.progress,
            input_uri: self.input_uri.clone(),
            output_uri: self.output_uri.clone(),
            usage: self.ctx.as_ref().map(Context::usage_snapshot).unwrap_or_default(),
        }
    }

    pub(crate) fn config(&self) -> NodeConfig {
        self.config
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn ctx(&self) -> &Context {
        self.ctx.as_ref().expect("node not open")
    }

    pub(crate) fn reader_mut(&mut self) -> &mut Box<dyn StreamReader> {
        self.reader.as_mut().expect("node not open")
    }

    pub(crate) fn writer_mut(&mut self) -> &mut Box<dyn StreamWriter> {
        self.writer.as_mut().expect("node not open")
    }

    pub(crate) fn adapter(&self) -> Arc<BatchAdapter> {
        self.adapter.clone()
    }

    /// Advance progress and report it, called after a successful write.
    pub(crate) fn advance_progress(&mut self, new_progress: i64) {
        self.progress = new_progress;
        self.hooks.on_progress(&self.node_id, self.progress);
    }
}

/// Box the operator's per-input output groups, deriving `_i` for each
/// parent per the 1:1 / 1:N convention.
pub(crate) fn box_outputs(
    inputs: &[Record],
    outputs: Vec<Vec<serde_json::Map<String, serde_json::Value>>>,
) -> Result<Vec<Record>, RdeError> {
    if inputs.len() != outputs.len() {
        return Err(RdeError::Other(anyhow::anyhow!(
            "operator returned {} output groups for {} input records",
            outputs.len(),
            inputs.len()
        )));
    }
    let mut boxed = Vec::new();
    for (input, group) in inputs.iter().zip(outputs.into_iter()) {
        let parent_index = input.index();
        if group.len() == 1 {
            boxed.push(Record::boxed(parent_index, group.into_iter().next().unwrap()));
        } else {
            for (child, fields) in group.into_iter().enumerate() {
                boxed.push(Record::boxed_child(parent_index, child, fields));
            }
        }
    }
    Ok(boxed)
}

#[cfg(test)]
mod tests {
    use rde_core::{BatchAdapter, BatchOperator, NoopHooks, OperatorKind};
    use rde_io::{AsyncWriterConfig, JsonlStream, Stream};
    use serde_json::{Map, Value};

    use super::*;

    /// Reports one request of usage per item processed — stands in for
    /// an operator billing against a paid LLM API per call.
    struct Billed;
    impl BatchOperator for Billed {
        fn name(&self) -> &str {
            "billed"
        }
        fn process_batch(&self, items: Vec<Map<String, Value>>, ctx: &Context) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
            ctx.report_usage(UsageStats {
                prompt_tokens: items.len() as u64 * 10,
                completion_tokens: items.len() as u64 * 2,
                requests: items.len() as u64,
            });
            Ok(items.into_iter().map(|item| vec![item]).collect())
        }
    }

    #[tokio::test]
    async fn usage_reported_synchronously_in_operator_reaches_final_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.jsonl");
        tokio::fs::write(&input_path, "{\"_i\":0,\"v\":1}\n{\"_i\":1,\"v\":2}\n{\"_i\":2,\"v\":3}\n")
            .await
            .unwrap();
        let output_path = dir.path().join("out.jsonl");

        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(Billed)));
        let config = NodeConfig {
            batch_size: 2,
            parallel_size: 1,
            timeout: None,
            async_writer: None,
        };
        let mut node = Node::new("n0", "p0", adapter, config, Arc::new(NoopHooks), CancellationToken::new());
        node.bind_io(
            input_path.display().to_string(),
            Box::new(JsonlStream::new(&input_path)),
            output_path.display().to_string(),
            Box::new(JsonlStream::new(&output_path)),
        );
        node.open(0).await.unwrap();
        node.run().await.unwrap();

        let usage = node.snapshot().usage;
        assert_eq!(usage.requests, 3);
        assert_eq!(usage.prompt_tokens, 30);
        assert_eq!(usage.completion_tokens, 6);
    }

    #[tokio::test]
    async fn async_writer_config_routes_writes_through_the_async_writer() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.jsonl");
        let lines: String = (0..5).map(|i| format!("{{\"_i\":{i},\"v\":{i}}}\n")).collect();
        tokio::fs::write(&input_path, lines).await.unwrap();
        let output_path = dir.path().join("out.jsonl");

        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(Billed)));
        let config = NodeConfig {
            batch_size: 2,
            parallel_size: 1,
            timeout: None,
            async_writer: Some(AsyncWriterConfig {
                queue_size: 4,
                flush_batch_size: 2,
                flush_interval: Duration::from_millis(50),
            }),
        };
        let mut node = Node::new("n0", "p0", adapter, config, Arc::new(NoopHooks), CancellationToken::new());
        node.bind_io(
            input_path.display().to_string(),
            Box::new(JsonlStream::new(&input_path)),
            output_path.display().to_string(),
            Box::new(JsonlStream::new(&output_path)),
        );
        node.open(0).await.unwrap();
        node.run().await.unwrap();

        let stream = JsonlStream::new(&output_path);
        assert!(stream.is_sealed().await.unwrap());
        assert_eq!(stream.record_count().await.unwrap(), 5);
    }
}
