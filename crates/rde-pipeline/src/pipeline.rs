//! `Pipeline`: plans a linear topology, materializes nodes and streams,
//! persists the runtime manifest, and drives `create`/`resume`/`run`.
//!
//! Grounded on the teacher's `bins/rde-cli/src/main.rs` manual
//! source/transform/sink channel wiring and `tokio::select!` ctrl_c
//! handling, lifted into a reusable controller that also owns topology
//! planning and checkpoint persistence (neither of which the teacher's
//! inline `main` had a counterpart for).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rde_core::{Hooks, NodeStatus, PipelineSpec, RdeError, Scheme, StreamUri};
use rde_io::{BridgeStream, Stream, StreamFactory};
use rde_tx::{build_operator, CustomOperatorFactory, Node, NodeConfig};
use tokio_util::sync::CancellationToken;

use crate::checkpoint_hooks::CheckpointHooks;
use crate::manifest::{Checkpoint, Manifest, ManifestStore};
use crate::plan::{build_plan, is_streaming, Plan, PlanNode};

/// Topology planner and lifecycle controller for one pipeline run.
pub struct Pipeline {
    pipeline_id: String,
    nodes: Vec<Node>,
    resume_progress: Vec<i64>,
    skip: Vec<bool>,
    streaming: bool,
    cancel: CancellationToken,
    hooks: Arc<CheckpointHooks>,
    store: Arc<ManifestStore>,
}

impl Pipeline {
    /// Allocates the results directory, clears any prior run's
    /// checkpoint/manifest for `pipeline_id`, plans the topology, deletes
    /// stale intermediate payloads, and writes a fresh manifest.
    ///
    /// Errors eagerly (before any node opens) if a non-streaming
    /// pipeline's intermediate stream is memory-backed: it cannot
    /// survive a crash, so resuming it would silently lose data.
    pub async fn create(
        pipeline_id: impl Into<String>,
        spec: &PipelineSpec,
        hooks: Option<Arc<dyn Hooks>>,
        custom: Option<&CustomOperatorFactory>,
    ) -> rde_core::Result<Self> {
        let pipeline_id = pipeline_id.into();
        let results_dir = format!("{}/{}", spec.settings.results_dir, pipeline_id);
        let store = Arc::new(ManifestStore::new(results_dir));
        store.clear().await?;

        let plan = build_plan(&pipeline_id, spec, &spec.settings.intermediate_dir);
        let streaming = is_streaming(spec);
        validate_durability(&pipeline_id, &plan, streaming)?;

        let factory = StreamFactory::new();
        let bridges = make_bridges(&pipeline_id, &plan, streaming);

        let cancel = CancellationToken::new();
        let checkpoint_hooks = Arc::new(CheckpointHooks::spawn(store.clone(), Checkpoint::default(), hooks));

        let n = plan.nodes.len();
        let mut nodes = Vec::with_capacity(n);
        for (i, plan_node) in plan.nodes.iter().enumerate() {
            let input = open_endpoint(&factory, &bridges, plan_node, i, n, true, streaming).await?;
            let output = open_endpoint(&factory, &bridges, plan_node, i, n, false, streaming).await?;

            // Intermediate outputs belong exclusively to this pipeline_id
            // (auto-generated or explicit); stale payloads from a prior
            // attempt at the same id must not leak into the fresh run.
            if i + 1 < n {
                output.clear().await?;
            }

            let operator = build_operator(&plan_node.operator, custom).map_err(RdeError::Other)?;
            let mut node = Node::new(
                plan_node.node_id.clone(),
                pipeline_id.clone(),
                rde_core::BatchAdapter::new(operator),
                node_config(plan_node),
                checkpoint_hooks.clone(),
                cancel.clone(),
            );
            node.bind_io(plan_node.input_uri.clone(), input, plan_node.output_uri.clone(), output);
            nodes.push(node);
        }

        let manifest = Manifest::from_plan(&plan, streaming);
        store.write_manifest(&manifest).await?;

        Ok(Self {
            pipeline_id,
            nodes,
            resume_progress: vec![0; n],
            skip: vec![false; n],
            streaming,
            cancel,
            hooks: checkpoint_hooks,
            store,
        })
    }

    /// Reconstructs a pipeline from its durable manifest and checkpoint.
    /// Manifest paths and scheduling parameters are authoritative; only
    /// the operator reference for each node is taken from `spec` (the
    /// manifest does not capture business logic, just topology). Nodes
    /// whose output is already sealed are left `Completed` and skipped.
    pub async fn resume(
        pipeline_id: impl Into<String>,
        spec: &PipelineSpec,
        hooks: Option<Arc<dyn Hooks>>,
        custom: Option<&CustomOperatorFactory>,
    ) -> rde_core::Result<Self> {
        let pipeline_id = pipeline_id.into();
        let results_dir = format!("{}/{}", spec.settings.results_dir, pipeline_id);
        let store = Arc::new(ManifestStore::new(results_dir));

        let manifest = store.read_manifest().await?.ok_or_else(|| {
            RdeError::ConfigConflict {
                node_id: pipeline_id.clone(),
                detail: "no runtime manifest found; call create before resume".to_string(),
            }
        })?;
        let checkpoint = store.read_checkpoint().await?;
        let streaming = manifest.streaming;

        let operators: HashMap<&str, &rde_core::OperatorSpec> =
            spec.nodes.iter().map(|n| (n.id.as_str(), &n.operator)).collect();

        let mut plan_nodes = Vec::with_capacity(manifest.nodes.len());
        for entry in &manifest.nodes {
            let operator = operators.get(entry.node_id.as_str()).ok_or_else(|| RdeError::ConfigConflict {
                node_id: entry.node_id.clone(),
                detail: "manifest references a node with no matching operator in the supplied spec".to_string(),
            })?;
            plan_nodes.push(PlanNode {
                node_id: entry.node_id.clone(),
                operator: (*operator).clone(),
                input_uri: entry.input_uri.clone(),
                output_uri: entry.output_uri.clone(),
                batch_size: entry.batch_size,
                parallel_size: entry.parallel_size,
                timeout_secs: entry.timeout_secs,
                async_writer: entry.async_writer,
            });
        }
        let plan = Plan {
            pipeline_id: pipeline_id.clone(),
            nodes: plan_nodes,
        };

        let factory = StreamFactory::new();
        let bridges = make_bridges(&pipeline_id, &plan, streaming);

        let cancel = CancellationToken::new();
        let checkpoint_hooks = Arc::new(CheckpointHooks::spawn(store.clone(), checkpoint.clone(), hooks));

        let n = plan.nodes.len();
        let mut nodes = Vec::with_capacity(n);
        let mut resume_progress = Vec::with_capacity(n);
        let mut skip = Vec::with_capacity(n);

        for (i, plan_node) in plan.nodes.iter().enumerate() {
            let input = open_endpoint(&factory, &bridges, plan_node, i, n, true, streaming).await?;
            let output = open_endpoint(&factory, &bridges, plan_node, i, n, false, streaming).await?;

            let progress = checkpoint.progress_for(&plan_node.node_id);
            // A node's output is only ever sealed once it reached
            // `Completed`, so the seal marker alone is authoritative for
            // "already done" on resume.
            let done = output.is_sealed().await?;

            let operator = build_operator(&plan_node.operator, custom).map_err(RdeError::Other)?;
            let mut node = Node::new(
                plan_node.node_id.clone(),
                pipeline_id.clone(),
                rde_core::BatchAdapter::new(operator),
                node_config(plan_node),
                checkpoint_hooks.clone(),
                cancel.clone(),
            );
            node.bind_io(plan_node.input_uri.clone(), input, plan_node.output_uri.clone(), output);

            nodes.push(node);
            resume_progress.push(progress);
            skip.push(done);
        }

        Ok(Self {
            pipeline_id,
            nodes,
            resume_progress,
            skip,
            streaming,
            cancel,
            hooks: checkpoint_hooks,
            store,
        })
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Cooperative cancellation, propagated to every node.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A snapshot of every node's status, progress, and accumulated usage,
    /// in topology order.
    pub fn node_snapshots(&self) -> Vec<(String, NodeStatus, i64, rde_core::UsageStats)> {
        self.nodes
            .iter()
            .map(|n| {
                let snap = n.snapshot();
                (n.node_id().to_string(), snap.status, snap.progress, snap.usage)
            })
            .collect()
    }

    /// Drives every non-completed node to completion: sequentially, each
    /// node's output feeding the next, or concurrently with adjacent
    /// nodes connected by in-memory bridges.
    ///
    /// Registers a ctrl_c handler for the duration of the call: one
    /// interrupt cancels cooperatively and lets in-flight batches drain;
    /// a second is treated as forced termination.
    pub async fn run(&mut self) -> rde_core::Result<()> {
        let sigint_count = Arc::new(AtomicUsize::new(0));
        let watcher = {
            let cancel = self.cancel.clone();
            let count = sigint_count.clone();
            tokio::spawn(async move {
                loop {
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                    let hits = count.fetch_add(1, Ordering::SeqCst) + 1;
                    if hits == 1 {
                        cancel.cancel();
                    } else {
                        std::process::exit(130);
                    }
                }
            })
        };

        let result = if self.streaming {
            self.run_streaming().await
        } else {
            self.run_sequential().await
        };

        watcher.abort();
        result
    }

    async fn run_sequential(&mut self) -> rde_core::Result<()> {
        for i in 0..self.nodes.len() {
            if self.skip[i] {
                continue;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.nodes[i].open(self.resume_progress[i]).await?;
            if let Err(e) = self.nodes[i].run().await {
                for node in self.nodes[i + 1..].iter_mut() {
                    node.cancel();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn run_streaming(&mut self) -> rde_core::Result<()> {
        let n = self.nodes.len();
        let mut set = tokio::task::JoinSet::new();
        let mut slots: Vec<Option<Node>> = (0..n).map(|_| None).collect();

        for (i, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if self.skip[i] {
                slots[i] = Some(node);
                continue;
            }
            let progress = self.resume_progress[i];
            set.spawn(async move {
                let mut node = node;
                node.open(progress).await?;
                node.run().await?;
                Ok::<(usize, Node), RdeError>((i, node))
            });
        }

        let mut first_err: Option<RdeError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok((i, node))) => slots[i] = Some(node),
                Ok(Err(e)) => {
                    self.cancel.cancel();
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(join_err) => {
                    self.cancel.cancel();
                    if first_err.is_none() {
                        first_err = Some(RdeError::Other(anyhow::anyhow!(join_err)));
                    }
                }
            }
        }

        self.nodes = slots.into_iter().map(|n| n.expect("every index accounted for")).collect();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn node_config(plan_node: &PlanNode) -> NodeConfig {
    NodeConfig {
        batch_size: plan_node.batch_size,
        parallel_size: plan_node.parallel_size,
        timeout: plan_node.timeout_secs.map(std::time::Duration::from_secs),
        async_writer: plan_node.async_writer.map(async_writer_config),
    }
}

/// `rde_core::AsyncWriterSpec` (YAML/manifest-facing) to
/// `rde_io::AsyncWriterConfig` (the executable knobs `AsyncBatchWriter`
/// takes). A plain function rather than `From`: both types are foreign
/// to this crate, so the orphan rule rules out the trait impl.
fn async_writer_config(spec: rde_core::AsyncWriterSpec) -> rde_io::AsyncWriterConfig {
    rde_io::AsyncWriterConfig {
        queue_size: spec.queue_size,
        flush_batch_size: spec.flush_batch_size,
        flush_interval: std::time::Duration::from_millis(spec.flush_interval_ms),
    }
}

/// `create`/`resume` never silently downgrade a declared-durable
/// intermediate to memory: if the pipeline isn't streaming (where
/// intermediates are bridges by construction, not a user choice), any
/// node whose output scheme parses as `memory` is a misconfiguration.
fn validate_durability(pipeline_id: &str, plan: &Plan, streaming: bool) -> rde_core::Result<()> {
    if streaming {
        return Ok(());
    }
    let n = plan.nodes.len();
    for (i, node) in plan.nodes.iter().enumerate() {
        if i + 1 == n {
            continue;
        }
        if StreamUri::parse(&node.output_uri)?.scheme == Scheme::Memory {
            return Err(RdeError::NonDurableIntermediate {
                pipeline_id: pipeline_id.to_string(),
                node_id: node.node_id.clone(),
            });
        }
    }
    Ok(())
}

fn make_bridges(pipeline_id: &str, plan: &Plan, streaming: bool) -> Vec<BridgeStream> {
    if !streaming || plan.nodes.len() < 2 {
        return Vec::new();
    }
    (0..plan.nodes.len() - 1)
        .map(|i| BridgeStream::new(format!("{pipeline_id}-bridge-{i}")))
        .collect()
}

/// Opens the stream endpoint for `plan_node` at position `i` of `n`: a
/// boundary endpoint always goes through the factory against its
/// caller-specified URI; an intermediate endpoint in streaming mode is
/// the shared bridge with the adjacent node instead.
async fn open_endpoint(
    factory: &StreamFactory,
    bridges: &[BridgeStream],
    plan_node: &PlanNode,
    i: usize,
    n: usize,
    is_input: bool,
    streaming: bool,
) -> rde_core::Result<Box<dyn Stream>> {
    if is_input {
        if i == 0 || !streaming {
            factory.open(&plan_node.input_uri).await
        } else {
            Ok(Box::new(bridges[i - 1].clone()))
        }
    } else if i + 1 == n || !streaming {
        factory.open(&plan_node.output_uri).await
    } else {
        Ok(Box::new(bridges[i].clone()))
    }
}
