//! Runtime manifest and checkpoint file: the sole source of truth on
//! resume. Both are written append-then-rename (write to a `.tmp`
//! sibling, then atomic rename) so a crash mid-write never leaves a
//! torn file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rde_core::{AsyncWriterSpec, NodeStatus, OperatorSpec, RdeError};
use serde::{Deserialize, Serialize};

use crate::plan::Plan;

/// A node's manifest entry doubles as the external topology record: it
/// carries the `progress`/`status` a reader can sanity-check against
/// `checkpoint.json` at creation time (both start at their defaults),
/// plus `extra`, the custom-operator payload the manifest otherwise
/// drops on the floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestNode {
    pub node_id: String,
    pub input_uri: String,
    pub output_uri: String,
    pub batch_size: usize,
    pub parallel_size: usize,
    pub timeout_secs: Option<u64>,
    pub async_writer: Option<AsyncWriterSpec>,
    pub progress: i64,
    pub status: NodeStatus,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Topology snapshot: what `create` planned, frozen so later code
/// changes to the pipeline spec don't retroactively alter a running or
/// resumable pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub pipeline_id: String,
    pub streaming: bool,
    pub nodes: Vec<ManifestNode>,
}

impl Manifest {
    pub fn from_plan(plan: &Plan, streaming: bool) -> Self {
        Self {
            pipeline_id: plan.pipeline_id.clone(),
            streaming,
            nodes: plan
                .nodes
                .iter()
                .map(|n| ManifestNode {
                    node_id: n.node_id.clone(),
                    input_uri: n.input_uri.clone(),
                    output_uri: n.output_uri.clone(),
                    batch_size: n.batch_size,
                    parallel_size: n.parallel_size,
                    timeout_secs: n.timeout_secs,
                    async_writer: n.async_writer,
                    progress: 0,
                    status: NodeStatus::Pending,
                    extra: match &n.operator {
                        OperatorSpec::Custom { extra, .. } => extra.clone(),
                        _ => serde_json::Map::new(),
                    },
                })
                .collect(),
        }
    }
}

/// Progress counters per node, updated after every successful batch
/// write. A node's terminal status is derived from its output stream's
/// seal marker rather than duplicated here: a stream is only ever
/// sealed once its producing node reaches `Completed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub progress: HashMap<String, i64>,
}

impl Checkpoint {
    pub fn progress_for(&self, node_id: &str) -> i64 {
        *self.progress.get(node_id).unwrap_or(&0)
    }

    pub fn record(&mut self, node_id: &str, progress: i64) {
        self.progress.insert(node_id.to_string(), progress);
    }
}

/// Owns the two files under a pipeline's results directory.
pub struct ManifestStore {
    results_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.results_dir.join("runtime.json")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.results_dir.join("checkpoint.json")
    }

    pub async fn write_manifest(&self, manifest: &Manifest) -> rde_core::Result<()> {
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
        atomic_write(&self.manifest_path(), &json).await
    }

    pub async fn read_manifest(&self) -> rde_core::Result<Option<Manifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        let manifest = serde_json::from_slice(&raw).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
        Ok(Some(manifest))
    }

    pub async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> rde_core::Result<()> {
        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
        atomic_write(&self.checkpoint_path(), &json).await
    }

    pub async fn read_checkpoint(&self) -> rde_core::Result<Checkpoint> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(Checkpoint::default());
        }
        let raw = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        serde_json::from_slice(&raw).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))
    }

    /// Remove both files, clearing any prior run's state for this
    /// pipeline id. Called by `create`, never by `resume`.
    pub async fn clear(&self) -> rde_core::Result<()> {
        tokio::fs::create_dir_all(&self.results_dir)
            .await
            .map_err(|e| io_err(&self.results_dir, e))?;
        for path in [self.manifest_path(), self.checkpoint_path()] {
            if path.exists() {
                tokio::fs::remove_file(&path).await.map_err(|e| io_err(&path, e))?;
            }
        }
        Ok(())
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> rde_core::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| io_err(dir, e))?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> RdeError {
    RdeError::IoFailure {
        uri: path.display().to_string(),
        source,
    }
}
