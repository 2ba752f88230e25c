//! YAML-loadable pipeline configuration.
//!
//! Mirrors the shape of the node graph itself: a pipeline is a linear
//! sequence of nodes, each wrapping exactly one operator plus its I/O
//! wiring and execution mode.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RdeError;

/// Top-level pipeline document, as loaded from a `--pipeline` YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    /// Input record stream, e.g. `jsonl://input` or `input.jsonl`.
    pub input: String,
    /// Where final results land, e.g. `jsonl://output`.
    pub output: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub settings: PipelineSettings,
}

/// Execution-wide knobs that aren't per-node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Directory holding intermediate per-node streams and checkpoints.
    #[serde(default = "default_intermediate_dir")]
    pub intermediate_dir: String,
    /// Directory holding the final results stream copy.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            intermediate_dir: default_intermediate_dir(),
            results_dir: default_results_dir(),
        }
    }
}

fn default_intermediate_dir() -> String {
    "tmp".to_string()
}

fn default_results_dir() -> String {
    "tmp/results".to_string()
}

/// One node in the pipeline: an operator plus its execution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub operator: OperatorSpec,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Batch size handed to the operator per invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-operator invocation timeout, in seconds. `None` means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Explicit input stream URI, highest path-priority. Normally left
    /// unset so the planner auto-generates an intermediate location.
    #[serde(default)]
    pub input_uri: Option<String>,
    /// Explicit output stream URI, highest path-priority.
    #[serde(default)]
    pub output_uri: Option<String>,
    /// Enables the asynchronous batch writer for this node's output.
    /// Omit entirely to write synchronously (the default); include it,
    /// even empty, to opt in with these (defaulted) tuning knobs.
    #[serde(default)]
    pub async_writer: Option<AsyncWriterSpec>,
}

fn default_batch_size() -> usize {
    32
}

/// Per-node asynchronous batch writer tuning, mirroring
/// `rde_io::AsyncWriterConfig`'s defaults. Kept in `rde-core` (which has
/// no I/O of its own) so it can round-trip through YAML and the runtime
/// manifest; `rde-pipeline` converts it into the executable config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AsyncWriterSpec {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for AsyncWriterSpec {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            flush_batch_size: default_flush_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_queue_size() -> usize {
    1024
}

fn default_flush_batch_size() -> usize {
    256
}

fn default_flush_interval_ms() -> u64 {
    500
}

/// How a node's batches are dispatched to its bound operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel {
        workers: usize,
    },
    Streaming,
}

/// Tagged union of operator references. Business logic is always
/// external: `Custom` is resolved against a caller-supplied registry
/// when embedding this crate, `Shell` bridges to an external process.
/// Only `Passthrough` has a built-in implementation, and it does nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorSpec {
    /// No-op; emits each input record unchanged. Useful for wiring tests
    /// and as a placeholder node while a pipeline is under construction.
    Passthrough,
    /// Pipes each batch to an external process as JSONL on stdin and
    /// reads its JSONL reply from stdout, one output group per input
    /// line in order. The process itself owns all business logic.
    Shell { command: String },
    /// An operator identified by name, resolved against a registry the
    /// embedding application supplies. `extra` passes through to it
    /// verbatim; the runtime never interprets it.
    Custom {
        name: String,
        #[serde(default)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl PipelineSpec {
    pub fn from_yaml_str(raw: &str) -> Result<Self, RdeError> {
        serde_yaml::from_str(raw).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RdeError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RdeError::IoFailure { uri: path.as_ref().display().to_string(), source: e })?;
        Self::from_yaml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_pipeline() {
        let yaml = r#"
name: demo
input: input.jsonl
output: output.jsonl
nodes:
  - id: expand
    operator:
      type: custom
      name: expand-choices
  - id: enrich
    operator:
      type: shell
      command: ./enrich.sh
    mode:
      parallel:
        workers: 4
"#;
        let spec = PipelineSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(spec.nodes.len(), 2);
        assert_eq!(spec.settings.intermediate_dir, "tmp");
        assert!(matches!(spec.nodes[0].operator, OperatorSpec::Custom { .. }));
        assert_eq!(spec.nodes[1].mode, ExecutionMode::Parallel { workers: 4 });
    }

    #[test]
    fn defaults_apply_when_settings_omitted() {
        let yaml = "name: demo\ninput: in.jsonl\noutput: out.jsonl\nnodes: []\n";
        let spec = PipelineSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(spec.settings.results_dir, "tmp/results");
    }
}
