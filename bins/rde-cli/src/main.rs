//! # RDE CLI - Pipeline Runner
//!
//! Loads a YAML [`PipelineSpec`] and drives it to completion via
//! [`rde_pipeline::Pipeline`], with structured logging and graceful
//! shutdown on ctrl_c.
//!
//! ```bash
//! rde-cli --pipeline pipeline.yml
//! rde-cli --pipeline pipeline.yml --resume
//! rde-cli --pipeline pipeline.yml --pipeline-id nightly-2026-07-27
//! ```
//!
//! The CLI carries no business logic of its own: every node's operator
//! must resolve to `Passthrough` or `Shell` (the two built-ins), since
//! this binary has no registry to hand `Pipeline::create`/`resume` for
//! `Custom` operator references. Embedding applications that need
//! `Custom` operators build their own thin runner around the same
//! `rde_pipeline::Pipeline` API, supplying a `CustomOperatorFactory`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rde_core::{ErrorKind, Hooks, NodeStatus, PipelineSpec};
use rde_pipeline::Pipeline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the RDE pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "rde-cli")]
#[command(about = "Runs an RDE data pipeline from a YAML spec")]
struct Args {
    /// Path to the pipeline YAML configuration file.
    #[arg(short, long)]
    pipeline: PathBuf,

    /// Identifier for this pipeline run; defaults to the spec's `name`.
    /// Determines the results directory and is the key resume looks up.
    #[arg(long)]
    pipeline_id: Option<String>,

    /// Resume a previously created pipeline instead of starting fresh.
    /// Requires a manifest to already exist for `pipeline_id`.
    #[arg(long, default_value_t = false)]
    resume: bool,
}

/// Logs every hook event at the appropriate level. The core's `Hooks`
/// contract is the only observability surface a caller not embedding
/// this runtime sees; the CLI's implementation just forwards to
/// `tracing`.
struct TracingHooks;

impl Hooks for TracingHooks {
    fn on_node_status(&self, node_id: &str, status: NodeStatus) {
        tracing::info!(node_id, ?status, "node status changed");
    }

    fn on_progress(&self, node_id: &str, progress: i64) {
        tracing::debug!(node_id, progress, "node progress advanced");
    }

    fn on_error(&self, node_id: &str, kind: ErrorKind, detail: &str) {
        tracing::error!(node_id, ?kind, detail, "pipeline error");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.pipeline)
        .with_context(|| format!("reading pipeline spec at {}", args.pipeline.display()))?;
    let spec = PipelineSpec::from_yaml_str(&raw).context("parsing pipeline spec")?;
    let pipeline_id = args.pipeline_id.clone().unwrap_or_else(|| spec.name.clone());

    let hooks: std::sync::Arc<dyn Hooks> = std::sync::Arc::new(TracingHooks);
    let mut pipeline = if args.resume {
        tracing::info!(pipeline_id, "resuming pipeline");
        Pipeline::resume(pipeline_id.clone(), &spec, Some(hooks), None).await?
    } else {
        tracing::info!(pipeline_id, "creating pipeline");
        Pipeline::create(pipeline_id.clone(), &spec, Some(hooks), None).await?
    };

    pipeline.run().await?;

    for (node_id, status, progress, usage) in pipeline.node_snapshots() {
        tracing::info!(
            node_id,
            ?status,
            progress,
            requests = usage.requests,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "final node state"
        );
    }

    Ok(())
}
