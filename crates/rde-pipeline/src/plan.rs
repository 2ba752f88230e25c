//! Topology planner: turns a [`PipelineSpec`] into a linear list of
//! [`PlanNode`]s with every stream URI resolved, per the path-priority
//! rule (explicit per-node URI > pipeline boundary URI > auto-generated
//! intermediate location).

use rde_core::{AsyncWriterSpec, ExecutionMode, OperatorSpec, PipelineSpec};

#[derive(Debug, Clone)]
pub struct PlanNode {
    pub node_id: String,
    pub operator: OperatorSpec,
    pub input_uri: String,
    pub output_uri: String,
    pub batch_size: usize,
    pub parallel_size: usize,
    pub timeout_secs: Option<u64>,
    pub async_writer: Option<AsyncWriterSpec>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub pipeline_id: String,
    pub nodes: Vec<PlanNode>,
}

/// Build a plan from the spec's node list and boundary URIs.
///
/// `intermediate_dir` is the directory auto-generated intermediate
/// stream URIs are rooted under, normally `PipelineSettings::intermediate_dir`.
pub fn build_plan(pipeline_id: &str, spec: &PipelineSpec, intermediate_dir: &str) -> Plan {
    let total = spec.nodes.len();
    let mut nodes = Vec::with_capacity(total);
    let mut prev_output: Option<String> = None;

    for (index, node_spec) in spec.nodes.iter().enumerate() {
        let is_first = index == 0;
        let is_last = index + 1 == total;

        let input_uri = node_spec.input_uri.clone().unwrap_or_else(|| {
            if is_first {
                spec.input.clone()
            } else {
                prev_output.clone().expect("non-first node has a predecessor")
            }
        });

        let output_uri = node_spec.output_uri.clone().unwrap_or_else(|| {
            if is_last {
                spec.output.clone()
            } else {
                intermediate_uri(pipeline_id, &node_spec.id, intermediate_dir)
            }
        });

        let parallel_size = match node_spec.mode {
            ExecutionMode::Sequential | ExecutionMode::Streaming => 1,
            ExecutionMode::Parallel { workers } => workers.max(1),
        };

        prev_output = Some(output_uri.clone());
        nodes.push(PlanNode {
            node_id: node_spec.id.clone(),
            operator: node_spec.operator.clone(),
            input_uri,
            output_uri,
            batch_size: node_spec.batch_size,
            parallel_size,
            timeout_secs: node_spec.timeout_secs,
            async_writer: node_spec.async_writer,
        });
    }

    Plan {
        pipeline_id: pipeline_id.to_string(),
        nodes,
    }
}

/// `{intermediate_dir}/{pipeline_id}/{node_id}.jsonl` — JSONL is the
/// default intermediate codec; an explicit URI overrides this.
fn intermediate_uri(pipeline_id: &str, node_id: &str, intermediate_dir: &str) -> String {
    format!("jsonl://{intermediate_dir}/{pipeline_id}/{node_id}")
}

/// A pipeline runs in streaming mode (all nodes concurrent, intermediate
/// hops replaced by in-memory bridges) if any node declares it; adjacent
/// nodes coordinate via the same bridge regardless of which one asked.
pub fn is_streaming(spec: &PipelineSpec) -> bool {
    spec.nodes
        .iter()
        .any(|n| matches!(n.mode, ExecutionMode::Streaming))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rde_core::PipelineSpec;

    fn spec() -> PipelineSpec {
        let yaml = r#"
name: demo
input: in.jsonl
output: out.jsonl
nodes:
  - id: a
    operator:
      type: passthrough
  - id: b
    operator:
      type: custom
      name: enrich
"#;
        PipelineSpec::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn boundary_nodes_use_pipeline_io() {
        let plan = build_plan("p1", &spec(), "tmp");
        assert_eq!(plan.nodes[0].input_uri, "in.jsonl");
        assert_eq!(plan.nodes[1].output_uri, "out.jsonl");
    }

    #[test]
    fn intermediate_node_boundary_is_auto_generated() {
        let plan = build_plan("p1", &spec(), "tmp");
        assert_eq!(plan.nodes[0].output_uri, "jsonl://tmp/p1/a");
        assert_eq!(plan.nodes[1].input_uri, "jsonl://tmp/p1/a");
    }

    #[test]
    fn explicit_per_node_uri_wins_and_wires_downstream() {
        let mut s = spec();
        s.nodes[0].output_uri = Some("csv://custom".to_string());
        let plan = build_plan("p1", &s, "tmp");
        assert_eq!(plan.nodes[0].output_uri, "csv://custom");
        assert_eq!(plan.nodes[1].input_uri, "csv://custom");
    }
}
