//! Concrete operators the runtime ships itself: a no-op `Passthrough` and
//! a `Shell` bridge to an external process. Anything with actual business
//! logic is supplied by the embedding application through a
//! [`CustomOperatorFactory`] and referenced from YAML via `Custom`.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use rde_core::{BatchOperator, Context, OperatorKind, OperatorSpec};
use serde_json::{Map, Value};

/// Resolves a `Custom` operator reference to a concrete implementation.
/// Supplied by the caller embedding this crate; the runtime itself has
/// no registry of business operators.
pub type CustomOperatorFactory =
    Arc<dyn Fn(&str, &Map<String, Value>) -> anyhow::Result<OperatorKind> + Send + Sync>;

/// Builds the bound [`OperatorKind`] for a node from its YAML reference.
pub fn build_operator(
    spec: &OperatorSpec,
    custom: Option<&CustomOperatorFactory>,
) -> anyhow::Result<OperatorKind> {
    match spec {
        OperatorSpec::Passthrough => Ok(OperatorKind::Batch(Box::new(Passthrough))),
        OperatorSpec::Shell { command } => Ok(OperatorKind::Batch(Box::new(ShellOperator {
            command: command.clone(),
        }))),
        OperatorSpec::Custom { name, extra } => {
            let factory = custom.ok_or_else(|| {
                anyhow::anyhow!("node references custom operator '{name}' but no registry was supplied")
            })?;
            factory(name, extra)
        }
    }
}

struct Passthrough;

impl BatchOperator for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn process_batch(
        &self,
        items: Vec<Map<String, Value>>,
        _ctx: &Context,
    ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
        Ok(items.into_iter().map(|item| vec![item]).collect())
    }
}

/// Pipes a batch to an external process as JSONL on stdin, reads its
/// JSONL reply from stdout. Each reply line is either a JSON object
/// (1:1) or a JSON array of objects (1:N), in the same order as the
/// input lines.
struct ShellOperator {
    command: String,
}

impl BatchOperator for ShellOperator {
    fn name(&self) -> &str {
        &self.command
    }

    fn process_batch(
        &self,
        items: Vec<Map<String, Value>>,
        _ctx: &Context,
    ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        {
            let stdin = child.stdin.as_mut().expect("piped stdin");
            for item in &items {
                serde_json::to_writer(&mut *stdin, item)?;
                stdin.write_all(b"\n")?;
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!("'{}' exited with {}", self.command, output.status);
        }

        let stdout = String::from_utf8(output.stdout)?;
        let mut groups = Vec::with_capacity(items.len());
        for line in stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)?;
            let group = match value {
                Value::Array(values) => values
                    .into_iter()
                    .map(|v| v.as_object().cloned().ok_or_else(|| anyhow::anyhow!("non-object in reply array")))
                    .collect::<anyhow::Result<Vec<_>>>()?,
                Value::Object(obj) => vec![obj],
                other => anyhow::bail!("unexpected reply shape: {other}"),
            };
            groups.push(group);
        }

        if groups.len() != items.len() {
            anyhow::bail!(
                "'{}' returned {} reply lines for {} input records",
                self.command,
                groups.len(),
                items.len()
            );
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> Context {
        Context::new("n0", "p0", CancellationToken::new())
    }

    #[test]
    fn passthrough_returns_input_unchanged() {
        let op = Passthrough;
        let items = vec![serde_json::from_value(serde_json::json!({"v": 1})).unwrap()];
        let out = op.process_batch(items.clone(), &ctx()).unwrap();
        assert_eq!(out, vec![vec![items[0].clone()]]);
    }

    #[test]
    fn shell_operator_round_trips_via_cat() {
        let op = ShellOperator {
            command: "cat".to_string(),
        };
        let items = vec![
            serde_json::from_value(serde_json::json!({"v": 1})).unwrap(),
            serde_json::from_value(serde_json::json!({"v": 2})).unwrap(),
        ];
        let out = op.process_batch(items.clone(), &ctx()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![items[0].clone()]);
    }

    #[test]
    fn build_operator_requires_registry_for_custom() {
        let spec = OperatorSpec::Custom {
            name: "whatever".to_string(),
            extra: Map::new(),
        };
        let err = build_operator(&spec, None).unwrap_err();
        assert!(err.to_string().contains("no registry"));
    }
}
