//! The operator contract the core consumes.
//!
//! User operators are either batch-oriented (preferred) or per-item; the
//! node container binds a single [`BatchAdapter`] at `open` so hot-path
//! invocation never re-sniffs which variant it holds (see the "dynamic
//! operator dispatch" design note).

use serde_json::{Map, Value};

use crate::context::Context;

/// Output of a single operator invocation: equal-cardinality (1:1) or a
/// list per input record (1:N). An empty inner `Vec` for a given input
/// drops that record.
pub type OperatorOutput = anyhow::Result<Vec<Map<String, Value>>>;

/// A batch-oriented operator: the preferred, more efficient shape.
///
/// Implementations must be stateless across invocations or internally
/// thread-safe — the parallel engine may invoke `process_batch`
/// concurrently from multiple worker tasks.
pub trait BatchOperator: Send + Sync {
    /// Human-readable name, used in logs and hook callbacks.
    fn name(&self) -> &str;

    /// Process a batch of unboxed business records, returning one output
    /// group per input record (1:1 for a singleton `Vec`, 1:N for a
    /// longer one, empty to drop).
    fn process_batch(
        &self,
        items: Vec<Map<String, Value>>,
        ctx: &Context,
    ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>>;
}

/// A per-item operator. The node's container fans this out across a
/// batch internally (sequentially, or via a batch-local worker pool under
/// the parallel engine).
pub trait ItemOperator: Send + Sync {
    fn name(&self) -> &str;

    /// Process one unboxed business record, returning its output group.
    fn process_item(&self, item: Map<String, Value>, ctx: &Context) -> OperatorOutput;
}

/// The dynamic-dispatch sum type bridging both operator shapes.
///
/// Bound once at `Node::open` and never re-inspected per batch.
pub enum OperatorKind {
    Batch(Box<dyn BatchOperator>),
    PerItem(Box<dyn ItemOperator>),
}

impl OperatorKind {
    pub fn name(&self) -> &str {
        match self {
            OperatorKind::Batch(op) => op.name(),
            OperatorKind::PerItem(op) => op.name(),
        }
    }
}

/// Uniform batch interface exposed to the node container regardless of
/// which operator shape is bound underneath.
///
/// For a per-item operator, `fan_out` controls how invocations are
/// distributed: `None` runs them sequentially in the calling task;
/// `Some(n)` spawns up to `n` concurrent blocking invocations sized by
/// `batch_size`, independent of the node-level worker pool.
pub struct BatchAdapter {
    kind: OperatorKind,
}

impl BatchAdapter {
    pub fn new(kind: OperatorKind) -> Self {
        Self { kind }
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// Invoke the bound operator against a batch, always blocking (the
    /// caller is expected to run this inside `spawn_blocking`).
    pub fn invoke_blocking(
        &self,
        items: Vec<Map<String, Value>>,
        ctx: &Context,
        fan_out: Option<usize>,
    ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
        match &self.kind {
            OperatorKind::Batch(op) => op.process_batch(items, ctx),
            OperatorKind::PerItem(op) => match fan_out {
                None | Some(0) | Some(1) => items
                    .into_iter()
                    .map(|item| op.process_item(item, ctx))
                    .collect(),
                Some(workers) => {
                    let workers = workers.min(items.len().max(1));
                    std::thread::scope(|scope| {
                        let chunks = split_into_chunks(items, workers);
                        let handles: Vec<_> = chunks
                            .into_iter()
                            .map(|chunk| {
                                scope.spawn(|| {
                                    chunk
                                        .into_iter()
                                        .map(|item| op.process_item(item, ctx))
                                        .collect::<anyhow::Result<Vec<_>>>()
                                })
                            })
                            .collect();
                        let mut out = Vec::new();
                        for handle in handles {
                            out.extend(handle.join().expect("operator worker panicked")?);
                        }
                        Ok(out)
                    })
                }
            },
        }
    }
}

/// Split a batch into up to `n` contiguous, order-preserving chunks.
fn split_into_chunks<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    if n <= 1 || items.len() <= 1 {
        return vec![items];
    }
    let chunk_size = items.len().div_ceil(n);
    let mut out = Vec::new();
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        out.push(iter.by_ref().take(chunk_size).collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct Double;
    impl BatchOperator for Double {
        fn name(&self) -> &str {
            "double"
        }
        fn process_batch(
            &self,
            items: Vec<Map<String, Value>>,
            _ctx: &Context,
        ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
            Ok(items
                .into_iter()
                .map(|mut item| {
                    if let Some(v) = item.get("v").and_then(Value::as_i64) {
                        item.insert("v".into(), json!(v * 2));
                    }
                    vec![item]
                })
                .collect())
        }
    }

    struct Explode(usize);
    impl ItemOperator for Explode {
        fn name(&self) -> &str {
            "explode"
        }
        fn process_item(&self, item: Map<String, Value>, _ctx: &Context) -> OperatorOutput {
            Ok((0..self.0).map(|_| item.clone()).collect())
        }
    }

    fn ctx() -> Context {
        Context::new("n0", "p0", CancellationToken::new())
    }

    #[test]
    fn batch_adapter_invokes_batch_operator() {
        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(Double)));
        let items = vec![
            serde_json::from_value(json!({"v": 1})).unwrap(),
            serde_json::from_value(json!({"v": 2})).unwrap(),
        ];
        let out = adapter.invoke_blocking(items, &ctx(), None).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0].get("v"), Some(&json!(2)));
        assert_eq!(out[1][0].get("v"), Some(&json!(4)));
    }

    #[test]
    fn batch_adapter_fans_out_per_item_operator() {
        let adapter = BatchAdapter::new(OperatorKind::PerItem(Box::new(Explode(2))));
        let items: Vec<Map<String, Value>> = (0..4)
            .map(|i| serde_json::from_value(json!({"v": i})).unwrap())
            .collect();
        let out = adapter.invoke_blocking(items, &ctx(), Some(4)).unwrap();
        assert_eq!(out.len(), 4);
        for group in &out {
            assert_eq!(group.len(), 2);
        }
    }
}
