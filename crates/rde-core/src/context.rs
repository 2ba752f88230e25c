//! Per-node context carried into every operator invocation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Usage statistics an operator can report back to the pipeline, e.g. for
/// billing or rate-limit accounting against a paid LLM API.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

impl UsageStats {
    pub fn merge(&mut self, other: &UsageStats) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.requests += other.requests;
    }
}

/// Identity, cancellation, and usage-reporting carrier passed to every
/// operator invocation.
///
/// Cloning a `Context` is cheap: the cancellation token is shared, and
/// usage is accumulated behind a lock owned by the node. The lock is a
/// plain `std::sync::Mutex`, not a tokio one: `BatchOperator`/
/// `ItemOperator` bodies are synchronous functions run inside
/// `spawn_blocking`, so they can only ever take a blocking lock, never
/// `.await` one.
#[derive(Clone)]
pub struct Context {
    node_id: Arc<str>,
    pipeline_id: Arc<str>,
    cancel: CancellationToken,
    usage: Arc<std::sync::Mutex<UsageStats>>,
}

impl Context {
    pub fn new(node_id: impl Into<Arc<str>>, pipeline_id: impl Into<Arc<str>>, cancel: CancellationToken) -> Self {
        Self {
            node_id: node_id.into(),
            pipeline_id: pipeline_id.into(),
            cancel,
            usage: Arc::new(std::sync::Mutex::new(UsageStats::default())),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Whether the node (or the pipeline it belongs to) has been asked to
    /// cancel. Long-running operators should poll this between items.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record usage statistics reported by an operator invocation. Sync,
    /// so it can be called directly from a `process_batch`/`process_item`
    /// body.
    pub fn report_usage(&self, stats: UsageStats) {
        self.usage.lock().expect("usage mutex poisoned").merge(&stats);
    }

    /// Snapshot of usage accumulated so far on this node.
    pub fn usage_snapshot(&self) -> UsageStats {
        self.usage.lock().expect("usage mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_usage_is_callable_synchronously_and_merges() {
        let ctx = Context::new("n0", "p0", CancellationToken::new());
        ctx.report_usage(UsageStats {
            prompt_tokens: 10,
            completion_tokens: 5,
            requests: 1,
        });
        ctx.report_usage(UsageStats {
            prompt_tokens: 3,
            completion_tokens: 1,
            requests: 1,
        });

        let snapshot = ctx.usage_snapshot();
        assert_eq!(snapshot.prompt_tokens, 13);
        assert_eq!(snapshot.completion_tokens, 6);
        assert_eq!(snapshot.requests, 2);
    }
}
