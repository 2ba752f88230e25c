//! Parallel engine: a dispatcher reads batches and submits them to up to
//! `parallel_size` concurrent `spawn_blocking` invocations, gated by a
//! semaphore. Completed batches are written in dispatch order via a small
//! reorder buffer keyed by each batch's first `_i`, so the output stream
//! stays monotonically increasing even though workers finish out of
//! order.

use std::collections::BTreeMap;
use std::sync::Arc;

use rde_core::Record;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::node::{box_outputs, Node};

struct CompletedBatch {
    first_index: i64,
    records: Vec<Record>,
    last_index: i64,
}

pub(crate) async fn drive(node: &mut Node) -> rde_core::Result<()> {
    let config = node.config();
    let semaphore = Arc::new(Semaphore::new(config.parallel_size.max(1)));
    let mut in_flight: JoinSet<rde_core::Result<CompletedBatch>> = JoinSet::new();
    let mut pending: BTreeMap<i64, CompletedBatch> = BTreeMap::new();
    let mut next_expected_write: Option<i64> = None;
    let mut reader_drained = false;

    loop {
        if node.is_cancelled() {
            break;
        }

        if !reader_drained && semaphore.available_permits() > 0 {
            let batch = node.reader_mut().read(config.batch_size, config.timeout).await?;
            if batch.is_empty() {
                reader_drained = true;
            } else {
                let first_index = batch.first().unwrap().index();
                if next_expected_write.is_none() {
                    next_expected_write = Some(first_index);
                }
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let ctx = node.ctx().clone();
                let adapter = node.adapter();
                let unboxed: Vec<_> = batch.iter().cloned().map(Record::unbox).collect();
                let fan_out = config.batch_size;
                in_flight.spawn_blocking(move || {
                    let _permit = permit;
                    let outputs = adapter.invoke_blocking(unboxed, &ctx, Some(fan_out))?;
                    let boxed = box_outputs(&batch, outputs)?;
                    let last_index = batch.last().unwrap().index();
                    Ok(CompletedBatch {
                        first_index,
                        records: boxed,
                        last_index,
                    })
                });
                continue;
            }
        }

        if in_flight.is_empty() {
            if reader_drained {
                break;
            }
            continue;
        }

        let joined = in_flight
            .join_next()
            .await
            .expect("checked non-empty above")
            .map_err(|e| rde_core::RdeError::Other(anyhow::anyhow!(e)))??;
        pending.insert(joined.first_index, joined);

        // Drain the reorder buffer: write every contiguous-ready batch.
        while let Some(expected) = next_expected_write {
            let Some(batch) = pending.remove(&expected) else { break };
            let last = batch.last_index;
            if !batch.records.is_empty() {
                node.writer_mut().write(batch.records).await?;
            }
            node.advance_progress(last + 1);
            next_expected_write = Some(last + 1);
        }
    }

    // Drain any remaining in-flight work after the reader sealed.
    while let Some(result) = in_flight.join_next().await {
        let joined = result.map_err(|e| rde_core::RdeError::Other(anyhow::anyhow!(e)))??;
        pending.insert(joined.first_index, joined);
    }
    while let Some(expected) = next_expected_write {
        let Some(batch) = pending.remove(&expected) else { break };
        let last = batch.last_index;
        if !batch.records.is_empty() {
            node.writer_mut().write(batch.records).await?;
        }
        node.advance_progress(last + 1);
        next_expected_write = Some(last + 1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rde_core::{BatchAdapter, BatchOperator, Context, NoopHooks, OperatorKind};
    use rde_io::{JsonlStream, Stream};
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;

    use crate::node::{Node, NodeConfig};

    /// The first record's batch sleeps longest, so its worker finishes
    /// last even though it was dispatched first — exercising the
    /// reorder buffer that keeps the output monotonically increasing.
    struct SlowestFirst;
    impl BatchOperator for SlowestFirst {
        fn name(&self) -> &str {
            "slowest-first"
        }
        fn process_batch(
            &self,
            items: Vec<Map<String, Value>>,
            _ctx: &Context,
        ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
            if let Some(v) = items.first().and_then(|m| m.get("v")).and_then(Value::as_i64) {
                let delay = 60u64.saturating_sub(v as u64 * 20);
                std::thread::sleep(Duration::from_millis(delay));
            }
            Ok(items.into_iter().map(|item| vec![item]).collect())
        }
    }

    #[tokio::test]
    async fn parallel_engine_preserves_monotonic_output_despite_out_of_order_completion() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.jsonl");
        let lines: String = (0..3).map(|i| format!("{{\"_i\":{i},\"v\":{i}}}\n")).collect();
        tokio::fs::write(&input_path, lines).await.unwrap();
        let output_path = dir.path().join("out.jsonl");

        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(SlowestFirst)));
        let config = NodeConfig {
            batch_size: 1,
            parallel_size: 3,
            timeout: None,
            async_writer: None,
        };
        let mut node = Node::new(
            "n0",
            "p0",
            adapter,
            config,
            Arc::new(NoopHooks),
            CancellationToken::new(),
        );
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
        let contents = tokio::fs::read_to_string(&output_path).await.unwrap();
        let indices: Vec<i64> = contents
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap().get("_i").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
