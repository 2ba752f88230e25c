//! Sequential engine: read batch, invoke operator off the executor,
//! write batch, checkpoint, repeat until the reader drains a sealed
//! upstream.

use rde_core::Record;

use crate::node::{box_outputs, Node};

pub(crate) async fn drive(node: &mut Node) -> rde_core::Result<()> {
    let config = node.config();
    loop {
        if node.is_cancelled() {
            return Ok(());
        }

        let batch = node.reader_mut().read(config.batch_size, config.timeout).await?;
        if batch.is_empty() {
            return Ok(());
        }

        let ctx = node.ctx().clone();
        let adapter = node.adapter();
        let unboxed: Vec<_> = batch.iter().cloned().map(Record::unbox).collect();
        let outputs = tokio::task::spawn_blocking(move || adapter.invoke_blocking(unboxed, &ctx, None))
            .await
            .map_err(|e| rde_core::RdeError::Other(anyhow::anyhow!(e)))??;

        let boxed = box_outputs(&batch, outputs)?;
        let last_index = batch.last().expect("checked non-empty above").index();

        if !boxed.is_empty() {
            node.writer_mut().write(boxed).await?;
        }
        node.advance_progress(last_index + 1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rde_core::{BatchAdapter, BatchOperator, Context, NoopHooks, OperatorKind};
    use rde_io::{JsonlStream, Stream};
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;

    use crate::node::{Node, NodeConfig};

    struct Explode(usize);
    impl BatchOperator for Explode {
        fn name(&self) -> &str {
            "explode"
        }
        fn process_batch(
            &self,
            items: Vec<Map<String, Value>>,
            _ctx: &Context,
        ) -> anyhow::Result<Vec<Vec<Map<String, Value>>>> {
            Ok(items.into_iter().map(|item| (0..self.0).map(|_| item.clone()).collect()).collect())
        }
    }

    #[tokio::test]
    async fn sequential_engine_derives_1n_child_indices() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.jsonl");
        tokio::fs::write(&input_path, "{\"_i\":0,\"v\":1}\n{\"_i\":1,\"v\":2}\n")
            .await
            .unwrap();
        let output_path = dir.path().join("out.jsonl");

        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(Explode(2))));
        let config = NodeConfig {
            batch_size: 10,
            parallel_size: 1,
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

        let contents = tokio::fs::read_to_string(&output_path).await.unwrap();
        let indices: Vec<i64> = contents
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap().get("_i").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 10_000, 10_001]);
    }

    #[tokio::test]
    async fn sequential_engine_batches_and_stays_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.jsonl");
        let lines: String = (0..5).map(|i| format!("{{\"_i\":{i},\"v\":{i}}}\n")).collect();
        tokio::fs::write(&input_path, lines).await.unwrap();
        let output_path = dir.path().join("out.jsonl");

        let adapter = BatchAdapter::new(OperatorKind::Batch(Box::new(Explode(1))));
        let config = NodeConfig {
            batch_size: 2,
            parallel_size: 1,
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
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }
}
