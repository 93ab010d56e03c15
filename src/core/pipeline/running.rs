use futures::stream::FuturesUnordered;
use std::sync::Arc;
use tokio_stream::StreamExt;

use tokio::{sync::mpsc::Sender, task::JoinHandle};

use crate::{
    constants::BATCH_TX_ERR,
    core::{
        domain::{ExecutionRequest, ExecutionResult},
        engine::AgentEngine,
    },
};

/// Result of one request of a batch, tagged with its position in the batch.
#[derive(Clone, Debug)]
pub struct BatchItem {
    pub index: usize,
    pub result: ExecutionResult,
}

/// Runs every request concurrently and sends each result as soon as it
/// is ready. Stops early when the receiving side goes away.
#[tracing::instrument(skip(engine, requests, res_tx), fields(batch_size = requests.len()))]
pub fn handle_running(
    engine: Arc<AgentEngine>,
    requests: Vec<ExecutionRequest>,
    res_tx: Sender<BatchItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut futures = create_execution_futures(&engine, requests);

        while let Some((index, result)) = futures.next().await {
            tracing::debug!("Batch item {} finished: {}", index, result.status());
            if res_tx.send(BatchItem { index, result }).await.is_err() {
                tracing::warn!("{}", BATCH_TX_ERR);
                return;
            }
        }
    })
}

fn create_execution_futures(
    engine: &Arc<AgentEngine>,
    requests: Vec<ExecutionRequest>,
) -> FuturesUnordered<impl std::future::Future<Output = (usize, ExecutionResult)>> {
    let futures = FuturesUnordered::new();

    for (index, request) in requests.into_iter().enumerate() {
        let engine = engine.clone();
        futures.push(async move { (index, engine.execute(request).await) });
    }

    futures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        credentials::CredentialStore,
        domain::{ExecutionLimits, ExecutionStatus, RunnableSource},
        reporter::ResultReporter,
        source::SourceResolver,
        traits::executor::{MockExecutor, ProcessExit, RunResult},
    };
    use itertools::Itertools;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            time_ms: 1000,
            cpu_time_secs: Some(30),
            memory_bytes: Some(64 * 1024 * 1024),
            stdout_size_bytes: Some(1024),
            stderr_size_bytes: Some(1024),
        }
    }

    fn engine(executor: MockExecutor, scratch: &TempDir) -> Arc<AgentEngine> {
        Arc::new(AgentEngine::new(
            Arc::new(executor),
            SourceResolver::new(scratch.path(), ".py", 1000),
            ResultReporter::new(4000),
            CredentialStore::from_pairs([("ANTHROPIC_API_KEY", "sk-test")]),
        ))
    }

    #[tokio::test]
    async fn test_batch_results_tagged_by_index() {
        let scratch = TempDir::new().unwrap();
        let mut executor = MockExecutor::new();
        executor.expect_run().times(4).returning(|invocation, _| {
            Ok(RunResult {
                exit: ProcessExit::Code(0),
                stdout: format!("done: {}", invocation.task),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                execution_time_ms: 10,
            })
        });
        let engine = engine(executor, &scratch);

        let requests = (0..4)
            .map(|i| {
                ExecutionRequest::new(RunnableSource::inline("print(1)"), format!("task {}", i), limits())
                    .unwrap()
            })
            .collect();

        let (res_tx, mut res_rx) = mpsc::channel(10);
        let handle = handle_running(engine, requests, res_tx);

        let mut items = Vec::new();
        while let Some(item) = res_rx.recv().await {
            items.push(item);
        }
        handle.await.unwrap();

        // Completion order is not deterministic.
        let indexes: Vec<usize> = items.iter().map(|item| item.index).unique().sorted().collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        for item in &items {
            assert_eq!(item.result.status(), ExecutionStatus::Success);
            assert_eq!(item.result.output(), format!("done: task {}", item.index));
        }
    }

    #[tokio::test]
    async fn test_mixed_outcomes_in_one_batch() {
        let scratch = TempDir::new().unwrap();
        let mut executor = MockExecutor::new();
        executor.expect_run().times(1).returning(|_, _| {
            Ok(RunResult {
                exit: ProcessExit::Code(2),
                stdout: String::new(),
                stderr: "boom".to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
                execution_time_ms: 10,
            })
        });
        let engine = engine(executor, &scratch);

        let requests = vec![
            ExecutionRequest::new(RunnableSource::path("/nonexistent/agent.py"), "task", limits())
                .unwrap(),
            ExecutionRequest::new(RunnableSource::inline("exit(2)"), "task", limits()).unwrap(),
        ];

        let (res_tx, mut res_rx) = mpsc::channel(10);
        handle_running(engine, requests, res_tx);

        let mut items = Vec::new();
        while let Some(item) = res_rx.recv().await {
            items.push(item);
        }
        items.sort_by_key(|item| item.index);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].result.status(), ExecutionStatus::AgentNotFound);
        assert_eq!(items[1].result.status(), ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_empty_batch_closes_channel() {
        let scratch = TempDir::new().unwrap();
        let engine = engine(MockExecutor::new(), &scratch);

        let (res_tx, mut res_rx) = mpsc::channel(10);
        handle_running(engine, Vec::new(), res_tx).await.unwrap();

        assert!(res_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_batch() {
        let scratch = TempDir::new().unwrap();
        let mut executor = MockExecutor::new();
        executor.expect_run().returning(|_, _| {
            Ok(RunResult {
                exit: ProcessExit::Code(0),
                stdout: "ok".to_string(),
                stderr: String::new(),
                stdout_truncated: false,
                stderr_truncated: false,
                execution_time_ms: 1,
            })
        });
        let engine = engine(executor, &scratch);

        let requests = (0..3)
            .map(|_| ExecutionRequest::new(RunnableSource::inline("print(1)"), "task", limits()).unwrap())
            .collect();

        let (res_tx, res_rx) = mpsc::channel(1);
        drop(res_rx);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            handle_running(engine, requests, res_tx),
        )
        .await
        .expect("batch must stop once nobody listens")
        .unwrap();
    }
}
