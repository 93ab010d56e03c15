use std::sync::Arc;

use tokio::sync::mpsc::channel;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::{
    config::RunnerConfig,
    constants::STREAM_TX_ERR,
    core::{
        engine::AgentEngine,
        pipeline::running::{BatchItem, handle_running},
    },
    grpc::{
        mappers::{to_execution_request, to_execution_requests},
        models::{
            BatchItemResult, ExecuteBatchRequest, ExecuteRequest,
            ExecutionResult as GrpcExecutionResult, agent_runner_service_server::AgentRunnerService,
        },
    },
};

#[derive(Clone, Debug)]
pub struct AgentRunnerServiceImpl {
    engine: Arc<AgentEngine>,
    config: Arc<RunnerConfig>,
}

impl AgentRunnerServiceImpl {
    pub fn new(engine: Arc<AgentEngine>, config: Arc<RunnerConfig>) -> Self {
        Self { engine, config }
    }
}

#[tonic::async_trait]
impl AgentRunnerService for AgentRunnerServiceImpl {
    type ExecuteBatchStream = ReceiverStream<Result<BatchItemResult, Status>>;

    #[tracing::instrument(skip(self, request))]
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<GrpcExecutionResult>, Status> {
        let request = to_execution_request(request.into_inner(), &self.config)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        tracing::debug!("Received request for task: {}", request.task);

        let result = self.engine.execute(request).await;
        Ok(Response::new(result.into()))
    }

    #[tracing::instrument(skip(self, request))]
    async fn execute_batch(
        &self,
        request: Request<ExecuteBatchRequest>,
    ) -> Result<Response<Self::ExecuteBatchStream>, Status> {
        let requests = to_execution_requests(request.into_inner(), &self.config)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        tracing::info!("Received batch of {} requests", requests.len());

        let (stream_tx, stream_rx) = channel::<Result<BatchItemResult, Status>>(128);
        let (res_tx, mut res_rx) = channel::<BatchItem>(128);

        handle_running(self.engine.clone(), requests, res_tx);

        tokio::spawn(async move {
            while let Some(item) = res_rx.recv().await {
                tracing::debug!("Send batch item {}", item.index);
                if stream_tx.send(Ok(item.into())).await.is_err() {
                    tracing::warn!("{}", STREAM_TX_ERR);
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(stream_rx)))
    }
}
