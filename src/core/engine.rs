use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures::FutureExt;
use uuid::Uuid;

use crate::{
    config::RunnerConfig,
    core::{
        credentials::CredentialStore,
        domain::{ExecutionRequest, ExecutionResult, RequestError},
        reporter::{RawOutcome, ResultReporter},
        source::SourceResolver,
        traits::executor::{Executor, Invocation},
    },
};

/// Runs one agent request from source resolution to a terminal result.
///
/// `execute` never fails; every problem ends up as a status in the result.
#[derive(Debug)]
pub struct AgentEngine {
    executor: Arc<dyn Executor>,
    resolver: SourceResolver,
    reporter: ResultReporter,
    credentials: CredentialStore,
}

impl AgentEngine {
    pub fn new(
        executor: Arc<dyn Executor>,
        resolver: SourceResolver,
        reporter: ResultReporter,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            executor,
            resolver,
            reporter,
            credentials,
        }
    }

    pub fn from_config(
        config: &RunnerConfig,
        executor: Arc<dyn Executor>,
        credentials: CredentialStore,
    ) -> Self {
        Self::new(
            executor,
            SourceResolver::new(&config.temp_dir, &config.script_suffix, config.max_code_size),
            ResultReporter::new(config.error_summary_chars),
            credentials,
        )
    }

    #[tracing::instrument(skip(self, request), fields(request_id = %Uuid::new_v4()))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let start_time = Instant::now();
        let outcome = self.drive(&request).await;
        let result = self
            .reporter
            .report(outcome, &request.limits, start_time.elapsed());

        tracing::info!(
            status = %result.status(),
            execution_time = result.execution_time_seconds(),
            "Execution finished"
        );
        result
    }

    async fn drive(&self, request: &ExecutionRequest) -> RawOutcome {
        if let Err(err) = validate(request) {
            return RawOutcome::Rejected(err);
        }

        let Some(credential) = self
            .credentials
            .resolve(request.api_key.as_deref(), request.provider)
        else {
            tracing::debug!("No credential for provider {:?}", request.provider);
            return RawOutcome::CredentialMissing {
                message: self.credentials.missing_message(request.provider),
            };
        };

        let resolved = match self.resolver.resolve(&request.source) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::debug!("Source resolution failed: {}", err);
                return RawOutcome::ResolutionFailed(err);
            }
        };
        tracing::debug!(
            temporary = resolved.is_temporary(),
            "Running agent script {}",
            resolved.path().display()
        );

        let invocation = Invocation {
            script: resolved.path().to_path_buf(),
            task: request.task.clone(),
            credential,
        };

        let run = AssertUnwindSafe(self.executor.run(&invocation, &request.limits))
            .catch_unwind()
            .await;

        // The temporary script must outlive the child.
        drop(resolved);

        match run {
            Ok(result) => RawOutcome::Executed(result),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "executor panicked".to_string());
                tracing::error!("Executor panicked: {}", msg);
                RawOutcome::Faulted { msg }
            }
        }
    }
}

fn validate(request: &ExecutionRequest) -> Result<(), RequestError> {
    if request.task.trim().is_empty() {
        return Err(RequestError::EmptyTask);
    }
    if request.limits.time_ms == 0 {
        return Err(RequestError::ZeroTimeout);
    }
    Ok(())
}
