use crate::config::RunnerConfig;
use crate::core::{domain, pipeline::running::BatchItem};
use crate::grpc::models::{self, chrono_to_prost};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error(transparent)]
    InvalidRequest(#[from] domain::RequestError),
    #[error("Unknown provider: {value}")]
    UnknownProvider { value: i32 },
    #[error("Request {index}: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<ConversionError>,
    },
}

/// Builds a domain request, filling unset limits from the configuration.
///
/// Inline code wins when both a path and code are given.
pub fn to_execution_request(
    req: models::ExecuteRequest,
    config: &RunnerConfig,
) -> Result<domain::ExecutionRequest, ConversionError> {
    let provider = provider_from_proto(req.provider)?;

    let source = match (req.agent_code, req.agent_path) {
        (Some(code), _) if !code.is_empty() => {
            let size = code.chars().count();
            if size > config.max_code_size {
                return Err(domain::RequestError::CodeTooLarge {
                    size,
                    max: config.max_code_size,
                }
                .into());
            }
            domain::RunnableSource::inline(code)
        }
        (_, Some(path)) if !path.is_empty() => domain::RunnableSource::path(path),
        _ => return Err(domain::RequestError::MissingSource.into()),
    };

    let limits = config.limits_with(
        req.timeout_seconds.map(|secs| secs as f64),
        req.cpu_time_seconds,
        req.memory_limit_bytes,
    );
    limits.check_bounds()?;

    let mut request = domain::ExecutionRequest::new(source, req.task, limits)?;
    if let Some(api_key) = req.api_key.filter(|key| !key.trim().is_empty()) {
        request = request.with_api_key(api_key);
    }
    if let Some(provider) = provider {
        request = request.with_provider(provider);
    }

    Ok(request)
}

pub fn to_execution_requests(
    batch: models::ExecuteBatchRequest,
    config: &RunnerConfig,
) -> Result<Vec<domain::ExecutionRequest>, ConversionError> {
    batch
        .requests
        .into_iter()
        .enumerate()
        .map(|(index, req)| {
            to_execution_request(req, config).map_err(|e| ConversionError::InBatch {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

fn provider_from_proto(value: i32) -> Result<Option<domain::Provider>, ConversionError> {
    let provider = models::Provider::try_from(value)
        .map_err(|_| ConversionError::UnknownProvider { value })?;

    Ok(match provider {
        models::Provider::Unspecified => None,
        models::Provider::Google => Some(domain::Provider::Google),
        models::Provider::Anthropic => Some(domain::Provider::Anthropic),
        models::Provider::Openai => Some(domain::Provider::OpenAi),
        models::Provider::Huggingface => Some(domain::Provider::HuggingFace),
        models::Provider::Huggingchat => Some(domain::Provider::HuggingChat),
    })
}

impl From<domain::ExecutionStatus> for models::ExecutionStatus {
    fn from(status: domain::ExecutionStatus) -> Self {
        match status {
            domain::ExecutionStatus::Success => models::ExecutionStatus::Success,
            domain::ExecutionStatus::Error => models::ExecutionStatus::Error,
            domain::ExecutionStatus::Timeout => models::ExecutionStatus::Timeout,
            domain::ExecutionStatus::ApiKeyMissing => models::ExecutionStatus::ApiKeyMissing,
            domain::ExecutionStatus::AgentNotFound => models::ExecutionStatus::AgentNotFound,
        }
    }
}

impl From<domain::ExecutionResult> for models::ExecutionResult {
    fn from(result: domain::ExecutionResult) -> Self {
        Self {
            status: models::ExecutionStatus::from(result.status()).into(),
            output: result.output().to_string(),
            error: result.error().map(str::to_string),
            execution_time: result.execution_time_seconds(),
            finished_at: Some(chrono_to_prost(chrono::Utc::now())),
        }
    }
}

impl From<BatchItem> for models::BatchItemResult {
    fn from(item: BatchItem) -> Self {
        Self {
            index: item.index as u32,
            result: Some(item.result.into()),
        }
    }
}
