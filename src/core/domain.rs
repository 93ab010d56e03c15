use std::{fmt, path::PathBuf, time::Duration};

use serde::Serialize;

use crate::constants::{
    MAX_CPU_TIME_SECS, MAX_MEMORY_BYTES, MAX_TIMEOUT_SECS, MIN_MEMORY_BYTES,
};

/// What the caller wants executed: an agent already on disk or its source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunnableSource {
    Path { location: PathBuf },
    InlineCode { text: String },
}

impl RunnableSource {
    pub fn path(location: impl Into<PathBuf>) -> Self {
        RunnableSource::Path {
            location: location.into(),
        }
    }

    pub fn inline(text: impl Into<String>) -> Self {
        RunnableSource::InlineCode { text: text.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    Anthropic,
    OpenAi,
    HuggingFace,
    HuggingChat,
}

impl Provider {
    /// Lookup order used when the request does not name a provider.
    pub const PRIORITY: [Provider; 4] = [
        Provider::Google,
        Provider::HuggingFace,
        Provider::Anthropic,
        Provider::OpenAi,
    ];

    pub const ALL: [Provider; 5] = [
        Provider::Google,
        Provider::Anthropic,
        Provider::OpenAi,
        Provider::HuggingFace,
        Provider::HuggingChat,
    ];

    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Google => "GOOGLE_GEMINI_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::HuggingFace | Provider::HuggingChat => "HUGGINGFACEHUB_API_TOKEN",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Google => "Google Gemini",
            Provider::Anthropic => "Anthropic Claude",
            Provider::OpenAi => "OpenAI",
            Provider::HuggingFace => "HuggingFace",
            Provider::HuggingChat => "HuggingChat",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time_ms: u64,
    pub cpu_time_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub stdout_size_bytes: Option<u64>,
    pub stderr_size_bytes: Option<u64>,
}

impl ExecutionLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }

    /// The ceilings enforced by the operating system inside the child.
    pub fn resources(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_time_secs: self.cpu_time_secs,
            memory_bytes: self.memory_bytes,
        }
    }

    /// Bounds a caller-supplied override must stay within.
    pub fn check_bounds(&self) -> Result<(), RequestError> {
        if self.time_ms == 0 {
            return Err(RequestError::ZeroTimeout);
        }
        if self.time_ms > MAX_TIMEOUT_SECS * 1000 {
            return Err(RequestError::TimeoutTooLarge {
                max_secs: MAX_TIMEOUT_SECS,
            });
        }
        if let Some(cpu) = self.cpu_time_secs {
            if cpu == 0 || cpu > MAX_CPU_TIME_SECS {
                return Err(RequestError::CpuTimeOutOfBounds {
                    max_secs: MAX_CPU_TIME_SECS,
                });
            }
        }
        if let Some(memory) = self.memory_bytes {
            if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&memory) {
                return Err(RequestError::MemoryOutOfBounds {
                    min: MIN_MEMORY_BYTES,
                    max: MAX_MEMORY_BYTES,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_time_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub source: RunnableSource,
    pub task: String,
    pub limits: ExecutionLimits,
    pub api_key: Option<String>,
    pub provider: Option<Provider>,
}

impl ExecutionRequest {
    pub fn new(
        source: RunnableSource,
        task: impl Into<String>,
        limits: ExecutionLimits,
    ) -> Result<Self, RequestError> {
        let task = task.into();
        if task.trim().is_empty() {
            return Err(RequestError::EmptyTask);
        }
        if limits.time_ms == 0 {
            return Err(RequestError::ZeroTimeout);
        }

        Ok(Self {
            source,
            task,
            limits,
            api_key: None,
            provider: None,
        })
    }

    pub fn with_api_key(self, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    pub fn with_provider(self, provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Either agent_code or agent_path must be provided")]
    MissingSource,
    #[error("Task must not be empty")]
    EmptyTask,
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Timeout must not exceed {max_secs} seconds")]
    TimeoutTooLarge { max_secs: u64 },
    #[error("CPU time limit must be between 1 and {max_secs} seconds")]
    CpuTimeOutOfBounds { max_secs: u64 },
    #[error("Memory limit must be between {min} and {max} bytes")]
    MemoryOutOfBounds { min: u64, max: u64 },
    #[error("Agent code too large ({size} characters, maximum {max})")]
    CodeTooLarge { size: usize, max: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    ApiKeyMissing,
    AgentNotFound,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ApiKeyMissing => "api_key_missing",
            ExecutionStatus::AgentNotFound => "agent_not_found",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one execution request.
///
/// Fields are private so the output/error invariants set by the
/// constructors cannot be broken afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionResult {
    status: ExecutionStatus,
    output: String,
    error: Option<String>,
    #[serde(rename = "execution_time")]
    execution_time_seconds: f64,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
            error: None,
            execution_time_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Builds a non-success result. A `Success` status here is downgraded
    /// to `Error`, since a success must not carry an error message.
    pub fn failure(status: ExecutionStatus, error: impl Into<String>, elapsed: Duration) -> Self {
        let status = match status {
            ExecutionStatus::Success => ExecutionStatus::Error,
            other => other,
        };

        Self {
            status,
            output: String::new(),
            error: Some(error.into()),
            execution_time_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn execution_time_seconds(&self) -> f64 {
        self.execution_time_seconds
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
