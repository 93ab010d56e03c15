use std::path::PathBuf;

use crate::core::{credentials::Credential, domain::ExecutionLimits};

/// Everything the child process is started with.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub script: PathBuf,
    pub task: String,
    pub credential: Credential,
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        invocation: &Invocation,
        limits: &ExecutionLimits,
    ) -> Result<RunResult, RunError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(i32),
}

impl ProcessExit {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitType {
    WallTime,
    CpuTime,
    Memory,
}

#[derive(Debug, Clone)]
pub enum RunError {
    LimitsExceeded {
        result: RunResult,
        limit_type: LimitType,
    },
    FailedToLaunch {
        msg: String,
    },
    Internal {
        msg: String,
    },
}
