use std::path::PathBuf;

use crate::{
    constants::{
        DEFAULT_CPU_TIME_SECS, DEFAULT_ERROR_SUMMARY_CHARS, DEFAULT_INTERPRETER,
        DEFAULT_MAX_CODE_SIZE, DEFAULT_MEMORY_BYTES, DEFAULT_OUTPUT_SIZE_BYTES,
        DEFAULT_SCRIPT_SUFFIX, DEFAULT_TIMEOUT_SECS,
    },
    core::domain::ExecutionLimits,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    pub interpreter: PathBuf,
    pub script_suffix: String,
    pub temp_dir: PathBuf,
    pub max_code_size: usize,
    pub timeout_secs: u64,
    pub cpu_time_secs: u64,
    pub memory_bytes: u64,
    pub output_size_bytes: u64,
    pub error_summary_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.into(),
            script_suffix: DEFAULT_SCRIPT_SUFFIX.to_string(),
            temp_dir: std::env::temp_dir().join("agentrunner"),
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cpu_time_secs: DEFAULT_CPU_TIME_SECS,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            output_size_bytes: DEFAULT_OUTPUT_SIZE_BYTES,
            error_summary_chars: DEFAULT_ERROR_SUMMARY_CHARS,
        }
    }
}

impl RunnerConfig {
    /// Limits applied when a request does not override them.
    pub fn default_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_ms: self.timeout_secs * 1000,
            cpu_time_secs: Some(self.cpu_time_secs),
            memory_bytes: Some(self.memory_bytes),
            stdout_size_bytes: Some(self.output_size_bytes),
            stderr_size_bytes: Some(self.output_size_bytes),
        }
    }

    pub fn limits_with(
        &self,
        timeout_secs: Option<f64>,
        cpu_time_secs: Option<u64>,
        memory_bytes: Option<u64>,
    ) -> ExecutionLimits {
        let defaults = self.default_limits();
        ExecutionLimits {
            time_ms: timeout_secs
                .map(|secs| (secs.max(0.0) * 1000.0).round() as u64)
                .unwrap_or(defaults.time_ms),
            cpu_time_secs: cpu_time_secs.or(defaults.cpu_time_secs),
            memory_bytes: memory_bytes.or(defaults.memory_bytes),
            ..defaults
        }
    }
}
