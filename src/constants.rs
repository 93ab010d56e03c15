pub const BATCH_TX_ERR: &str = "Failed to send batch item result";
pub const STREAM_TX_ERR: &str = "Failed to send result to stream";

pub const DEFAULT_ADDR: &str = "[::1]:50051";

pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_SCRIPT_SUFFIX: &str = ".py";
pub const TEMP_FILE_PREFIX: &str = "agent_";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CPU_TIME_SECS: u64 = 30;
pub const DEFAULT_MEMORY_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_MAX_CODE_SIZE: usize = 100_000;
pub const DEFAULT_OUTPUT_SIZE_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_ERROR_SUMMARY_CHARS: usize = 4_000;

/// Extra CPU seconds between the soft limit (SIGXCPU) and the hard one (SIGKILL).
pub const CPU_HARD_LIMIT_GRACE_SECS: u64 = 5;

pub const MAX_TIMEOUT_SECS: u64 = 600;
pub const MAX_CPU_TIME_SECS: u64 = 600;
pub const MIN_MEMORY_BYTES: u64 = 16 * 1024 * 1024;
pub const MAX_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// How long captured pipes may stay open after the child has been reaped.
pub const PIPE_DRAIN_GRACE_MS: u64 = 1_000;

pub const TASK_ARG: &str = "--task";
pub const TRACEBACK_MARKER: &str = "Traceback (most recent call last)";
pub const RESPONSE_HEADER: &str = "Response:";
