use std::time::Duration;

use nix::sys::signal::Signal;

use crate::{
    constants::{RESPONSE_HEADER, TRACEBACK_MARKER},
    core::{
        domain::{ExecutionLimits, ExecutionResult, ExecutionStatus, RequestError},
        source::ResolveError,
        traits::executor::{LimitType, ProcessExit, RunError, RunResult},
    },
};

/// Everything that can happen to a request before it becomes a result.
#[derive(Debug)]
pub enum RawOutcome {
    Rejected(RequestError),
    CredentialMissing { message: String },
    ResolutionFailed(ResolveError),
    Executed(Result<RunResult, RunError>),
    Faulted { msg: String },
}

#[derive(Clone, Debug)]
pub struct ResultReporter {
    error_summary_chars: usize,
}

impl ResultReporter {
    pub fn new(error_summary_chars: usize) -> Self {
        Self {
            error_summary_chars,
        }
    }

    pub fn report(
        &self,
        outcome: RawOutcome,
        limits: &ExecutionLimits,
        elapsed: Duration,
    ) -> ExecutionResult {
        match outcome {
            RawOutcome::Rejected(err) => {
                ExecutionResult::failure(ExecutionStatus::Error, err.to_string(), elapsed)
            }
            RawOutcome::CredentialMissing { message } => {
                ExecutionResult::failure(ExecutionStatus::ApiKeyMissing, message, elapsed)
            }
            RawOutcome::ResolutionFailed(err) => {
                let status = match err {
                    ResolveError::TooLarge { .. } => ExecutionStatus::Error,
                    _ => ExecutionStatus::AgentNotFound,
                };
                ExecutionResult::failure(status, err.to_string(), elapsed)
            }
            RawOutcome::Executed(Err(err)) => self.report_run_error(err, limits, elapsed),
            RawOutcome::Executed(Ok(result)) => self.report_completed(result, elapsed),
            RawOutcome::Faulted { msg } => ExecutionResult::failure(
                ExecutionStatus::Error,
                format!("Internal error while supervising agent: {}", msg),
                elapsed,
            ),
        }
    }

    fn report_run_error(
        &self,
        err: RunError,
        limits: &ExecutionLimits,
        elapsed: Duration,
    ) -> ExecutionResult {
        match err {
            RunError::LimitsExceeded {
                limit_type: LimitType::WallTime,
                ..
            } => ExecutionResult::failure(
                ExecutionStatus::Timeout,
                format!(
                    "Execution timed out after {} seconds",
                    format_seconds(limits.time_ms)
                ),
                elapsed,
            ),
            RunError::LimitsExceeded {
                limit_type: LimitType::CpuTime,
                result,
            } => {
                let headline = match limits.cpu_time_secs {
                    Some(secs) => format!("CPU time limit of {} seconds exceeded", secs),
                    None => "CPU time limit exceeded".to_string(),
                };
                self.error_with_stderr(headline, &result, elapsed)
            }
            RunError::LimitsExceeded {
                limit_type: LimitType::Memory,
                result,
            } => {
                let headline = match limits.memory_bytes {
                    Some(bytes) => format!("Memory limit of {} MB exceeded", bytes / 1024 / 1024),
                    None => "Memory limit exceeded".to_string(),
                };
                self.error_with_stderr(headline, &result, elapsed)
            }
            RunError::FailedToLaunch { msg } => ExecutionResult::failure(
                ExecutionStatus::Error,
                format!("Failed to start agent: {}", msg),
                elapsed,
            ),
            RunError::Internal { msg } => ExecutionResult::failure(
                ExecutionStatus::Error,
                format!("Internal error while supervising agent: {}", msg),
                elapsed,
            ),
        }
    }

    fn report_completed(&self, result: RunResult, elapsed: Duration) -> ExecutionResult {
        match result.exit {
            ProcessExit::Code(0) if !result.stderr.contains(TRACEBACK_MARKER) => {
                if !result.stderr.trim().is_empty() {
                    tracing::debug!("Agent succeeded with stderr output: {}", result.stderr);
                }
                ExecutionResult::success(extract_response(&result.stdout), elapsed)
            }
            ProcessExit::Code(0) => ExecutionResult::failure(
                ExecutionStatus::Error,
                self.summarize(&result.stderr, result.stderr_truncated),
                elapsed,
            ),
            ProcessExit::Code(code) => {
                let headline = format!("Agent exited with code {}", code);
                self.error_with_stderr(headline, &result, elapsed)
            }
            ProcessExit::Signal(signal) => {
                let headline = format!("Agent terminated by signal {}", signal_name(signal));
                self.error_with_stderr(headline, &result, elapsed)
            }
        }
    }

    /// Prefers captured stderr; falls back to the headline plus any stdout,
    /// since many agents print their failures there.
    fn error_with_stderr(
        &self,
        headline: String,
        result: &RunResult,
        elapsed: Duration,
    ) -> ExecutionResult {
        let detail = if !result.stderr.trim().is_empty() {
            self.summarize(&result.stderr, result.stderr_truncated)
        } else if !result.stdout.trim().is_empty() {
            self.summarize(&result.stdout, result.stdout_truncated)
        } else {
            String::new()
        };

        let error = if detail.is_empty() {
            headline
        } else {
            format!("{}\n{}", headline, detail)
        };
        ExecutionResult::failure(ExecutionStatus::Error, error, elapsed)
    }

    /// Keeps the tail of oversized text, where tracebacks put the exception.
    fn summarize(&self, text: &str, capture_truncated: bool) -> String {
        let text = text.trim();
        let total = text.chars().count();

        if total <= self.error_summary_chars && !capture_truncated {
            return text.to_string();
        }

        let skip = total.saturating_sub(self.error_summary_chars);
        let tail: String = text.chars().skip(skip).collect();
        format!("... [output truncated]\n{}", tail)
    }
}

/// Returns the framed answer when the agent prints
/// `Response:` followed by a block between two dashed rules.
pub fn extract_response(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();

    let framed = lines
        .iter()
        .position(|line| line.trim() == RESPONSE_HEADER)
        .and_then(|header| {
            let open = header + 1;
            if !lines.get(open).is_some_and(|line| is_rule(line)) {
                return None;
            }
            let close = lines[open + 1..].iter().position(|line| is_rule(line))?;
            Some(lines[open + 1..open + 1 + close].join("\n"))
        });

    match framed {
        Some(body) => body.trim().to_string(),
        None => stdout.trim().to_string(),
    }
}

fn is_rule(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(sig) => format!("{} ({})", sig.as_str(), signal),
        Err(_) => signal.to_string(),
    }
}

fn format_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.1}", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn limits() -> ExecutionLimits {
        ExecutionLimits {
            time_ms: 60_000,
            cpu_time_secs: Some(30),
            memory_bytes: Some(512 * 1024 * 1024),
            stdout_size_bytes: None,
            stderr_size_bytes: None,
        }
    }

    fn run_result(exit: ProcessExit, stdout: &str, stderr: &str) -> RunResult {
        RunResult {
            exit,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            stdout_truncated: false,
            stderr_truncated: false,
            execution_time_ms: 10,
        }
    }

    fn report(outcome: RawOutcome) -> ExecutionResult {
        ResultReporter::new(200).report(outcome, &limits(), Duration::from_millis(20))
    }

    #[test]
    fn test_success_output() {
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(0),
            "OK-12345\n",
            "",
        ))));

        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.output(), "OK-12345");
        assert_eq!(result.error(), None);
        assert!(result.execution_time_seconds() >= 0.0);
    }

    #[test]
    fn test_success_with_warnings_on_stderr() {
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(0),
            "done",
            "DeprecationWarning: something",
        ))));
        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.output(), "done");
    }

    #[test]
    fn test_traceback_with_zero_exit_is_error() {
        let stderr = "Traceback (most recent call last):\n  File \"a.py\", line 1\nValueError: bad";
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(0),
            "partial",
            stderr,
        ))));

        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.output(), "");
        assert!(result.error().unwrap().contains("ValueError: bad"));
    }

    #[test]
    fn test_non_zero_exit() {
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(3),
            "",
            "",
        ))));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.error(), Some("Agent exited with code 3"));

        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(1),
            "",
            "RuntimeError: boom\n",
        ))));
        assert_eq!(
            result.error(),
            Some("Agent exited with code 1\nRuntimeError: boom")
        );

        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(1),
            "Error running agent: no network",
            "",
        ))));
        assert!(result.error().unwrap().contains("no network"));
    }

    #[test]
    fn test_signal_death() {
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Signal(9),
            "",
            "",
        ))));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(
            result.error(),
            Some("Agent terminated by signal SIGKILL (9)")
        );
    }

    #[test]
    fn test_timeout_mentions_configured_value() {
        let result = report(RawOutcome::Executed(Err(RunError::LimitsExceeded {
            result: run_result(ProcessExit::Signal(9), "", ""),
            limit_type: LimitType::WallTime,
        })));
        assert_eq!(result.status(), ExecutionStatus::Timeout);
        assert_eq!(result.error(), Some("Execution timed out after 60 seconds"));

        let reporter = ResultReporter::new(200);
        let short = ExecutionLimits {
            time_ms: 1500,
            ..limits()
        };
        let result = reporter.report(
            RawOutcome::Executed(Err(RunError::LimitsExceeded {
                result: run_result(ProcessExit::Signal(9), "", ""),
                limit_type: LimitType::WallTime,
            })),
            &short,
            Duration::from_millis(1500),
        );
        assert_eq!(result.error(), Some("Execution timed out after 1.5 seconds"));
    }

    #[test]
    fn test_resource_ceilings_are_errors() {
        let result = report(RawOutcome::Executed(Err(RunError::LimitsExceeded {
            result: run_result(ProcessExit::Signal(24), "", ""),
            limit_type: LimitType::CpuTime,
        })));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.error(), Some("CPU time limit of 30 seconds exceeded"));

        let result = report(RawOutcome::Executed(Err(RunError::LimitsExceeded {
            result: run_result(ProcessExit::Code(1), "", "MemoryError"),
            limit_type: LimitType::Memory,
        })));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(
            result.error(),
            Some("Memory limit of 512 MB exceeded\nMemoryError")
        );
    }

    #[test]
    fn test_preflight_and_resolution_failures() {
        let result = report(RawOutcome::CredentialMissing {
            message: "API key not found".to_string(),
        });
        assert_eq!(result.status(), ExecutionStatus::ApiKeyMissing);
        assert_eq!(result.output(), "");

        let result = report(RawOutcome::ResolutionFailed(ResolveError::NotFound {
            path: PathBuf::from("/missing/agent.py"),
        }));
        assert_eq!(result.status(), ExecutionStatus::AgentNotFound);
        assert!(result.error().unwrap().contains("/missing/agent.py"));

        let result = report(RawOutcome::ResolutionFailed(ResolveError::Materialize {
            msg: "disk full".to_string(),
        }));
        assert_eq!(result.status(), ExecutionStatus::AgentNotFound);

        let result = report(RawOutcome::ResolutionFailed(ResolveError::TooLarge {
            size: 200_000,
            max: 100_000,
        }));
        assert_eq!(result.status(), ExecutionStatus::Error);

        let result = report(RawOutcome::Rejected(RequestError::EmptyTask));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(result.error(), Some("Task must not be empty"));
    }

    #[test]
    fn test_launch_and_internal_failures() {
        let result = report(RawOutcome::Executed(Err(RunError::FailedToLaunch {
            msg: "No such file or directory".to_string(),
        })));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert!(result.error().unwrap().starts_with("Failed to start agent"));

        let result = report(RawOutcome::Faulted {
            msg: "executor panicked".to_string(),
        });
        assert_eq!(result.status(), ExecutionStatus::Error);
    }

    #[test]
    fn test_oversized_stderr_keeps_tail() {
        let stderr = format!("{}\nKeyError: 'missing'", "x".repeat(1000));
        let result = report(RawOutcome::Executed(Ok(run_result(
            ProcessExit::Code(1),
            "",
            &stderr,
        ))));

        let error = result.error().unwrap();
        assert!(error.contains("[output truncated]"));
        assert!(error.ends_with("KeyError: 'missing'"));
        assert!(error.chars().count() < 300);
    }

    #[test]
    fn test_extract_framed_response() {
        let stdout = format!(
            "Running DemoAgent with task: hi\n\nResponse:\n{rule}\nline one\nline two\n{rule}\n",
            rule = "-".repeat(50)
        );
        assert_eq!(extract_response(&stdout), "line one\nline two");
    }

    #[test]
    fn test_extract_unframed_response() {
        assert_eq!(extract_response("  plain answer \n"), "plain answer");
        // Header without a closing rule is left untouched.
        let stdout = "Response:\n-----\nno closing rule";
        assert_eq!(extract_response(stdout), stdout);
    }
}
