use std::{
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
    time::{Duration, Instant, timeout},
};

use crate::{
    constants::{PIPE_DRAIN_GRACE_MS, TASK_ARG},
    core::{
        domain::ExecutionLimits,
        traits::{
            executor::{Executor, Invocation, LimitType, ProcessExit, RunError, RunResult},
            limiter::ResourceLimiter,
        },
    },
};

const OOM_MARKERS: [&str; 3] = ["MemoryError", "Cannot allocate memory", "out of memory"];

#[derive(Clone, Debug)]
pub struct NativeExecutor {
    interpreter: PathBuf,
    limiter: Arc<dyn ResourceLimiter>,
}

impl NativeExecutor {
    pub fn new<T>(interpreter: T, limiter: Arc<dyn ResourceLimiter>) -> Self
    where
        T: AsRef<Path>,
    {
        NativeExecutor {
            interpreter: interpreter.as_ref().into(),
            limiter,
        }
    }

    fn command(&self, invocation: &Invocation, limits: &ExecutionLimits) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&invocation.script)
            .arg(TASK_ARG)
            .arg(&invocation.task)
            .env(&invocation.credential.env_var, &invocation.credential.value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let limiter = self.limiter.clone();
        let resources = limits.resources();
        // SAFETY: the hook only calls getrlimit/setrlimit through the
        // limiter, both async-signal-safe, and touches no shared state.
        unsafe {
            cmd.pre_exec(move || limiter.apply(&resources));
        }

        cmd
    }
}

#[async_trait::async_trait]
impl Executor for NativeExecutor {
    #[tracing::instrument(skip(self, invocation), fields(script = %invocation.script.display()))]
    async fn run(
        &self,
        invocation: &Invocation,
        limits: &ExecutionLimits,
    ) -> Result<RunResult, RunError> {
        let start_time = Instant::now();

        let mut child = self
            .command(invocation, limits)
            .spawn()
            .map_err(|e| RunError::FailedToLaunch {
                msg: format!("{}: {}", self.interpreter.display(), e),
            })?;

        let mut group = ProcessGroup::new(child.id());
        tracing::debug!("Spawned agent process group {:?}", group.pgid);

        let stdout_capture = spawn_capture(child.stdout.take(), limits.stdout_size_bytes);
        let stderr_capture = spawn_capture(child.stderr.take(), limits.stderr_size_bytes);

        let (status, timed_out) = match timeout(limits.timeout(), child.wait()).await {
            Ok(Ok(status)) => (status, false),
            Ok(Err(e)) => {
                group.kill();
                group.disarm();
                return Err(RunError::Internal {
                    msg: format!("Failed to wait for process: {}", e),
                });
            }
            Err(_) => {
                tracing::warn!(
                    "Deadline of {:?} elapsed, killing process group",
                    limits.timeout()
                );
                group.kill();
                let status = child.wait().await.map_err(|e| RunError::Internal {
                    msg: format!("Failed to reap killed process: {}", e),
                })?;
                (status, true)
            }
        };

        // Whatever the agent left running in its group goes too, so the
        // pipes close and nothing outlives the request. Once the group is
        // empty its id may be reused, so it is never signalled again.
        group.kill();
        group.disarm();
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        let stdout = collect_capture(stdout_capture).await;
        let stderr = collect_capture(stderr_capture).await;

        let result = RunResult {
            exit: exit_of(status),
            stdout: stdout.text,
            stderr: stderr.text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            execution_time_ms,
        };
        tracing::debug!("Agent finished: {:?} in {} ms", result.exit, execution_time_ms);

        if timed_out {
            return Err(RunError::LimitsExceeded {
                result,
                limit_type: LimitType::WallTime,
            });
        }

        if let Some(limit_type) = violated_ceiling(&result, limits) {
            return Err(RunError::LimitsExceeded { result, limit_type });
        }

        Ok(result)
    }
}

fn violated_ceiling(result: &RunResult, limits: &ExecutionLimits) -> Option<LimitType> {
    if result.exit == ProcessExit::Signal(Signal::SIGXCPU as i32) {
        return Some(LimitType::CpuTime);
    }

    if limits.memory_bytes.is_some()
        && !result.exit.is_success()
        && OOM_MARKERS.iter().any(|marker| result.stderr.contains(marker))
    {
        return Some(LimitType::Memory);
    }

    None
}

fn exit_of(status: ExitStatus) -> ProcessExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessExit::Code(code),
        (None, Some(signal)) => ProcessExit::Signal(signal),
        (None, None) => ProcessExit::Code(-1),
    }
}

/// The child leads its own process group, so one `killpg` reaches every
/// descendant that did not start a new session.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|pid| Pid::from_raw(pid as i32)),
        }
    }

    fn kill(&self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        // Only still armed when the run future was dropped mid-wait.
        self.kill();
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

fn spawn_capture<R>(pipe: Option<R>, limit: Option<u64>) -> JoinHandle<std::io::Result<Captured>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return Ok(Captured::default());
        };

        let mut buf = Vec::new();
        (&mut pipe)
            .take(limit.unwrap_or(u64::MAX))
            .read_to_end(&mut buf)
            .await?;

        // Keep draining so the child never blocks on a full pipe.
        let discarded = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;

        Ok(Captured {
            text: String::from_utf8_lossy(&buf).into_owned(),
            truncated: discarded > 0,
        })
    })
}

async fn collect_capture(handle: JoinHandle<std::io::Result<Captured>>) -> Captured {
    let abort_handle = handle.abort_handle();

    match timeout(Duration::from_millis(PIPE_DRAIN_GRACE_MS), handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            tracing::warn!("Failed to read agent output: {}", e);
            Captured::default()
        }
        Ok(Err(e)) => {
            tracing::error!("Output capture task failed: {}", e);
            Captured::default()
        }
        Err(_) => {
            abort_handle.abort();
            tracing::warn!("Agent output pipe still open after the process exited");
            Captured {
                text: String::new(),
                truncated: true,
            }
        }
    }
}
