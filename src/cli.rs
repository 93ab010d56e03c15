//! Command line interface.
//!
//! `serve` exposes the engine over gRPC, `test` runs a single agent and
//! reports the result on the terminal.

use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    config::RunnerConfig,
    constants::{
        DEFAULT_ADDR, DEFAULT_CPU_TIME_SECS, DEFAULT_ERROR_SUMMARY_CHARS, DEFAULT_INTERPRETER,
        DEFAULT_MAX_CODE_SIZE, DEFAULT_MEMORY_BYTES, DEFAULT_OUTPUT_SIZE_BYTES,
        DEFAULT_SCRIPT_SUFFIX, DEFAULT_TIMEOUT_SECS,
    },
    core::{
        domain::{
            ExecutionRequest, ExecutionResult, ExecutionStatus, Provider, RequestError,
            RunnableSource,
        },
        engine::AgentEngine,
    },
};

/// Exit code for malformed invocations, same as clap's own usage errors.
pub const USAGE_EXIT_CODE: u8 = 2;

/// Runs generated LLM agent scripts in bounded subprocesses.
#[derive(Parser, Debug)]
#[command(name = "agentrunner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub runner: RunnerArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gRPC execution service.
    Serve(ServeArgs),

    /// Run one agent file and print its result.
    ///
    /// Exit code is 0 on success, 1 on error, 3 on timeout, 4 when no API
    /// key is configured and 5 when the agent file does not exist.
    Test(TestArgs),
}

/// Engine settings shared by every command.
#[derive(Args, Debug)]
pub struct RunnerArgs {
    /// Interpreter the agent scripts are run with.
    #[arg(long, global = true, env = "AGENTRUNNER_INTERPRETER", default_value = DEFAULT_INTERPRETER)]
    pub interpreter: PathBuf,

    /// File suffix given to materialized inline code.
    #[arg(long, global = true, env = "AGENTRUNNER_SCRIPT_SUFFIX", default_value = DEFAULT_SCRIPT_SUFFIX)]
    pub script_suffix: String,

    /// Directory for materialized inline code.
    #[arg(long, global = true, env = "AGENTRUNNER_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Largest accepted inline code, in characters.
    #[arg(long, global = true, env = "AGENTRUNNER_MAX_CODE_SIZE", default_value_t = DEFAULT_MAX_CODE_SIZE)]
    pub max_code_size: usize,

    /// Wall-clock timeout used when a request sets none, in seconds.
    #[arg(long, global = true, env = "AGENTRUNNER_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub default_timeout: u64,

    /// CPU time ceiling, in seconds.
    #[arg(long, global = true, env = "AGENTRUNNER_CPU_TIME", default_value_t = DEFAULT_CPU_TIME_SECS)]
    pub cpu_time: u64,

    /// Address space ceiling, in bytes.
    #[arg(long, global = true, env = "AGENTRUNNER_MEMORY", default_value_t = DEFAULT_MEMORY_BYTES)]
    pub memory: u64,

    /// Bytes captured from each of stdout and stderr.
    #[arg(long, global = true, env = "AGENTRUNNER_OUTPUT_SIZE", default_value_t = DEFAULT_OUTPUT_SIZE_BYTES)]
    pub output_size: u64,

    /// Characters of stderr kept in error messages.
    #[arg(long, global = true, env = "AGENTRUNNER_ERROR_SUMMARY", default_value_t = DEFAULT_ERROR_SUMMARY_CHARS)]
    pub error_summary: usize,
}

impl RunnerArgs {
    pub fn to_config(&self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            interpreter: self.interpreter.clone(),
            script_suffix: self.script_suffix.clone(),
            temp_dir: self.temp_dir.clone().unwrap_or(defaults.temp_dir),
            max_code_size: self.max_code_size,
            timeout_secs: self.default_timeout,
            cpu_time_secs: self.cpu_time,
            memory_bytes: self.memory,
            output_size_bytes: self.output_size,
            error_summary_chars: self.error_summary,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "AGENTRUNNER_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Path to the generated agent.
    pub agent: PathBuf,

    /// Task handed to the agent. Asked for interactively when omitted.
    #[arg(short, long)]
    pub task: Option<String>,

    /// Timeout for this run, in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// API key exported to the agent instead of the environment's.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Restrict credential lookup to one provider.
    #[arg(long, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ProviderArg {
    Google,
    Anthropic,
    Openai,
    Huggingface,
    Huggingchat,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Google => Provider::Google,
            ProviderArg::Anthropic => Provider::Anthropic,
            ProviderArg::Openai => Provider::OpenAi,
            ProviderArg::Huggingface => Provider::HuggingFace,
            ProviderArg::Huggingchat => Provider::HuggingChat,
        }
    }
}

pub fn exit_code(status: ExecutionStatus) -> u8 {
    match status {
        ExecutionStatus::Success => 0,
        ExecutionStatus::Error => 1,
        ExecutionStatus::Timeout => 3,
        ExecutionStatus::ApiKeyMissing => 4,
        ExecutionStatus::AgentNotFound => 5,
    }
}

#[tracing::instrument(skip(engine, config, args), fields(agent = %args.agent.display()))]
pub async fn run_test(
    engine: &AgentEngine,
    config: &RunnerConfig,
    args: TestArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let task = match &args.task {
        Some(task) => task.clone(),
        None => prompt_task().await?,
    };

    let request = match build_request(config, &args, task) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("error: {}", err);
            return Ok(ExitCode::from(USAGE_EXIT_CODE));
        }
    };

    let result = engine.execute(request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_human(&result);
    }

    Ok(ExitCode::from(exit_code(result.status())))
}

/// The agent argument is always a path; a missing file is reported as
/// `agent_not_found`, never run as code.
fn build_request(
    config: &RunnerConfig,
    args: &TestArgs,
    task: String,
) -> Result<ExecutionRequest, RequestError> {
    let limits = config.limits_with(args.timeout, None, None);
    limits.check_bounds()?;

    let mut request = ExecutionRequest::new(RunnableSource::path(&args.agent), task, limits)?;
    if let Some(api_key) = &args.api_key {
        request = request.with_api_key(api_key.clone());
    }
    if let Some(provider) = args.provider {
        request = request.with_provider(provider.into());
    }
    Ok(request)
}

async fn prompt_task() -> std::io::Result<String> {
    eprint!("Enter task for the agent: ");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

fn print_human(result: &ExecutionResult) {
    eprintln!(
        "Status: {} ({:.2}s)",
        result.status(),
        result.execution_time_seconds()
    );
    if result.is_success() {
        println!("{}", result.output());
    } else if let Some(error) = result.error() {
        eprintln!("{}", error);
    }
}
