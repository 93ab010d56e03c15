use std::panic;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::core::credentials::CredentialStore;
use crate::core::engine::AgentEngine;
use crate::grpc::models::agent_runner_service_server::AgentRunnerServiceServer;
use crate::grpc::services::AgentRunnerServiceImpl;
use crate::native::{executor::NativeExecutor, limiter::RlimitLimiter};

mod cli;
mod config;
mod constants;
mod core;
mod grpc;
mod native;


#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let config = cli.runner.to_config();
    let credentials = CredentialStore::from_env();
    tracing::debug!("Loaded config: {:?}, credentials: {:?}", config, credentials);

    let executor = Arc::new(NativeExecutor::new(
        &config.interpreter,
        Arc::new(RlimitLimiter),
    ));
    let engine = Arc::new(AgentEngine::from_config(&config, executor, credentials));

    match cli.command {
        Command::Serve(args) => {
            let service = AgentRunnerServiceServer::new(AgentRunnerServiceImpl::new(
                engine,
                Arc::new(config),
            ));

            tracing::info!("gRPC server listening on {}", args.addr);
            Server::builder().add_service(service).serve(args.addr).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Test(args) => cli::run_test(&engine, &config, args).await,
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
