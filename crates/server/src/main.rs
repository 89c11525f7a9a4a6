use std::{io, process::ExitCode};

use clap::Parser;
use gpu_forecast_server::{
    config::{Cli, Command, ServeOpts},
    forecast::SaxForecaster,
    handlers::router,
    orchestrator::Orchestrator,
    runner::{IsolatedExecutor, serve_compute},
    scheduler::Gate,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout belongs to the compute protocol, so logs always go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Some(Command::Compute) => compute(),
        None => serve(cli.serve).await,
    }
}

fn compute() -> ExitCode {
    match serve_compute(&SaxForecaster, io::stdin().lock(), io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("compute process failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(opts: ServeOpts) -> ExitCode {
    let isolation = match opts.isolation() {
        Ok(isolation) => isolation,
        Err(e) => {
            error!("failed to locate own binary for process isolation: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let policy = opts.wait_policy();
    let orchestrator = Orchestrator::new(Gate::new(), IsolatedExecutor::new(isolation), policy)
        .with_max_concurrent_calls(opts.max_concurrent_calls as usize);

    let listener = match tokio::net::TcpListener::bind(&opts.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", opts.bind, e);
            return ExitCode::FAILURE;
        }
    };
    let app = router(orchestrator);

    info!(
        isolation = ?opts.isolation,
        max_wait = ?policy.max_wait,
        max_concurrent_calls = opts.max_concurrent_calls,
        "forecast server listening on {}",
        opts.bind
    );

    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl_c: {}", e);
        }
    });

    if let Err(e) = graceful.await {
        error!("server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
