use std::{
    any::Any,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Instant,
};

use gpu_forecast_proto::{ComputeOutcome, ForecastRequest, ForecastResponse};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    sync::oneshot,
    task::JoinError,
};
use tracing::{debug, error, warn};

use crate::{errors::ServiceError, forecast::Forecaster, scheduler::TicketGuard};

/// Where the computation runs.
#[derive(Clone)]
pub enum Isolation {
    /// A blocking thread; a panic is caught at the join and reported as no result.
    Thread(Arc<dyn Forecaster>),
    /// A child process that reads one request on stdin and writes one
    /// `ComputeOutcome` line on stdout. Killed and reaped if the call is dropped.
    Process { program: PathBuf, args: Vec<String> },
}

/// Runs forecasts so that a crash inside one cannot take the service down.
#[derive(Clone)]
pub struct IsolatedExecutor {
    isolation: Isolation,
}

impl IsolatedExecutor {
    pub fn new(isolation: Isolation) -> Self {
        Self { isolation }
    }

    pub fn in_thread(forecaster: impl Forecaster) -> Self {
        Self::new(Isolation::Thread(Arc::new(forecaster)))
    }

    /// Run one forecast on behalf of the ticket in `guard`.
    ///
    /// The guard stays with the computation, not with this future: if the
    /// caller goes away the device is only released once the forecast thread
    /// has returned or the child process has been reaped.
    pub async fn run(
        &self,
        req: ForecastRequest,
        guard: TicketGuard,
    ) -> Result<ForecastResponse, ServiceError> {
        let started = Instant::now();
        let result = match &self.isolation {
            Isolation::Thread(forecaster) => run_in_thread(forecaster.clone(), req, guard).await,
            Isolation::Process { program, args } => run_in_process(program, args, &req, guard).await,
        };
        debug!(elapsed = ?started.elapsed(), ok = result.is_ok(), "isolated computation finished");
        result
    }
}

async fn run_in_thread(
    forecaster: Arc<dyn Forecaster>,
    req: ForecastRequest,
    guard: TicketGuard,
) -> Result<ForecastResponse, ServiceError> {
    let joined = tokio::task::spawn_blocking(move || {
        let _guard = guard; // keep the device until the forecast returns
        forecaster.forecast(&req)
    })
    .await;

    match joined {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(e)) => Err(ServiceError::ComputationFailure(e.to_string())),
        Err(join_err) => {
            let reason = describe_join_error(join_err);
            error!("forecast thread died: {}", reason);
            Err(ServiceError::ComputationNoResult(reason))
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "forecast task was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("forecast thread panicked: {msg}")
}

async fn run_in_process(
    program: &Path,
    args: &[String],
    req: &ForecastRequest,
    guard: TicketGuard,
) -> Result<ForecastResponse, ServiceError> {
    let payload = serde_json::to_vec(req)
        .map_err(|e| ServiceError::ComputationFailure(format!("failed to encode request: {e}")))?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ServiceError::ComputationFailure(format!(
                "failed to start compute process `{}`: {e}",
                program.display()
            ))
        })?;

    // the supervisor outlives this future; dropping `caller` tells it to stop the child
    let (caller, abandoned) = oneshot::channel::<()>();
    let supervisor = tokio::spawn(supervise(child, payload, guard, abandoned));
    let joined = supervisor.await;
    drop(caller);

    joined.unwrap_or_else(|join_err| {
        let reason = describe_join_error(join_err);
        error!("compute supervisor died: {}", reason);
        Err(ServiceError::ComputationNoResult(reason))
    })
}

/// Drive one child to completion and only then give up the ticket.
async fn supervise(
    mut child: Child,
    payload: Vec<u8>,
    guard: TicketGuard,
    abandoned: oneshot::Receiver<()>,
) -> Result<ForecastResponse, ServiceError> {
    let finished = {
        let exchange = exchange(&mut child, &payload);
        tokio::pin!(exchange);
        tokio::select! {
            res = &mut exchange => Some(res),
            _ = abandoned => None,
        }
    };

    let result = match finished {
        Some(Ok((stdout, status))) => parse_outcome(&stdout, status),
        Some(Err(e)) => {
            stop(&mut child).await;
            Err(ServiceError::ComputationFailure(format!(
                "failed to collect compute process output: {e}"
            )))
        }
        None => {
            warn!(ticket = %guard.ticket(), "call dropped, stopping compute process");
            stop(&mut child).await;
            Err(ServiceError::ComputationNoResult("call was dropped before the result".into()))
        }
    };
    drop(guard);
    result
}

async fn exchange(child: &mut Child, payload: &[u8]) -> io::Result<(Vec<u8>, ExitStatus)> {
    if let Some(mut stdin) = child.stdin.take() {
        // a child that dies before reading is judged by what it left on stdout
        if let Err(e) = stdin.write_all(payload).await {
            warn!("failed to hand request to compute process: {}", e);
        }
    }

    let mut stdout = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout).await?;
    }
    let status = child.wait().await?;
    Ok((stdout, status))
}

async fn stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("failed to kill compute process: {}", e);
    }
    match child.wait().await {
        Ok(status) => debug!(%status, "compute process reaped"),
        Err(e) => error!("failed to reap compute process: {}", e),
    }
}

fn parse_outcome(stdout: &[u8], status: ExitStatus) -> Result<ForecastResponse, ServiceError> {
    let text = String::from_utf8_lossy(stdout);
    let Some(line) = text.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return Err(ServiceError::ComputationNoResult(format!(
            "compute process exited ({status}) without reporting a result"
        )));
    };

    match serde_json::from_str::<ComputeOutcome>(line) {
        Ok(ComputeOutcome::Success { result }) => Ok(result),
        Ok(ComputeOutcome::Failure { error }) => Err(ServiceError::ComputationFailure(error)),
        Err(e) => Err(ServiceError::ComputationNoResult(format!(
            "compute process exited ({status}) with unreadable output: {e}"
        ))),
    }
}

/// Body of the `compute` subcommand: one request in, one outcome line out.
pub fn serve_compute<R: Read, W: Write>(
    forecaster: &dyn Forecaster,
    mut input: R,
    mut output: W,
) -> io::Result<()> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;

    let outcome = match serde_json::from_str::<ForecastRequest>(&raw) {
        Ok(req) => match forecaster.forecast(&req) {
            Ok(result) => ComputeOutcome::Success { result },
            Err(e) => ComputeOutcome::Failure { error: e.to_string() },
        },
        Err(e) => ComputeOutcome::Failure { error: format!("unreadable request: {e}") },
    };

    serde_json::to_writer(&mut output, &outcome).map_err(io::Error::other)?;
    writeln!(output)?;
    output.flush()
}
