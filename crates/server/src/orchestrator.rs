use std::{sync::Arc, time::Instant};

use gpu_forecast_proto::{ForecastRequest, ForecastResponse};
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    forecast,
    runner::IsolatedExecutor,
    scheduler::{Gate, WaitOutcome, WaitPolicy},
};

pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 16;

/// Per-call coordination: ticket, wait, run, release.
#[derive(Clone)]
pub struct Orchestrator {
    gate: Gate,
    executor: IsolatedExecutor,
    policy: WaitPolicy,
    // bounds calls in flight; a call takes its ticket only once it has a slot
    call_slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(gate: Gate, executor: IsolatedExecutor, policy: WaitPolicy) -> Self {
        Self {
            gate,
            executor,
            policy,
            call_slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_CALLS)),
        }
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.call_slots = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub async fn forecast(&self, req: ForecastRequest) -> Result<ForecastResponse, ServiceError> {
        let request_id = Uuid::new_v4();
        self.forecast_inner(req)
            .instrument(info_span!("forecast", %request_id))
            .await
    }

    async fn forecast_inner(&self, req: ForecastRequest) -> Result<ForecastResponse, ServiceError> {
        // reject bad input before it can occupy a place in line
        forecast::validate(&req).map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;

        let _slot = self
            .call_slots
            .acquire()
            .await
            .map_err(|e| ServiceError::ComputationFailure(format!("no call slot available: {e}")))?;

        // the guard retires the ticket on every exit path below, releasing the
        // device only if this call holds it. Once the device is acquired it is
        // handed to the executor, which keeps it until the computation ends.
        let guard = self.gate.enqueue();
        let ticket = guard.ticket();
        info!(ticket = %ticket, source_type = ?req.source_type, "request queued");

        let waiting_since = Instant::now();
        match self.gate.await_turn(&guard, &self.policy).await {
            WaitOutcome::Acquired => {
                info!(ticket = %ticket, waited = ?waiting_since.elapsed(), "device acquired");
            }
            WaitOutcome::TimedOut => {
                let waited = waiting_since.elapsed();
                warn!(ticket = %ticket, ?waited, "gave up waiting for the device");
                return Err(ServiceError::ResourceTimeout { ticket, waited });
            }
        }

        let outcome = self.executor.run(req, guard).await;

        match &outcome {
            Ok(resp) => info!(
                ticket = %ticket,
                last_sax_word = %resp.last_sax_word,
                forecast_sax_letter = %resp.forecast_sax_letter,
                position = resp.position_in_sax_interval,
                "forecast complete, device released"
            ),
            Err(e) => error!(ticket = %ticket, "forecast failed, device released: {}", e),
        }
        outcome
    }
}
