use axum::{
    Extension, Json, Router,
    routing::{get, post},
};
use gpu_forecast_proto::{ForecastRequest, ForecastResponse, QueueSnapshot};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{errors::ServiceError, orchestrator::Orchestrator};

pub async fn handle_forecast(
    Extension(orchestrator): Extension<Orchestrator>,
    Json(req): Json<ForecastRequest>,
) -> Result<Json<ForecastResponse>, ServiceError> {
    info!(
        window_len = req.window_len,
        word_len = req.word_len,
        alphabet_size = req.alphabet_size,
        source = %req.source,
        "received forecast request"
    );
    let resp = orchestrator.forecast(req).await?;
    Ok(Json(resp))
}

pub async fn handle_queue(Extension(orchestrator): Extension<Orchestrator>) -> Json<QueueSnapshot> {
    Json(orchestrator.gate().snapshot())
}

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/forecast", post(handle_forecast))
        .route("/queue", get(handle_queue))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(orchestrator))
}
