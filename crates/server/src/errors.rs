use std::time::Duration;

use axum::{Json, http::StatusCode, response::IntoResponse};
use gpu_forecast_proto::{ErrorBody, ErrorKind, ForecastResponse, StatusCategory};
use thiserror::Error;

use crate::ticket::Ticket;

/// Every way a forecast call can fail. None of them are retried here.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("device busy: ticket {ticket} waited {waited:?} without getting its turn")]
    ResourceTimeout { ticket: Ticket, waited: Duration },

    #[error("forecast failed: {0}")]
    ComputationFailure(String),

    #[error("forecast produced no result: {0}")]
    ComputationNoResult(String),

    #[error("invalid request: {0}")]
    InvalidArgument(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::ResourceTimeout { .. } => ErrorKind::ResourceTimeout,
            ServiceError::ComputationFailure(_) => ErrorKind::ComputationFailure,
            ServiceError::ComputationNoResult(_) => ErrorKind::ComputationNoResult,
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Timeouts and computation failures share one status on the wire.
    pub fn to_http_response(&self) -> (StatusCode, StatusCategory) {
        match self {
            ServiceError::InvalidArgument(_) => {
                (StatusCode::BAD_REQUEST, StatusCategory::InvalidArgument)
            }
            ServiceError::ResourceTimeout { .. }
            | ServiceError::ComputationFailure(_)
            | ServiceError::ComputationNoResult(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, StatusCategory::Internal)
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let (code, status) = self.to_http_response();
        let body = ErrorBody {
            status,
            kind: self.kind(),
            error: self.to_string(),
            output: ForecastResponse::default(),
        };
        (code, Json(body)).into_response()
    }
}
