//! The forecasting computation itself. The admission layer treats it as an
//! opaque function from a request to a result or an error.

pub mod sax;
pub mod source;

use std::io;

use gpu_forecast_proto::{ForecastRequest, ForecastResponse};
use thiserror::Error;

pub use sax::SaxForecaster;

pub const MIN_ALPHABET: i32 = 2;
pub const MAX_ALPHABET: i32 = 10;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("malformed series at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("not enough data: need at least {needed} points, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("failed to read series: {0}")]
    Io(#[from] io::Error),
}

/// Runs one forecast. Called from a blocking thread, so implementations may
/// take as long as they need.
pub trait Forecaster: Send + Sync + 'static {
    fn forecast(&self, req: &ForecastRequest) -> Result<ForecastResponse, ForecastError>;
}

/// Knobs of a validated request, as sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaxParams {
    pub window_len: usize,
    pub word_len: usize,
    pub alphabet_size: usize,
}

/// Check the numeric knobs of a request before it is allowed to queue for the device.
pub fn validate(req: &ForecastRequest) -> Result<SaxParams, ForecastError> {
    if req.window_len < 1 {
        return Err(ForecastError::InvalidParameters(format!(
            "window_len must be positive, got {}",
            req.window_len
        )));
    }
    if req.word_len < 1 || req.word_len > req.window_len {
        return Err(ForecastError::InvalidParameters(format!(
            "word_len must be between 1 and window_len ({}), got {}",
            req.window_len, req.word_len
        )));
    }
    if !(MIN_ALPHABET..=MAX_ALPHABET).contains(&req.alphabet_size) {
        return Err(ForecastError::InvalidParameters(format!(
            "alphabet_size must be between {MIN_ALPHABET} and {MAX_ALPHABET}, got {}",
            req.alphabet_size
        )));
    }
    if req.source.trim().is_empty() {
        return Err(ForecastError::InvalidParameters("source must not be empty".into()));
    }

    // all three are positive here
    Ok(SaxParams {
        window_len: req.window_len as usize,
        word_len: req.word_len as usize,
        alphabet_size: req.alphabet_size as usize,
    })
}

#[cfg(test)]
pub(crate) fn request(window_len: i32, word_len: i32, alphabet_size: i32) -> ForecastRequest {
    ForecastRequest {
        window_len,
        word_len,
        alphabet_size,
        source_type: gpu_forecast_proto::SourceType::Csv,
        source: "series.csv".into(),
        contract: String::new(),
        start_date: String::new(),
        end_date: String::new(),
    }
}
