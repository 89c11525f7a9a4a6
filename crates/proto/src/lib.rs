use serde::{Deserialize, Serialize};

/// Where the forecaster should read its series from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Financial,
    Csv,
}

/// What a caller sends to `/forecast`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub window_len: i32,
    pub word_len: i32,
    pub alphabet_size: i32,
    pub source_type: SourceType,
    /// Feed name for `financial`, file path for `csv`.
    pub source: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
}

/// Successful forecast. `Default` is the empty result carried by error bodies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub last_sax_word: String,
    pub forecast_sax_letter: String,
    pub position_in_sax_interval: f64,
}

/// Categorical status of a failed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCategory {
    Internal,
    InvalidArgument,
}

/// Finer-grained failure reason. Timeouts and computation failures share the
/// `INTERNAL` status; `kind` lets callers tell them apart if they care to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceTimeout,
    ComputationFailure,
    ComputationNoResult,
    InvalidArgument,
}

/// Body returned alongside a non-2xx status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: StatusCategory,
    pub kind: ErrorKind,
    pub error: String,
    #[serde(default)]
    pub output: ForecastResponse,
}

/// Read-only view of the admission queue returned by `/queue`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub busy: bool,
    pub holder: Option<u64>,
    /// Outstanding tickets in arrival order, the holder included.
    pub waiting: Vec<u64>,
}

/// What an isolated compute process writes to stdout before exiting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComputeOutcome {
    Success { result: ForecastResponse },
    Failure { error: String },
}
