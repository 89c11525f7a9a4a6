use gpu_forecast_proto::{ForecastRequest, ForecastResponse};
use tracing::debug;

use super::{ForecastError, Forecaster, SaxParams, source, validate};

/// Open-ended edge intervals are capped here (in standard deviations) when
/// computing a position inside them.
const EDGE_SIGMA: f64 = 3.0;

/// Equiprobable N(0, 1) breakpoints for alphabets of 2..=10 letters.
static BREAKPOINTS: [&[f64]; 9] = [
    &[0.0],
    &[-0.43, 0.43],
    &[-0.67, 0.0, 0.67],
    &[-0.84, -0.25, 0.25, 0.84],
    &[-0.97, -0.43, 0.0, 0.43, 0.97],
    &[-1.07, -0.57, -0.18, 0.18, 0.57, 1.07],
    &[-1.15, -0.67, -0.32, 0.0, 0.32, 0.67, 1.15],
    &[-1.22, -0.76, -0.43, -0.14, 0.14, 0.43, 0.76, 1.22],
    &[-1.28, -0.84, -0.52, -0.25, 0.0, 0.25, 0.52, 0.84, 1.28],
];

/// Symbolic forecaster over a CSV series.
///
/// The series is z-normalized and reduced to piecewise aggregate means of
/// `window_len / word_len` points each. The next mean is predicted as the
/// average of the means that followed earlier occurrences of the latest letter.
#[derive(Clone, Copy, Debug, Default)]
pub struct SaxForecaster;

impl Forecaster for SaxForecaster {
    fn forecast(&self, req: &ForecastRequest) -> Result<ForecastResponse, ForecastError> {
        let params = validate(req)?;
        let series = source::load_series(req)?;
        debug!(points = series.len(), ?params, "series loaded");
        forecast_series(&series, params)
    }
}

pub fn forecast_series(series: &[f64], params: SaxParams) -> Result<ForecastResponse, ForecastError> {
    let segment = params.window_len / params.word_len;
    let needed = (params.word_len + 1) * segment;
    if series.len() < needed {
        return Err(ForecastError::InsufficientData { needed, available: series.len() });
    }

    let bps = breakpoints(params.alphabet_size)?;
    let means = paa_tail(&znormalize(series), segment);
    let symbols: Vec<usize> = means.iter().map(|m| symbol_index(*m, bps)).collect();

    let last_sax_word: String = symbols[symbols.len() - params.word_len..]
        .iter()
        .map(|i| letter(*i))
        .collect();

    let last = symbols[symbols.len() - 1];
    let followers: Vec<f64> = symbols
        .windows(2)
        .zip(means.iter().skip(1))
        .filter(|(pair, _)| pair[0] == last)
        .map(|(_, next)| *next)
        .collect();
    let predicted = if followers.is_empty() {
        means[means.len() - 1]
    } else {
        followers.iter().sum::<f64>() / followers.len() as f64
    };

    let idx = symbol_index(predicted, bps);
    Ok(ForecastResponse {
        last_sax_word,
        forecast_sax_letter: letter(idx).to_string(),
        position_in_sax_interval: position_in_interval(predicted, idx, bps),
    })
}

pub fn breakpoints(alphabet_size: usize) -> Result<&'static [f64], ForecastError> {
    alphabet_size
        .checked_sub(2)
        .and_then(|i| BREAKPOINTS.get(i))
        .copied()
        .ok_or_else(|| {
            ForecastError::InvalidParameters(format!("unsupported alphabet size {alphabet_size}"))
        })
}

/// Zero mean, unit (population) deviation. A flat series maps to all zeros.
pub fn znormalize(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Means of consecutive `segment`-sized chunks, aligned to the end of `values`.
pub fn paa_tail(values: &[f64], segment: usize) -> Vec<f64> {
    let full = values.len() / segment * segment;
    values[values.len() - full..]
        .chunks_exact(segment)
        .map(|c| c.iter().sum::<f64>() / segment as f64)
        .collect()
}

pub fn symbol_index(value: f64, bps: &[f64]) -> usize {
    bps.partition_point(|b| *b <= value)
}

fn letter(index: usize) -> char {
    char::from(b'a' + index as u8)
}

fn position_in_interval(value: f64, index: usize, bps: &[f64]) -> f64 {
    let lo = if index == 0 { -EDGE_SIGMA } else { bps[index - 1] };
    let hi = bps.get(index).copied().unwrap_or(EDGE_SIGMA);
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}
