use gpu_forecast_proto::{ForecastRequest, SourceType};

use super::ForecastError;

/// Load the series a request points at.
pub fn load_series(req: &ForecastRequest) -> Result<Vec<f64>, ForecastError> {
    match req.source_type {
        SourceType::Csv => {
            let content = std::fs::read_to_string(&req.source)?;
            parse_csv(&content, &req.start_date, &req.end_date)
        }
        SourceType::Financial => Err(ForecastError::SourceUnavailable(format!(
            "financial feed `{}` ({}) is not configured on this server",
            req.source, req.contract
        ))),
    }
}

/// Pull the value column out of CSV text.
///
/// The header row is optional. With a header the `close` column is used when
/// present, otherwise the last one; a `date` column, if any, is filtered to
/// `start..=end` (ISO dates compare lexicographically, empty bounds are open).
/// Fields may be double-quoted, and quoted values may carry `,` digit grouping
/// as spreadsheet exports write them (`"1,234.5"`).
pub fn parse_csv(content: &str, start: &str, end: &str) -> Result<Vec<f64>, ForecastError> {
    let mut rows = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .peekable();

    let mut value_col = None;
    let mut date_col = None;

    if let Some(&(_, first)) = rows.peek() {
        let fields = split(first);
        let last = fields.len().saturating_sub(1);
        let is_header = fields.get(last).is_some_and(|f| f.parse::<f64>().is_err());
        if is_header {
            value_col = Some(
                fields
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case("close"))
                    .unwrap_or(last),
            );
            date_col = fields.iter().position(|f| f.eq_ignore_ascii_case("date"));
            rows.next();
        }
    }

    let mut values = Vec::new();
    for (line_no, line) in rows {
        let fields = split(line);
        let col = value_col.unwrap_or(fields.len().saturating_sub(1));

        if let Some(dc) = date_col {
            let date = fields.get(dc).map(String::as_str).unwrap_or_default();
            if (!start.is_empty() && date < start) || (!end.is_empty() && date > end) {
                continue;
            }
        }

        let raw = fields.get(col).ok_or_else(|| ForecastError::Malformed {
            line: line_no,
            reason: format!("expected at least {} columns", col + 1),
        })?;
        let value = raw.replace(',', "").parse::<f64>().map_err(|e| ForecastError::Malformed {
            line: line_no,
            reason: format!("`{raw}` is not a number: {e}"),
        })?;
        if !value.is_finite() {
            return Err(ForecastError::Malformed {
                line: line_no,
                reason: format!("`{raw}` is not finite"),
            });
        }
        values.push(value);
    }

    Ok(values)
}

/// Split one record on commas outside double quotes. Quotes are dropped and
/// `""` inside a quoted field is a literal quote.
fn split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}
