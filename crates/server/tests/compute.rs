use std::{io::Write, path::PathBuf};

use gpu_forecast_proto::{ForecastRequest, QueueSnapshot, SourceType};
use gpu_forecast_server::{
    errors::ServiceError,
    forecast::{Forecaster, SaxForecaster},
    runner::{IsolatedExecutor, Isolation},
    scheduler::{Gate, WaitOutcome, WaitPolicy},
};

fn compute_binary() -> IsolatedExecutor {
    IsolatedExecutor::new(Isolation::Process {
        program: PathBuf::from(env!("CARGO_BIN_EXE_gpu-forecast-server")),
        args: vec!["compute".into()],
    })
}

fn csv_request(source: String) -> ForecastRequest {
    ForecastRequest {
        window_len: 12,
        word_len: 4,
        alphabet_size: 4,
        source_type: SourceType::Csv,
        source,
        contract: String::new(),
        start_date: String::new(),
        end_date: String::new(),
    }
}

struct TempCsv(PathBuf);

impl TempCsv {
    fn write(rows: impl IntoIterator<Item = f64>) -> Self {
        let path = std::env::temp_dir().join(format!("compute-{}.csv", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "date,close").unwrap();
        for (i, v) in rows.into_iter().enumerate() {
            writeln!(f, "2022-{:02}-{:02},{v}", i / 28 + 1, i % 28 + 1).unwrap();
        }
        Self(path)
    }

    fn source(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl Drop for TempCsv {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[tokio::test]
async fn compute_subcommand_matches_in_process_forecast() {
    let csv = TempCsv::write((0..60).map(|i| (i as f64 / 4.0).sin() * 10.0 + 100.0));
    let req = csv_request(csv.source());
    let expected = SaxForecaster.forecast(&req).unwrap();

    let gate = Gate::new();
    let guard = gate.enqueue();
    assert_eq!(gate.await_turn(&guard, &WaitPolicy::default()).await, WaitOutcome::Acquired);

    let out = compute_binary().run(req, guard).await.unwrap();
    assert_eq!(out.last_sax_word, expected.last_sax_word);
    assert_eq!(out.forecast_sax_letter, expected.forecast_sax_letter);
    assert!((out.position_in_sax_interval - expected.position_in_sax_interval).abs() < 1e-9);
    assert_eq!(gate.snapshot(), QueueSnapshot::default());
}

#[tokio::test]
async fn compute_subcommand_reports_forecast_errors_as_failure() {
    let csv = TempCsv::write([1.0, 2.0, 3.0]);
    let gate = Gate::new();

    let err = compute_binary().run(csv_request(csv.source()), gate.enqueue()).await.unwrap_err();
    match err {
        ServiceError::ComputationFailure(msg) => assert!(msg.contains("not enough data"), "got {msg}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gate.snapshot(), QueueSnapshot::default());
}
