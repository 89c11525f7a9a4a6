use std::time::Instant;

use anyhow::anyhow;
use clap::Parser;
use gpu_forecast_proto::{ErrorBody, ForecastRequest, ForecastResponse, QueueSnapshot, SourceType};

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Source {
    Financial,
    Csv,
}

impl From<Source> for SourceType {
    fn from(s: Source) -> Self {
        match s {
            Source::Financial => SourceType::Financial,
            Source::Csv => SourceType::Csv,
        }
    }
}

#[derive(Parser)]
/// Command-line client for the GPU forecast server.
struct Opts {
    /// Forecast server URL
    #[arg(long, default_value = "http://127.0.0.1:7777")]
    server: String,

    /// Print the admission queue instead of requesting a forecast
    #[arg(long)]
    queue: bool,

    #[arg(long, default_value_t = 50)]
    window_len: i32,

    #[arg(long, default_value_t = 5)]
    word_len: i32,

    #[arg(long, default_value_t = 4)]
    alphabet_size: i32,

    #[arg(long, value_enum, default_value_t = Source::Csv)]
    source_type: Source,

    /// Feed name for `financial`, path on the server for `csv`
    #[arg(long, default_value = "")]
    source: String,

    #[arg(long, default_value = "")]
    contract: String,

    #[arg(long, default_value = "")]
    start_date: String,

    #[arg(long, default_value = "")]
    end_date: String,
}

async fn forecast(
    client: &reqwest::Client,
    server_address: &str,
    req: &ForecastRequest,
) -> anyhow::Result<ForecastResponse> {
    let resp = client
        .post(format!("{}/forecast", server_address))
        .json(req)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.bytes().await?;

    if !status.is_success() {
        // the server sends an ErrorBody for failures it produced itself
        return Err(match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => anyhow!("forecast failed ({:?}, {:?}): {}", err.status, err.kind, err.error),
            Err(_) => anyhow!("forecast failed: {} - {}", status, String::from_utf8_lossy(&body)),
        });
    }

    Ok(serde_json::from_slice(&body)?)
}

async fn queue(client: &reqwest::Client, server_address: &str) -> anyhow::Result<QueueSnapshot> {
    let resp = client
        .get(format!("{}/queue", server_address))
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.json().await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let start = Instant::now();
    let opts = Opts::parse();
    let server_address = opts.server.trim_end_matches('/');
    let client = reqwest::Client::new();

    if opts.queue {
        let snap = queue(&client, server_address).await?;
        println!("device busy: {}", snap.busy);
        match snap.holder {
            Some(holder) => println!("holder: #{}", holder),
            None => println!("holder: none"),
        }
        println!("queue: {:?}", snap.waiting);
        return Ok(());
    }

    if opts.source.is_empty() {
        return Err(anyhow!("--source is required when requesting a forecast"));
    }

    let req = ForecastRequest {
        window_len: opts.window_len,
        word_len: opts.word_len,
        alphabet_size: opts.alphabet_size,
        source_type: opts.source_type.into(),
        source: opts.source,
        contract: opts.contract,
        start_date: opts.start_date,
        end_date: opts.end_date,
    };

    let resp = forecast(&client, server_address, &req).await?;
    println!("last SAX word:         {}", resp.last_sax_word);
    println!("forecast SAX letter:   {}", resp.forecast_sax_letter);
    println!("position in interval:  {:.4}", resp.position_in_sax_interval);
    println!("total time: {:.2?}", start.elapsed());

    Ok(())
}
