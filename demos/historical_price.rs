use chrono::{NaiveDate, TimeZone, Utc};
use coin_price_sdk::export::{export_rows, ExportFormat, TableFormat};
use coin_price_sdk::{CoinRef, EngineConfig, PriceEngine, TracingReporter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Usage: historical_price <yyyy-mm-dd> <coin> [<coin> ...]
///
/// The website and its settings come from the environment, e.g.
/// `COIN_PRICE_WEBSITE=cryptowatch MAX_MARKETS_PER_PAIR=3`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let date = args.next().unwrap_or_else(|| "2022-05-01".to_string());
    let mut coins: Vec<CoinRef> = args.map(CoinRef::new).collect();
    if coins.is_empty() {
        coins = vec![CoinRef::new("bitcoin"), CoinRef::new("ethereum")];
    }

    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")?;
    let at = Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).ok_or("invalid time")?);

    let engine = PriceEngine::from_env(Arc::new(TracingReporter))?;
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    println!("Historical prices on {} at {}", engine.website(), at);
    let prices = engine.historical_prices(&coins, &[], at, &cancel).await;
    let format = TableFormat::default();
    println!("{}", format.render(&export_rows(&prices, ExportFormat::Csv)));

    if let Some(daily) = engine.daily_prices(&coins, &[], at, &cancel).await {
        println!("\nDaily snapshot");
        println!("{}", format.render(&export_rows(&daily, ExportFormat::Csv)));
    }

    let metrics = engine.metrics().await;
    println!(
        "\nRequests: {} (failed {}, rate-limit waits {}), p50 {:.0} ms",
        metrics.total_requests,
        metrics.failed_requests,
        metrics.rate_limit_waits,
        metrics.latency_p50_ms
    );

    Ok(())
}
