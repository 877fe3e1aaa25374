use coin_price_sdk::{CoinStore, EngineConfig, InMemoryCoinStore, PriceEngine, TracingReporter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Usage: coin_search <query>
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let query = std::env::args().nth(1).unwrap_or_else(|| "bitcoin".to_string());
    let engine = PriceEngine::new(EngineConfig::from_env()?, Arc::new(TracingReporter))?;
    let cancel = CancellationToken::new();

    let hits = engine.search(&query, &cancel).await?;
    println!("{} results for '{}' on {}", hits.len(), query, engine.website());
    for hit in hits.iter().take(20) {
        println!(
            "{:<30} {:<25} {:<10} {}",
            hit.coin.site_id,
            hit.coin.name,
            hit.coin.symbol,
            hit.coin.chain.as_deref().unwrap_or("")
        );
    }

    let store = InMemoryCoinStore::new();
    let saved = engine.save_search_hits(&store, &hits[..hits.len().min(5)]).await?;
    println!("\nStored {} coins", saved);
    for coin in store.coins(engine.website()).await? {
        println!("  {} ({})", coin.name, coin.site_id);
    }

    Ok(())
}
