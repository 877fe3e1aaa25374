//! Price engine
//!
//! Entry point of the crate: picks the provider for the configured website
//! and runs current, historical and search batches against it.

use crate::{
    config::EngineConfig,
    constants::DEFAULT_CURRENCIES,
    error::{ConfigError, PriceError, StoreError},
    filter::filter_by_pair_volume,
    metrics::TransportMetrics,
    provider::PriceProvider,
    providers::{AlcorProvider, CoinGeckoProvider, CryptowatchProvider},
    reporter::Reporter,
    store::CoinStore,
    transport::Transport,
    types::{CoinRef, CoinSearchHit, PricePoint, Website},
    window::WindowRetrier,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Resolves coin prices on one website
///
/// # Example
/// ```no_run
/// use coin_price_sdk::{CoinRef, EngineConfig, PriceEngine, TracingReporter};
/// use chrono::{TimeZone, Utc};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = PriceEngine::new(EngineConfig::default(), Arc::new(TracingReporter))?;
/// let at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
/// let prices = engine
///     .historical_prices(
///         &[CoinRef::new("bitcoin")],
///         &["usd".to_string()],
///         at,
///         &CancellationToken::new(),
///     )
///     .await;
/// for p in prices {
///     println!("{} {} {:.2}", p.coin.name, p.currency, p.price);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PriceEngine {
    provider: Arc<dyn PriceProvider>,
    max_markets_per_pair: usize,
}

impl PriceEngine {
    /// Creates an engine for `config.website`
    ///
    /// This is the only place where configuration errors surface.
    pub fn new(config: EngineConfig, reporter: Arc<dyn Reporter>) -> Result<Self, ConfigError> {
        config.validate()?;

        let website = config.website;
        let transport = Arc::new(Transport::new(
            website.name(),
            config.transport_for(website),
            reporter,
        )?);
        let retrier = WindowRetrier::new(config.max_attempts);

        let provider: Arc<dyn PriceProvider> = match website {
            Website::Alcor => Arc::new(AlcorProvider::new(
                config.alcor_url.clone(),
                config.alcor_chains.clone(),
                transport,
                retrier,
            )),
            Website::CoinGecko => Arc::new(CoinGeckoProvider::new(
                config.coingecko_url.clone(),
                config.coingecko_demo_key.clone(),
                transport,
                retrier,
            )),
            Website::Cryptowatch => Arc::new(CryptowatchProvider::new(
                config.cryptowatch_url.clone(),
                config.strictness,
                transport,
                retrier,
            )),
        };

        tracing::info!(
            website = %website,
            max_attempts = config.max_attempts,
            max_markets_per_pair = config.max_markets_per_pair,
            "Price engine initialized"
        );

        Ok(Self::with_provider(provider, config.max_markets_per_pair))
    }

    /// Creates an engine configured from environment variables
    pub fn from_env(reporter: Arc<dyn Reporter>) -> Result<Self, ConfigError> {
        Self::new(EngineConfig::from_env()?, reporter)
    }

    /// Creates an engine around a custom provider
    ///
    /// This is primarily for testing with mock providers.
    pub fn with_provider(provider: Arc<dyn PriceProvider>, max_markets_per_pair: usize) -> Self {
        Self {
            provider,
            max_markets_per_pair,
        }
    }

    pub fn website(&self) -> Website {
        self.provider.website()
    }

    /// Current prices, one point per coin and currency (or per venue)
    ///
    /// An empty `currencies` list means the default currencies.
    pub async fn current_prices(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let currencies = currencies_or_default(currencies);
        let start = Instant::now();
        tracing::info!(
            website = %self.website(),
            coins = coins.len(),
            currencies = currencies.len(),
            "Fetching current prices"
        );

        let prices = self.provider.price_current(coins, &currencies, cancel).await;
        let prices = self.apply_pair_filter(prices);
        log_batch_done("current", &prices, start);
        prices
    }

    /// Prices nearest to the historical instant `at`
    ///
    /// Every coin and currency yields a point; unresolved ones carry an error
    /// text and NaN numbers. Multi-venue results are cut to the configured
    /// number of venues per pair.
    pub async fn historical_prices(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let currencies = currencies_or_default(currencies);
        let start = Instant::now();
        tracing::info!(
            website = %self.website(),
            coins = coins.len(),
            currencies = currencies.len(),
            at = %at,
            "Fetching historical prices"
        );

        let prices = self.provider.price_history(coins, &currencies, at, cancel).await;
        let prices = self.apply_pair_filter(prices);
        log_batch_done("historical", &prices, start);
        prices
    }

    /// Daily snapshot prices, `None` when the website has no snapshot endpoint
    pub async fn daily_prices(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<Vec<PricePoint>> {
        let currencies = currencies_or_default(currencies);
        let start = Instant::now();
        let prices = self.provider.daily_history(coins, &currencies, at, cancel).await?;
        log_batch_done("daily", &prices, start);
        Some(prices)
    }

    /// Search the website's catalog
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSearchHit>, PriceError> {
        let hits = self.provider.search(query, cancel).await?;
        tracing::info!(website = %self.website(), query, hits = hits.len(), "Search finished");
        Ok(hits)
    }

    /// Coins stored for this engine's website
    pub async fn load_coins(&self, store: &dyn CoinStore) -> Result<Vec<CoinRef>, StoreError> {
        let coins = store.coins(self.website()).await?;
        tracing::debug!(website = %self.website(), coins = coins.len(), "Loaded coins from store");
        Ok(coins)
    }

    /// Store the coins of search hits, returning how many were new
    ///
    /// Coins already stored are skipped.
    pub async fn save_search_hits(
        &self,
        store: &dyn CoinStore,
        hits: &[CoinSearchHit],
    ) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for hit in hits {
            match store.insert_coin(self.website(), &hit.coin).await {
                Ok(_) => inserted += 1,
                Err(StoreError::DuplicateCoin(site_id)) => {
                    tracing::debug!(site_id = %site_id, "Coin already stored");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    /// Transport health of the active provider
    pub async fn metrics(&self) -> TransportMetrics {
        self.provider.metrics().await
    }

    fn apply_pair_filter(&self, prices: Vec<PricePoint>) -> Vec<PricePoint> {
        if self.provider.is_multi_venue() && self.max_markets_per_pair > 0 {
            filter_by_pair_volume(prices, self.max_markets_per_pair)
        } else {
            prices
        }
    }
}

fn currencies_or_default(currencies: &[String]) -> Vec<String> {
    if currencies.is_empty() {
        DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect()
    } else {
        currencies.to_vec()
    }
}

fn log_batch_done(kind: &str, prices: &[PricePoint], start: Instant) {
    let failed = prices.iter().filter(|p| !p.is_resolved()).count();
    tracing::info!(
        kind,
        points = prices.len(),
        failed,
        latency_ms = start.elapsed().as_millis() as u64,
        "Price batch finished"
    );
}
