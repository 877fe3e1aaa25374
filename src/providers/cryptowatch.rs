//! Cryptowatch price provider implementation
//!
//! Cryptowatch lists every exchange a coin trades on. A coin symbol is first
//! expanded into its active markets (filtered by quote currency strictness),
//! then each market is priced on its own route.

use crate::{
    catalog::{scope_of, CatalogCache},
    constants::{CRYPTOWATCH_OHLC_PERIOD, MARKET_NOT_FOUND},
    error::PriceError,
    market::{dedup_listings, field_matches, filter_pairs, MatchMode, PairListing, Strictness},
    metrics::TransportMetrics,
    provider::PriceProvider,
    timestamp::TimeUnit,
    transport::{QueryParams, Transport},
    types::{CoinRef, CoinSearchHit, Market, PricePoint, Sample, Website},
    window::{RangeSource, WindowRetrier},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct AssetDetail {
    markets: AssetMarkets,
}

#[derive(Debug, Deserialize)]
struct AssetMarkets {
    base: Option<Vec<PairListing>>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    price: SummaryPrice,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct SummaryPrice {
    last: f64,
}

#[derive(Debug, Deserialize)]
struct Asset {
    sid: String,
    symbol: String,
    name: String,
    route: Option<String>,
}

/// Cryptowatch price provider
pub struct CryptowatchProvider {
    base_url: String,
    strictness: Strictness,
    transport: Arc<Transport>,
    retrier: WindowRetrier,
    markets: CatalogCache<Vec<Market>>,
    assets: CatalogCache<Vec<Asset>>,
}

impl CryptowatchProvider {
    /// Creates a new Cryptowatch provider
    ///
    /// The API key travels as a static header configured on `transport`.
    pub fn new(
        base_url: impl Into<String>,
        strictness: Strictness,
        transport: Arc<Transport>,
        retrier: WindowRetrier,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            strictness,
            transport,
            retrier,
            markets: CatalogCache::new(),
            assets: CatalogCache::new(),
        }
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Drop cached markets and assets
    pub async fn invalidate_catalog(&self) {
        self.markets.invalidate().await;
        self.assets.invalidate().await;
    }

    /// GET a Cryptowatch resource, forwarding its allowance to the reporter
    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> Result<T, PriceError> {
        let body = self.transport.fetch(url, params, cancel).await.into_result()?;
        if let Some(allowance) = body.get("allowance") {
            self.transport.reporter().allowance(allowance);
        }
        let envelope: Envelope<T> = serde_json::from_value(body)?;
        Ok(envelope.result)
    }

    /// Markets of one coin, filtered by the configured strictness
    ///
    /// A coin without base listings resolves to a single unresolved market;
    /// request failures are returned as errors and never cached.
    async fn coin_markets(
        &self,
        coin: &CoinRef,
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Market>, PriceError> {
        let url = format!("{}/assets/{}", self.base_url, coin.symbol.to_lowercase());
        let detail: AssetDetail = self.get(&url, &QueryParams::new(), cancel).await?;

        let Some(listings) = detail.markets.base else {
            return Ok(vec![Market::unresolved(coin.clone(), "", MARKET_NOT_FOUND)]);
        };

        let active: Vec<PairListing> = listings.into_iter().filter(|l| l.active).collect();
        Ok(
            filter_pairs(dedup_listings(active), &coin.symbol, currencies, self.strictness)
                .into_iter()
                .map(|listing| {
                    Market::new(coin.clone(), listing.quote(&coin.symbol), listing.route.clone())
                        .with_venue(listing.exchange, listing.pair)
                        .with_active(listing.active)
                })
                .collect(),
        )
    }

    async fn summary(
        &self,
        market: &Market,
        cancel: &CancellationToken,
    ) -> Result<(f64, f64), PriceError> {
        let summary: Summary = self
            .get(&format!("{}/summary", market.route), &QueryParams::new(), cancel)
            .await?;
        Ok((summary.price.last, summary.volume))
    }
}

#[async_trait]
impl RangeSource for CryptowatchProvider {
    async fn fetch_range(
        &self,
        market: &Market,
        from: i64,
        to: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sample>, PriceError> {
        let params = QueryParams::new()
            .with("after", from)
            .with("before", to)
            .with("periods", CRYPTOWATCH_OHLC_PERIOD);
        let candles: HashMap<String, Vec<Vec<f64>>> = self
            .get(&format!("{}/ohlc", market.route), &params, cancel)
            .await?;

        // [close_time, open, high, low, close, volume, quote_volume]
        Ok(candles
            .get(&CRYPTOWATCH_OHLC_PERIOD.to_string())
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.len() >= 6)
                    .map(|row| Sample::new(TimeUnit::Seconds.float_to_secs(row[0]), row[1], row[5]))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl PriceProvider for CryptowatchProvider {
    fn website(&self) -> Website {
        Website::Cryptowatch
    }

    fn is_multi_venue(&self) -> bool {
        true
    }

    async fn resolve_markets(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<Market> {
        self.transport
            .reporter()
            .progress_text("Loading Cryptowatch market data");

        let mut markets = Vec::new();
        for coin in coins {
            if cancel.is_cancelled() {
                markets.push(Market::unresolved(
                    coin.clone(),
                    "",
                    PriceError::Cancelled.to_string(),
                ));
                continue;
            }

            let scope = scope_of(&(coin, currencies, self.strictness));
            let loaded = self
                .markets
                .get_or_load(scope, || self.coin_markets(coin, currencies, cancel))
                .await;
            match loaded {
                Ok(catalog) => markets.extend(catalog.entries.iter().cloned()),
                Err(e) => {
                    tracing::warn!(
                        symbol = %coin.symbol,
                        error = %e,
                        "Failed to load Cryptowatch markets"
                    );
                    markets.push(Market::unresolved(coin.clone(), "", e.to_string()));
                }
            }
        }

        tracing::info!(
            coins = coins.len(),
            markets = markets.len(),
            strictness = %self.strictness,
            "Resolved Cryptowatch markets"
        );
        markets
    }

    async fn price_current(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let markets = self.resolve_markets(coins, currencies, cancel).await;
        let reporter = self.transport.reporter();
        let now = Utc::now();

        let mut prices = Vec::with_capacity(markets.len());
        for (index, market) in markets.iter().enumerate() {
            let result = if cancel.is_cancelled() {
                Err(PriceError::Cancelled)
            } else if let Some(error) = &market.resolution_error {
                Err(PriceError::market_not_resolved(error.clone()))
            } else {
                reporter.progress(index + 1, markets.len());
                self.summary(market, cancel).await
            };
            prices.push(PricePoint::for_market(market, now, result));
        }
        prices
    }

    async fn price_history(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let markets = self.resolve_markets(coins, currencies, cancel).await;
        self.retrier
            .resolve_all(self, &markets, at, self.transport.reporter().as_ref(), cancel)
            .await
    }

    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSearchHit>, PriceError> {
        let url = format!("{}/assets", self.base_url);
        let catalog = self
            .assets
            .get_or_load(scope_of(&url), || async {
                self.transport.reporter().progress_text("Loading Cryptowatch assets");
                self.get::<Vec<Asset>>(&url, &QueryParams::new(), cancel).await
            })
            .await?;

        Ok(catalog
            .entries
            .iter()
            .filter(|a| {
                field_matches(query, &a.sid, MatchMode::Prefix)
                    || field_matches(query, &a.name, MatchMode::Prefix)
                    || field_matches(query, &a.symbol, MatchMode::Prefix)
            })
            .map(|a| {
                let mut hit = CoinSearchHit::new(
                    CoinRef::new(a.sid.clone())
                        .with_name(a.name.clone())
                        .with_symbol(a.symbol.clone()),
                );
                hit.route = a.route.clone();
                hit
            })
            .collect())
    }

    async fn metrics(&self) -> TransportMetrics {
        self.transport.metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CRYPTOWATCH_API_KEY_HEADER;
    use crate::reporter::recording::RecordingReporter;
    use crate::timestamp::secs_to_utc;
    use crate::transport::TransportConfig;
    use mockito::Matcher;

    const BTC_ASSET: &str = r#"{"result":{"id":60,"sid":"btc","symbol":"btc","name":"Bitcoin","fiat":false,
        "markets":{"base":[
            {"id":1,"exchange":"kraken","pair":"btcusd","active":true,"route":"ROUTE/markets/kraken/btcusd"},
            {"id":2,"exchange":"bitstamp","pair":"btceur","active":true,"route":"ROUTE/markets/bitstamp/btceur"},
            {"id":3,"exchange":"binance","pair":"btcusdt","active":true,"route":"ROUTE/markets/binance/btcusdt"},
            {"id":4,"exchange":"mtgox","pair":"btcusd","active":false,"route":"ROUTE/markets/mtgox/btcusd"}
        ]}},
        "allowance":{"cost":0.002,"remaining":9.9,"upgrade":"For unlimited API access"}}"#;

    fn provider(
        server: &mockito::Server,
        strictness: Strictness,
        reporter: Arc<RecordingReporter>,
    ) -> CryptowatchProvider {
        let config =
            TransportConfig::without_delays().with_header(CRYPTOWATCH_API_KEY_HEADER, "key");
        let transport = Transport::new("cryptowatch", config, reporter).unwrap();
        CryptowatchProvider::new(
            server.url(),
            strictness,
            Arc::new(transport),
            WindowRetrier::default(),
        )
    }

    async fn asset_mock(server: &mut mockito::Server, hits: usize) -> mockito::Mock {
        let body = BTC_ASSET.replace("ROUTE", &server.url());
        server
            .mock("GET", "/assets/btc")
            .match_header("x-cw-api-key", "key")
            .with_status(200)
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    fn usd_eur() -> Vec<String> {
        vec!["usd".to_string(), "eur".to_string()]
    }

    #[tokio::test]
    async fn markets_are_filtered_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let asset = asset_mock(&mut server, 1).await;
        let reporter = Arc::new(RecordingReporter::default());
        let provider = provider(&server, Strictness::Exact, reporter.clone());
        let coins = vec![CoinRef::new("btc")];

        let markets = provider.resolve_markets(&coins, &usd_eur(), &CancellationToken::new()).await;
        let venues: Vec<_> = markets.iter().filter_map(|m| m.venue.as_deref()).collect();
        assert_eq!(venues, vec!["kraken", "bitstamp"]);
        assert_eq!(markets[1].quote_currency, "eur");

        provider.resolve_markets(&coins, &usd_eur(), &CancellationToken::new()).await;
        asset.assert_async().await;
        assert_eq!(reporter.allowances.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_is_retried_the_same_day() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/assets/btc")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let asset = asset_mock(&mut server, 1).await;
        let provider = provider(&server, Strictness::Exact, Arc::new(RecordingReporter::default()));
        let coins = vec![CoinRef::new("btc")];
        let cancel = CancellationToken::new();

        let failed = provider.resolve_markets(&coins, &usd_eur(), &cancel).await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0]
            .resolution_error
            .as_deref()
            .is_some_and(|e| e.contains("429")));

        let markets = provider.resolve_markets(&coins, &usd_eur(), &cancel).await;
        assert!(markets.iter().all(Market::is_resolved));
        assert_eq!(markets.len(), 2);

        // Now cached for the day
        provider.resolve_markets(&coins, &usd_eur(), &cancel).await;
        limited.assert_async().await;
        asset.assert_async().await;
    }

    #[tokio::test]
    async fn lookups_are_cached_per_coin() {
        let mut server = mockito::Server::new_async().await;
        let btc = asset_mock(&mut server, 1).await;
        let eth = server
            .mock("GET", "/assets/eth")
            .with_status(200)
            .with_body(r#"{"result":{"id":77,"sid":"eth","markets":{}}}"#)
            .expect(1)
            .create_async()
            .await;
        let provider = provider(&server, Strictness::Exact, Arc::new(RecordingReporter::default()));
        let cancel = CancellationToken::new();

        provider
            .resolve_markets(&[CoinRef::new("btc")], &usd_eur(), &cancel)
            .await;
        let markets = provider
            .resolve_markets(&[CoinRef::new("eth"), CoinRef::new("btc")], &usd_eur(), &cancel)
            .await;

        assert_eq!(markets.len(), 3);
        assert_eq!(markets[0].resolution_error.as_deref(), Some("not data found"));
        btc.assert_async().await;
        eth.assert_async().await;
    }

    #[tokio::test]
    async fn loose_strictness_keeps_stable_coin_quotes() {
        let mut server = mockito::Server::new_async().await;
        asset_mock(&mut server, 1).await;
        let provider = provider(&server, Strictness::Loose, Arc::new(RecordingReporter::default()));

        let markets = provider
            .resolve_markets(
                &[CoinRef::new("btc")],
                &["usd".to_string()],
                &CancellationToken::new(),
            )
            .await;
        let pairs: Vec<_> = markets.iter().filter_map(|m| m.pair.as_deref()).collect();
        assert_eq!(pairs, vec!["btcusd", "btcusdt"]);
    }

    #[tokio::test]
    async fn asset_without_base_markets_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/assets/xyz")
            .with_status(200)
            .with_body(r#"{"result":{"id":9,"sid":"xyz","markets":{"quote":[]}}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/assets/nope")
            .with_status(404)
            .with_body(r#"{"error":"Asset not found"}"#)
            .create_async()
            .await;
        let provider = provider(&server, Strictness::Exact, Arc::new(RecordingReporter::default()));

        let markets = provider
            .resolve_markets(
                &[CoinRef::new("xyz"), CoinRef::new("nope")],
                &usd_eur(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].resolution_error.as_deref(), Some("not data found"));
        assert_eq!(markets[1].resolution_error.as_deref(), Some("Asset not found"));
    }

    #[tokio::test]
    async fn history_reads_hourly_candles() {
        let mut server = mockito::Server::new_async().await;
        asset_mock(&mut server, 1).await;
        let kraken = server
            .mock("GET", "/markets/kraken/btcusd/ohlc")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("after".into(), "1650000000".into()),
                Matcher::UrlEncoded("before".into(), "1650000000".into()),
                Matcher::UrlEncoded("periods".into(), "3600".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"result":{"3600":[[1650000000,40100.0,40200.0,40000.0,40150.0,12.5,501000.0]]}}"#)
            .create_async()
            .await;
        let bitstamp = server
            .mock("GET", "/markets/bitstamp/btceur/ohlc")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error":"Market not found"}"#)
            .create_async()
            .await;
        let reporter = Arc::new(RecordingReporter::default());
        let provider = provider(&server, Strictness::Exact, reporter.clone());

        let prices = provider
            .price_history(
                &[CoinRef::new("btc")],
                &usd_eur(),
                secs_to_utc(1_650_000_000),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].venue.as_deref(), Some("kraken"));
        assert_eq!(prices[0].price, 40100.0);
        assert_eq!(prices[0].volume, 12.5);
        assert_eq!(prices[1].error.as_deref(), Some("Market not found"));
        assert_eq!(*reporter.progress.lock().unwrap(), vec![(1, 2), (2, 2)]);
        kraken.assert_async().await;
        bitstamp.assert_async().await;
    }

    #[tokio::test]
    async fn current_prices_use_summary() {
        let mut server = mockito::Server::new_async().await;
        asset_mock(&mut server, 1).await;
        server
            .mock("GET", "/markets/kraken/btcusd/summary")
            .with_status(200)
            .with_body(r#"{"result":{"price":{"last":40321.5,"high":41000,"low":39000},"volume":1523.2},"allowance":{"remaining":9.8}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/markets/bitstamp/btceur/summary")
            .with_status(200)
            .with_body(r#"{"result":{"price":{"last":37000.0},"volume":88.0}}"#)
            .create_async()
            .await;
        let reporter = Arc::new(RecordingReporter::default());
        let provider = provider(&server, Strictness::Exact, reporter.clone());

        let prices = provider
            .price_current(&[CoinRef::new("btc")], &usd_eur(), &CancellationToken::new())
            .await;

        assert_eq!(prices[0].price, 40321.5);
        assert_eq!(prices[0].volume, 1523.2);
        assert_eq!(prices[1].currency, "eur");
        assert_eq!(reporter.allowances.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_matches_asset_catalog() {
        let mut server = mockito::Server::new_async().await;
        let assets = server
            .mock("GET", "/assets")
            .with_status(200)
            .with_body(
                r#"{"result":[
                    {"id":60,"sid":"btc","symbol":"btc","name":"Bitcoin","fiat":false,"route":"https://api.cryptowat.ch/assets/btc"},
                    {"id":61,"sid":"bch","symbol":"bch","name":"Bitcoin Cash","fiat":false,"route":"https://api.cryptowat.ch/assets/bch"},
                    {"id":62,"sid":"eth","symbol":"eth","name":"Ethereum","fiat":false,"route":"https://api.cryptowat.ch/assets/eth"}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let provider = provider(&server, Strictness::Exact, Arc::new(RecordingReporter::default()));

        let hits = provider.search("bitcoin", &CancellationToken::new()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].coin.site_id, "bch");
        assert_eq!(hits[1].route.as_deref(), Some("https://api.cryptowat.ch/assets/bch"));

        let hits = provider.search("ET", &CancellationToken::new()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assets.assert_async().await;
    }
}
