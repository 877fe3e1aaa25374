//! CoinGecko price provider implementation

use crate::{
    catalog::{scope_of, CatalogCache},
    constants::COINGECKO_DEMO_KEY_PARAM,
    error::PriceError,
    market::{field_matches, MatchMode},
    metrics::TransportMetrics,
    provider::PriceProvider,
    timestamp::{secs_to_utc, TimeUnit},
    transport::{QueryParams, Transport},
    types::{CoinRef, CoinSearchHit, Market, PricePoint, Sample, Website},
    window::{RangeSource, WindowRetrier},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry of `/simple/price` and `/simple/token_price/{chain}`
#[derive(Debug, Deserialize)]
struct SimplePrice {
    last_updated_at: Option<i64>,
    /// `{currency}` and `{currency}_24h_vol` values
    #[serde(flatten)]
    quotes: HashMap<String, Option<f64>>,
}

/// Response of `/coins/.../market_chart/range`
#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

/// Response of `/coins/{id}/history`
#[derive(Debug, Deserialize)]
struct CoinHistory {
    market_data: Option<HistoryMarketData>,
}

#[derive(Debug, Deserialize)]
struct HistoryMarketData {
    #[serde(default)]
    current_price: HashMap<String, f64>,
    #[serde(default)]
    total_volume: HashMap<String, f64>,
}

/// Entry of `/coins/list?include_platform=true`
#[derive(Debug, Clone, Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CoinList {
    result: Vec<CoinListEntry>,
}

#[derive(Debug, Deserialize)]
struct WebSearch {
    #[serde(default)]
    coins: Vec<WebSearchCoin>,
}

#[derive(Debug, Deserialize)]
struct WebSearchCoin {
    id: String,
    name: String,
    symbol: String,
    market_cap_rank: Option<u32>,
    thumb: Option<String>,
    large: Option<String>,
}

/// CoinGecko price provider
pub struct CoinGeckoProvider {
    base_url: String,
    demo_key: Option<String>,
    transport: Arc<Transport>,
    retrier: WindowRetrier,
    coin_list: CatalogCache<Vec<CoinListEntry>>,
}

impl CoinGeckoProvider {
    /// Creates a new CoinGecko provider
    pub fn new(
        base_url: impl Into<String>,
        demo_key: Option<String>,
        transport: Arc<Transport>,
        retrier: WindowRetrier,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            demo_key: demo_key.filter(|k| !k.is_empty()),
            transport,
            retrier,
            coin_list: CatalogCache::new(),
        }
    }

    /// Parameters every request starts from
    fn params(&self) -> QueryParams {
        match &self.demo_key {
            Some(key) => QueryParams::new().with(COINGECKO_DEMO_KEY_PARAM, key.as_str()),
            None => QueryParams::new(),
        }
    }

    /// Time-series route of a coin, or of a token contract when the coin has a chain
    pub fn range_route(&self, coin: &CoinRef) -> String {
        match &coin.chain {
            Some(chain) => format!(
                "{}/coins/{}/contract/{}/market_chart/range",
                self.base_url, chain, coin.site_id
            ),
            None => format!("{}/coins/{}/market_chart/range", self.base_url, coin.site_id),
        }
    }

    /// Fetches one simple price request and turns it into points, coins x currencies
    async fn simple_prices(
        &self,
        url: String,
        params: QueryParams,
        coins: &[&CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let now = Utc::now();
        let response: Result<HashMap<String, SimplePrice>, PriceError> =
            self.transport.get_json(&url, &params, cancel).await;

        let mut prices = Vec::with_capacity(coins.len() * currencies.len());
        for coin in coins {
            let entry = response.as_ref().map(|body| {
                body.iter()
                    .find(|(id, _)| id.eq_ignore_ascii_case(&coin.site_id))
                    .map(|(_, entry)| entry)
            });
            for currency in currencies {
                let point = match &entry {
                    Err(e) => PricePoint::unresolved(now, (*coin).clone(), currency.clone(), e),
                    Ok(Some(entry)) => match entry
                        .quotes
                        .get(currency.as_str())
                        .copied()
                        .flatten()
                    {
                        Some(price) => {
                            let volume = entry
                                .quotes
                                .get(&format!("{}_24h_vol", currency))
                                .copied()
                                .flatten()
                                .unwrap_or(f64::NAN);
                            let at = entry.last_updated_at.map(secs_to_utc).unwrap_or(now);
                            PricePoint::resolved(
                                at,
                                (*coin).clone(),
                                currency.clone(),
                                price,
                                volume,
                            )
                        }
                        None => PricePoint::unresolved(
                            now,
                            (*coin).clone(),
                            currency.clone(),
                            &PriceError::NoDataFound,
                        ),
                    },
                    Ok(None) => PricePoint::unresolved(
                        now,
                        (*coin).clone(),
                        currency.clone(),
                        &PriceError::NoDataFound,
                    ),
                };
                prices.push(point);
            }
        }
        prices
    }

    /// Daily snapshot prices from `/coins/{id}/history`
    ///
    /// CoinGecko answers with the snapshot of the UTC day of `at`; the points
    /// keep `at` as their timestamp.
    pub async fn price_history_daily(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let reporter = self.transport.reporter();
        let params = self
            .params()
            .with("date", at.format("%d-%m-%Y").to_string())
            .with("localization", false);

        let mut prices = Vec::with_capacity(coins.len() * currencies.len());
        for (index, coin) in coins.iter().enumerate() {
            if cancel.is_cancelled() {
                prices.extend(currencies.iter().map(|c| {
                    PricePoint::unresolved(at, coin.clone(), c.clone(), &PriceError::Cancelled)
                }));
                continue;
            }
            reporter.progress(index + 1, coins.len());

            let url = format!("{}/coins/{}/history", self.base_url, coin.site_id);
            let history: Result<CoinHistory, PriceError> =
                self.transport.get_json(&url, &params, cancel).await;
            for currency in currencies {
                let point = match &history {
                    Err(e) => PricePoint::unresolved(at, coin.clone(), currency.clone(), e),
                    Ok(history) => match history
                        .market_data
                        .as_ref()
                        .and_then(|data| Some((data.current_price.get(currency)?, data)))
                    {
                        Some((price, data)) => {
                            let volume =
                                data.total_volume.get(currency).copied().unwrap_or(f64::NAN);
                            PricePoint::resolved(at, coin.clone(), currency.clone(), *price, volume)
                        }
                        None => PricePoint::unresolved(
                            at,
                            coin.clone(),
                            currency.clone(),
                            &PriceError::NoDataFound,
                        ),
                    },
                };
                prices.push(point);
            }
        }
        prices
    }

    /// Search through CoinGecko's own search endpoint
    pub async fn search_web(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSearchHit>, PriceError> {
        let url = format!("{}/search", self.base_url);
        let params = self.params().with("query", query);
        let found: WebSearch = self.transport.get_json(&url, &params, cancel).await?;

        Ok(found
            .coins
            .into_iter()
            .map(|c| {
                let mut hit = CoinSearchHit::new(
                    CoinRef::new(c.id).with_name(c.name).with_symbol(c.symbol),
                );
                hit.market_cap_rank = c.market_cap_rank;
                hit.image_thumb = c.thumb;
                hit.image_large = c.large;
                hit
            })
            .collect())
    }

    /// Drop the cached coin list
    pub async fn invalidate_catalog(&self) {
        self.coin_list.invalidate().await;
    }
}

#[async_trait]
impl RangeSource for CoinGeckoProvider {
    async fn fetch_range(
        &self,
        market: &Market,
        from: i64,
        to: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sample>, PriceError> {
        let params = self
            .params()
            .with("vs_currency", market.quote_currency.as_str())
            .with("from", from)
            .with("to", to);
        let chart: MarketChart = self.transport.get_json(&market.route, &params, cancel).await?;

        Ok(chart
            .prices
            .iter()
            .enumerate()
            .map(|(i, (ts_ms, price))| {
                let volume = chart.total_volumes.get(i).map(|(_, v)| *v).unwrap_or(f64::NAN);
                Sample::new(TimeUnit::Milliseconds.float_to_secs(*ts_ms), *price, volume)
            })
            .collect())
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    fn website(&self) -> Website {
        Website::CoinGecko
    }

    async fn resolve_markets(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        _cancel: &CancellationToken,
    ) -> Vec<Market> {
        coins
            .iter()
            .flat_map(|coin| {
                let route = self.range_route(coin);
                currencies
                    .iter()
                    .map(move |currency| Market::new(coin.clone(), currency.clone(), route.clone()))
            })
            .collect()
    }

    async fn price_current(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let quote_params = self
            .params()
            .with("vs_currencies", currencies.join(","))
            .with("include_24hr_vol", true)
            .with("include_last_updated_at", true);

        // Plain coins in one request, tokens in one request per chain
        let mut groups: BTreeMap<Option<&str>, Vec<&CoinRef>> = BTreeMap::new();
        for coin in coins {
            groups.entry(coin.chain.as_deref()).or_default().push(coin);
        }

        let mut by_coin: HashMap<(Option<&str>, &str), Vec<PricePoint>> = HashMap::new();
        for (chain, group) in &groups {
            let ids = group.iter().map(|c| c.site_id.as_str()).collect::<Vec<_>>().join(",");
            let (url, params) = match chain {
                None => (
                    format!("{}/simple/price", self.base_url),
                    quote_params.clone().with("ids", ids),
                ),
                Some(chain) => (
                    format!("{}/simple/token_price/{}", self.base_url, chain),
                    quote_params.clone().with("contract_addresses", ids),
                ),
            };
            tracing::debug!(
                chain = chain.unwrap_or("none"),
                coins = group.len(),
                "Fetching CoinGecko prices"
            );

            let points = self.simple_prices(url, params, group, currencies, cancel).await;
            for (coin, chunk) in group.iter().zip(points.chunks(currencies.len().max(1))) {
                by_coin
                    .entry((*chain, coin.site_id.as_str()))
                    .or_default()
                    .extend(chunk.iter().cloned());
            }
        }

        // Keep the caller's coin order
        coins
            .iter()
            .flat_map(|coin| {
                by_coin
                    .remove(&(coin.chain.as_deref(), coin.site_id.as_str()))
                    .unwrap_or_default()
            })
            .collect()
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

    async fn daily_history(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<Vec<PricePoint>> {
        Some(self.price_history_daily(coins, currencies, at, cancel).await)
    }

    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSearchHit>, PriceError> {
        let url = format!("{}/coins/list", self.base_url);
        let catalog = self
            .coin_list
            .get_or_load(scope_of(&url), || async {
                self.transport.reporter().progress_text("Loading CoinGecko coin list");
                let params = self.params().with("include_platform", true);
                let list: CoinList = self.transport.get_json(&url, &params, cancel).await?;
                Ok(list.result)
            })
            .await?;

        let hits: Vec<CoinSearchHit> = catalog
            .entries
            .iter()
            .filter(|c| {
                field_matches(query, &c.id, MatchMode::Prefix)
                    || field_matches(query, &c.name, MatchMode::Prefix)
                    || field_matches(query, &c.symbol, MatchMode::Prefix)
            })
            .map(|c| {
                CoinSearchHit::new(
                    CoinRef::new(c.id.clone())
                        .with_name(c.name.clone())
                        .with_symbol(c.symbol.clone()),
                )
            })
            .collect();

        tracing::debug!(query, hits = hits.len(), "CoinGecko search");
        Ok(hits)
    }

    async fn metrics(&self) -> TransportMetrics {
        self.transport.metrics().await
    }
}
