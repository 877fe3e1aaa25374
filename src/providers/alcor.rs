//! Alcor price provider implementation
//!
//! Alcor runs one API per chain. Coins are stored by market id; the full
//! market list of each chain is cached for the day and used both to resolve
//! ids and to search.

use crate::{
    catalog::{scope_of, AssetCatalog, CatalogCache},
    constants::{ALCOR_CHART_RESOLUTION, MARKET_NOT_FOUND},
    error::PriceError,
    market::{field_matches, MatchMode},
    metrics::TransportMetrics,
    provider::PriceProvider,
    timestamp::TimeUnit,
    transport::{QueryParams, Transport},
    types::{CoinRef, CoinSearchHit, Market, PricePoint, Sample, Website},
    window::{RangeSource, WindowRetrier},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
struct AlcorSymbol {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AlcorToken {
    symbol: AlcorSymbol,
    /// Token identifier, `SYMBOL@contract`
    #[serde(rename = "str")]
    id: String,
}

/// One market from `GET /markets`
#[derive(Debug, Clone, Deserialize)]
struct AlcorMarket {
    id: u64,
    base_token: AlcorToken,
    quote_token: AlcorToken,
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    volume24: f64,
    #[serde(default, rename = "volumeWeek")]
    volume_week: f64,
    #[serde(default, rename = "changeWeek")]
    change_week: f64,
    #[serde(default)]
    frozen: bool,
}

#[derive(Debug, Deserialize)]
struct MarketList {
    result: Vec<AlcorMarket>,
}

/// Chart candle, either keyed or as a positional row
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AlcorCandle {
    Keyed { time: f64, open: f64, volume: f64 },
    Row(Vec<f64>),
}

impl AlcorCandle {
    fn to_sample(&self) -> Option<Sample> {
        let (time, open, volume) = match self {
            AlcorCandle::Keyed { time, open, volume } => (*time, *open, *volume),
            AlcorCandle::Row(row) if row.len() >= 6 => (row[0], row[1], row[5]),
            AlcorCandle::Row(_) => return None,
        };
        Some(Sample::new(TimeUnit::Milliseconds.float_to_secs(time), open, volume))
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    #[serde(default)]
    result: Vec<AlcorCandle>,
}

/// Alcor price provider
pub struct AlcorProvider {
    url_template: String,
    chains: Vec<String>,
    transport: Arc<Transport>,
    retrier: WindowRetrier,
    catalog: CatalogCache<Vec<AlcorMarket>>,
}

impl AlcorProvider {
    /// Creates a new Alcor provider
    ///
    /// `url_template` holds a `?` that is replaced by the chain name.
    pub fn new(
        url_template: impl Into<String>,
        chains: Vec<String>,
        transport: Arc<Transport>,
        retrier: WindowRetrier,
    ) -> Self {
        Self {
            url_template: url_template.into(),
            chains,
            transport,
            retrier,
            catalog: CatalogCache::new(),
        }
    }

    /// Base API URL of `chain`
    pub fn chain_url(&self, chain: &str) -> String {
        self.url_template.replace('?', chain)
    }

    /// Drop the cached market lists
    pub async fn invalidate_catalog(&self) {
        self.catalog.invalidate().await;
    }

    async fn fetch_markets(
        &self,
        chain: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<AlcorMarket>, PriceError> {
        let url = format!("{}/markets", self.chain_url(chain));
        let list: MarketList = self.transport.get_json(&url, &QueryParams::new(), cancel).await?;
        Ok(list.result)
    }

    /// Market list of `chain`, loaded once a day
    async fn markets_on(
        &self,
        chain: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<AssetCatalog<Vec<AlcorMarket>>>, PriceError> {
        self.catalog
            .get_or_load(scope_of(chain), || async {
                self.transport
                    .reporter()
                    .progress_text(&format!("Loading Alcor markets on {}", chain));
                self.fetch_markets(chain, cancel).await
            })
            .await
    }

    fn market_for(&self, coin: &CoinRef, chain: &str, found: &AlcorMarket) -> Market {
        let coin = coin
            .clone()
            .with_name(found.quote_token.id.clone())
            .with_symbol(found.quote_token.symbol.name.clone())
            .with_chain(chain);
        let route = format!("{}/markets/{}/charts", self.chain_url(chain), found.id);
        Market::new(coin, found.base_token.id.clone(), route).with_active(!found.frozen)
    }
}

#[async_trait]
impl RangeSource for AlcorProvider {
    async fn fetch_range(
        &self,
        market: &Market,
        from: i64,
        to: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sample>, PriceError> {
        let params = QueryParams::new()
            .with("resolution", ALCOR_CHART_RESOLUTION)
            .with("from", from)
            .with("to", to);
        let chart: ChartResponse = self.transport.get_json(&market.route, &params, cancel).await?;
        Ok(chart.result.iter().filter_map(AlcorCandle::to_sample).collect())
    }
}

#[async_trait]
impl PriceProvider for AlcorProvider {
    fn website(&self) -> Website {
        Website::Alcor
    }

    async fn resolve_markets(
        &self,
        coins: &[CoinRef],
        _currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<Market> {
        let mut by_chain: HashMap<&str, Result<Arc<AssetCatalog<Vec<AlcorMarket>>>, PriceError>> =
            HashMap::new();
        for chain in coins.iter().filter_map(|c| c.chain.as_deref()) {
            if !by_chain.contains_key(chain) {
                let loaded = self.markets_on(chain, cancel).await;
                if let Err(e) = &loaded {
                    tracing::warn!(chain, error = %e, "Failed to load Alcor markets");
                }
                by_chain.insert(chain, loaded);
            }
        }

        coins
            .iter()
            .map(|coin| {
                let Some(chain) = coin.chain.as_deref() else {
                    return Market::unresolved(coin.clone(), "", MARKET_NOT_FOUND);
                };
                let catalog = match &by_chain[chain] {
                    Ok(catalog) => catalog,
                    Err(e) => return Market::unresolved(coin.clone(), "", e.to_string()),
                };
                match catalog.entries.iter().find(|m| m.id.to_string() == coin.site_id) {
                    Some(found) => self.market_for(coin, chain, found),
                    None => {
                        tracing::debug!(site_id = %coin.site_id, chain, "Alcor market not found");
                        Market::unresolved(coin.clone(), "", MARKET_NOT_FOUND)
                    }
                }
            })
            .collect()
    }

    async fn price_current(
        &self,
        coins: &[CoinRef],
        _currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let now = Utc::now();
        let mut by_chain: HashMap<&str, Result<Vec<AlcorMarket>, PriceError>> = HashMap::new();
        let mut prices = Vec::with_capacity(coins.len());

        for coin in coins {
            let Some(chain) = coin.chain.as_deref() else {
                prices.push(PricePoint::unresolved(
                    now,
                    coin.clone(),
                    "",
                    &PriceError::market_not_resolved(MARKET_NOT_FOUND),
                ));
                continue;
            };
            if !by_chain.contains_key(chain) {
                // Current prices always come from a fresh market list
                let markets = self.fetch_markets(chain, cancel).await;
                by_chain.insert(chain, markets);
            }

            let point = match &by_chain[chain] {
                Ok(markets) => match markets.iter().find(|m| m.id.to_string() == coin.site_id) {
                    Some(found) => {
                        let market = self.market_for(coin, chain, found);
                        PricePoint::for_market(&market, now, Ok((found.last_price, found.volume24)))
                    }
                    None => PricePoint::unresolved(
                        now,
                        coin.clone(),
                        "",
                        &PriceError::market_not_resolved(MARKET_NOT_FOUND),
                    ),
                },
                Err(e) => PricePoint::unresolved(now, coin.clone(), "", e),
            };
            prices.push(point);
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
        let mut hits = Vec::new();
        for chain in &self.chains {
            let catalog = self.markets_on(chain, cancel).await?;
            let markets = &catalog.entries;
            for market in markets {
                let matched =
                    field_matches(query, &market.base_token.symbol.name, MatchMode::Prefix)
                        || field_matches(query, &market.base_token.id, MatchMode::Substring)
                        || field_matches(query, &market.quote_token.symbol.name, MatchMode::Prefix)
                        || field_matches(query, &market.quote_token.id, MatchMode::Substring);
                if !matched {
                    continue;
                }
                let coin = CoinRef::new(market.id.to_string())
                    .with_name(market.quote_token.id.clone())
                    .with_symbol(market.quote_token.symbol.name.clone())
                    .with_chain(chain.clone())
                    .with_base(market.base_token.id.clone());
                let mut hit = CoinSearchHit::new(coin);
                hit.base = Some(market.base_token.symbol.name.clone());
                hit.volume = Some(market.volume_week);
                hit.change = Some(market.change_week);
                hits.push(hit);
            }
        }

        tracing::debug!(query, hits = hits.len(), "Alcor search");
        Ok(hits)
    }

    async fn metrics(&self) -> TransportMetrics {
        self.transport.metrics().await
    }
}
