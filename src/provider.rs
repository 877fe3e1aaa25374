//! Provider abstraction for resolving coin prices on external websites

use crate::{
    error::PriceError,
    metrics::TransportMetrics,
    types::{CoinRef, CoinSearchHit, Market, PricePoint, Website},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Trait for price websites
///
/// Batch operations never fail as a whole: every coin/currency (or market)
/// yields a [`PricePoint`], unresolved ones carry the error text.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Website served by this provider
    fn website(&self) -> Website;

    /// True when one coin/currency can trade on several venues
    fn is_multi_venue(&self) -> bool {
        false
    }

    /// Map coins to the markets this website can price
    ///
    /// Coins that cannot be mapped come back as markets carrying a
    /// `resolution_error`.
    async fn resolve_markets(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<Market>;

    /// Current prices
    async fn price_current(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        cancel: &CancellationToken,
    ) -> Vec<PricePoint>;

    /// Prices nearest to the historical instant `at`
    async fn price_history(
        &self,
        coins: &[CoinRef],
        currencies: &[String],
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<PricePoint>;

    /// Daily snapshot prices for the UTC day of `at`
    ///
    /// `None` when the website has no snapshot endpoint.
    async fn daily_history(
        &self,
        _coins: &[CoinRef],
        _currencies: &[String],
        _at: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Option<Vec<PricePoint>> {
        None
    }

    /// Search the website's asset catalog
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSearchHit>, PriceError>;

    /// Health of the underlying transport
    async fn metrics(&self) -> TransportMetrics;
}
