//! Window-expansion retrier
//!
//! Providers often return nothing for a narrow time range around an old
//! instant. The retrier asks a [`RangeSource`] for `[target, target]` first
//! and widens both bounds by `4^attempt * unit` after every empty answer,
//! until samples arrive, the provider fails, or the attempt budget runs out.

use crate::{
    constants::{MAX_WINDOW_ATTEMPTS, WINDOW_UNIT_SECS},
    error::PriceError,
    reporter::Reporter,
    select::select_nearest,
    timestamp::secs_to_utc,
    types::{Market, PricePoint, Sample},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Capability a provider implements to take part in window expansion
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Samples of `market` between `from` and `to` (unix seconds, inclusive)
    ///
    /// Sample timestamps must already be normalized to seconds.
    async fn fetch_range(
        &self,
        market: &Market,
        from: i64,
        to: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sample>, PriceError>;

    /// Base unit of the window expansion in seconds
    fn unit_secs(&self) -> i64 {
        WINDOW_UNIT_SECS
    }
}

/// Per-query state of the window expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempt: u32,
    pub max_attempts: u32,
    pub window_from: i64,
    pub window_to: i64,
    pub unit_secs: i64,
}

impl RetryBudget {
    pub fn new(target_secs: i64, max_attempts: u32, unit_secs: i64) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            window_from: target_secs,
            window_to: target_secs,
            unit_secs,
        }
    }

    /// Whether another query may be issued
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Distance both bounds move when widening to `attempt`
    pub fn step(attempt: u32, unit_secs: i64) -> i64 {
        4_i64.saturating_pow(attempt).saturating_mul(unit_secs)
    }

    /// Count a failed attempt and widen the window if budget remains
    ///
    /// Returns `false` once the budget is exhausted; the window is then left
    /// untouched and `attempt == max_attempts`.
    pub fn widen(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return false;
        }
        let step = Self::step(self.attempt, self.unit_secs);
        self.window_from = self.window_from.saturating_sub(step);
        self.window_to = self.window_to.saturating_add(step);
        true
    }
}

/// Window-expansion retrier
#[derive(Debug, Clone, Copy)]
pub struct WindowRetrier {
    max_attempts: u32,
}

impl Default for WindowRetrier {
    fn default() -> Self {
        Self::new(MAX_WINDOW_ATTEMPTS)
    }
}

impl WindowRetrier {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Find the sample of `market` nearest to `target_secs`
    pub async fn find_sample<S: RangeSource + ?Sized>(
        &self,
        source: &S,
        market: &Market,
        target_secs: i64,
        cancel: &CancellationToken,
    ) -> Result<Sample, PriceError> {
        let mut budget = RetryBudget::new(target_secs, self.max_attempts, source.unit_secs());

        while budget.has_attempts_left() {
            let samples = match source
                .fetch_range(market, budget.window_from, budget.window_to, cancel)
                .await
            {
                Ok(samples) => samples,
                Err(_) if cancel.is_cancelled() => return Err(PriceError::Cancelled),
                Err(e) => {
                    tracing::debug!(
                        route = %market.route,
                        attempt = budget.attempt,
                        error = %e,
                        "Provider failed"
                    );
                    return Err(e);
                }
            };

            if let Some(sample) = select_nearest(&samples, target_secs) {
                tracing::debug!(
                    route = %market.route,
                    attempt = budget.attempt,
                    samples = samples.len(),
                    "Found samples"
                );
                return Ok(*sample);
            }

            tracing::debug!(
                route = %market.route,
                attempt = budget.attempt,
                from = budget.window_from,
                to = budget.window_to,
                "Empty window"
            );
            if !budget.widen() {
                break;
            }
        }

        Err(PriceError::NoDataFound)
    }

    /// Resolve one market into a price point; failures become NaN points
    pub async fn resolve<S: RangeSource + ?Sized>(
        &self,
        source: &S,
        market: &Market,
        target: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PricePoint {
        if let Some(error) = &market.resolution_error {
            return PricePoint::for_market(
                market,
                target,
                Err(PriceError::market_not_resolved(error.clone())),
            );
        }

        match self.find_sample(source, market, target.timestamp(), cancel).await {
            Ok(sample) => PricePoint::for_market(
                market,
                secs_to_utc(sample.timestamp_secs),
                Ok((sample.open, sample.volume)),
            ),
            Err(e) => PricePoint::for_market(market, target, Err(e)),
        }
    }

    /// Resolve every market in order, reporting progress before each one
    ///
    /// Always returns one price point per market; after cancellation the
    /// remaining markets are returned as cancelled without any request.
    pub async fn resolve_all<S: RangeSource + ?Sized>(
        &self,
        source: &S,
        markets: &[Market],
        target: DateTime<Utc>,
        reporter: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Vec<PricePoint> {
        let total = markets.len();
        let mut prices = Vec::with_capacity(total);

        for (index, market) in markets.iter().enumerate() {
            if cancel.is_cancelled() {
                prices.push(PricePoint::for_market(market, target, Err(PriceError::Cancelled)));
                continue;
            }

            reporter.progress(index + 1, total);
            let point = self.resolve(source, market, target, cancel).await;
            if let Some(error) = &point.error {
                tracing::warn!(
                    coin = %market.coin.site_id,
                    currency = %market.quote_currency,
                    venue = market.venue.as_deref().unwrap_or(""),
                    error = %error,
                    "Historical price not resolved"
                );
            }
            prices.push(point);
        }

        prices
    }
}
