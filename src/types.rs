//! Types for the price resolution engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, PriceError};

/// Supported price websites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Website {
    /// Alcor decentralized exchange
    Alcor,
    /// CoinGecko market aggregator
    CoinGecko,
    /// Cryptowatch ticker aggregator
    Cryptowatch,
}

impl Website {
    /// Name used in the `website` table and in export file names
    pub fn name(&self) -> &'static str {
        match self {
            Website::Alcor => "alcor",
            Website::CoinGecko => "coingecko",
            Website::Cryptowatch => "cryptowatch",
        }
    }

    /// Get all supported websites
    pub fn all() -> &'static [Website] {
        &[Website::Alcor, Website::CoinGecko, Website::Cryptowatch]
    }
}

impl fmt::Display for Website {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Website {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Website::all()
            .iter()
            .copied()
            .find(|w| w.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownWebsite(s.to_string()))
    }
}

/// Reference to a coin as stored for one website
///
/// `site_id` is the provider identifier: a CoinGecko id, a contract address,
/// an Alcor market id or a Cryptowatch asset sid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinRef {
    pub site_id: String,
    pub name: String,
    pub symbol: String,
    pub chain: Option<String>,
    pub base: Option<String>,
}

impl CoinRef {
    /// Create a coin reference, name and symbol default to the site id
    pub fn new(site_id: impl Into<String>) -> Self {
        let site_id = site_id.into();
        Self {
            name: site_id.clone(),
            symbol: site_id.clone(),
            site_id,
            chain: None,
            base: None,
        }
    }

    /// Set the display name, an empty name keeps the site id
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Set the chain; `""` and `"none"` mean the coin is not a token
    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        let chain = chain.into();
        self.chain = match chain.trim() {
            "" => None,
            c if c.eq_ignore_ascii_case("none") => None,
            c => Some(c.to_string()),
        };
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.base = (!base.is_empty()).then_some(base);
        self
    }
}

/// A provider-specific tradable market for a coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub coin: CoinRef,
    pub quote_currency: String,
    /// Exchange name for multi-venue providers
    pub venue: Option<String>,
    pub pair: Option<String>,
    /// URL of the time-series endpoint for this market
    pub route: String,
    pub active: bool,
    pub resolution_error: Option<String>,
}

impl Market {
    /// Create a resolved market
    pub fn new(coin: CoinRef, quote_currency: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            coin,
            quote_currency: quote_currency.into(),
            venue: None,
            pair: None,
            route: route.into(),
            active: true,
            resolution_error: None,
        }
    }

    /// Create a market that failed to resolve
    pub fn unresolved(
        coin: CoinRef,
        quote_currency: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            coin,
            quote_currency: quote_currency.into(),
            venue: None,
            pair: None,
            route: String::new(),
            active: false,
            resolution_error: Some(error.into()),
        }
    }

    pub fn with_venue(mut self, venue: impl Into<String>, pair: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self.pair = Some(pair.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution_error.is_none()
    }
}

/// One raw price sample, timestamp already normalized to seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_secs: i64,
    pub open: f64,
    pub volume: f64,
}

impl Sample {
    pub fn new(timestamp_secs: i64, open: f64, volume: f64) -> Self {
        Self {
            timestamp_secs,
            open,
            volume,
        }
    }
}

/// Resolved (or failed) price of a coin in one currency
///
/// When `error` is set, `price` and `volume` are NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub coin: CoinRef,
    pub currency: String,
    pub venue: Option<String>,
    pub price: f64,
    pub volume: f64,
    pub active: bool,
    pub error: Option<String>,
}

impl PricePoint {
    /// Create a resolved price point
    pub fn resolved(
        timestamp: DateTime<Utc>,
        coin: CoinRef,
        currency: impl Into<String>,
        price: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            coin,
            currency: currency.into(),
            venue: None,
            price,
            volume,
            active: true,
            error: None,
        }
    }

    /// Create an unresolved price point with NaN price and volume
    pub fn unresolved(
        timestamp: DateTime<Utc>,
        coin: CoinRef,
        currency: impl Into<String>,
        error: &PriceError,
    ) -> Self {
        Self {
            timestamp,
            coin,
            currency: currency.into(),
            venue: None,
            price: f64::NAN,
            volume: f64::NAN,
            active: true,
            error: Some(error.to_string()),
        }
    }

    /// Price point for a market, copying its venue and active flag
    pub fn for_market(
        market: &Market,
        timestamp: DateTime<Utc>,
        result: Result<(f64, f64), PriceError>,
    ) -> Self {
        let point = match result {
            Ok((price, volume)) => Self::resolved(
                timestamp,
                market.coin.clone(),
                market.quote_currency.clone(),
                price,
                volume,
            ),
            Err(e) => Self::unresolved(
                timestamp,
                market.coin.clone(),
                market.quote_currency.clone(),
                &e,
            ),
        };
        Self {
            venue: market.venue.clone(),
            active: market.active,
            ..point
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.error.is_none()
    }
}

/// One hit of a coin search on a website catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSearchHit {
    pub coin: CoinRef,
    /// Base token for Alcor markets
    pub base: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub volume: Option<f64>,
    pub change: Option<f64>,
    pub route: Option<String>,
    pub image_thumb: Option<String>,
    pub image_large: Option<String>,
}

impl CoinSearchHit {
    pub fn new(coin: CoinRef) -> Self {
        Self {
            coin,
            base: None,
            market_cap_rank: None,
            volume: None,
            change: None,
            route: None,
            image_thumb: None,
            image_large: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_name_defaults_to_site_id() {
        let coin = CoinRef::new("bitcoin").with_name("");
        assert_eq!(coin.name, "bitcoin");
        assert_eq!(CoinRef::new("bitcoin").with_name("Bitcoin").name, "Bitcoin");
    }

    #[test]
    fn none_chain_means_no_chain() {
        assert_eq!(CoinRef::new("x").with_chain("none").chain, None);
        assert_eq!(CoinRef::new("x").with_chain("").chain, None);
        assert_eq!(
            CoinRef::new("x").with_chain("ethereum").chain.as_deref(),
            Some("ethereum")
        );
    }

    #[test]
    fn unresolved_point_carries_nan() {
        let point = PricePoint::unresolved(
            Utc::now(),
            CoinRef::new("bitcoin"),
            "usd",
            &PriceError::NoDataFound,
        );
        assert!(point.price.is_nan());
        assert!(point.volume.is_nan());
        assert_eq!(point.error.as_deref(), Some("no data found"));
    }

    #[test]
    fn website_parses_case_insensitively() {
        assert_eq!("CoinGecko".parse::<Website>().unwrap(), Website::CoinGecko);
        assert_eq!(" alcor ".parse::<Website>().unwrap(), Website::Alcor);
        assert!("binance".parse::<Website>().is_err());
    }
}
