//! Error types for the price resolution engine

use crate::constants::NO_DATA_FOUND;
use thiserror::Error;

/// Errors that can occur while resolving a single price
///
/// None of these escape a batch: every failure is folded into an unresolved
/// [`PricePoint`](crate::types::PricePoint) carrying the error text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// Network or TLS failure after the transport's own retries
    #[error("{0}")]
    Transport(String),

    /// Provider answered with an explicit error
    #[error("{0}")]
    Provider(String),

    /// Provider answered with a body we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Window expansion exhausted its attempt budget
    #[error("{}", NO_DATA_FOUND)]
    NoDataFound,

    /// Coin reference could not be mapped to a venue market
    #[error("{0}")]
    MarketNotResolved(String),

    /// Caller cancelled the batch
    #[error("cancelled")]
    Cancelled,
}

impl PriceError {
    /// Creates a Transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a Provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Creates an InvalidResponse error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Creates a MarketNotResolved error
    pub fn market_not_resolved(msg: impl Into<String>) -> Self {
        Self::MarketNotResolved(msg.into())
    }
}

impl From<serde_json::Error> for PriceError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

/// Errors raised while building an engine from configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Website name outside the supported set
    #[error("Unknown website: {0}")]
    UnknownWebsite(String),

    /// Environment variable or field holds an unusable value
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    /// Creates an InvalidValue error
    pub fn invalid(key: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Errors of a [`CoinStore`](crate::store::CoinStore)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Website row missing from the `website` table
    #[error("Website not registered: {0}")]
    UnknownWebsite(String),

    /// Coin with the same site id and chain already stored for the website
    #[error("Coin already stored: {0}")]
    DuplicateCoin(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_texts_match_reported_strings() {
        assert_eq!(PriceError::NoDataFound.to_string(), "no data found");
        assert_eq!(
            PriceError::market_not_resolved("not data found").to_string(),
            "not data found"
        );
        assert_eq!(PriceError::provider("Market not found").to_string(), "Market not found");
        assert_eq!(PriceError::Cancelled.to_string(), "cancelled");
    }
}
