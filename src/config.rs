//! Engine configuration
//!
//! Defaults come from [`crate::constants`]; [`EngineConfig::from_env`]
//! overrides them from environment variables.

use crate::{
    constants::{
        ALCOR_API_URL_TEMPLATE, ALCOR_CHAINS, COINGECKO_API_URL, CRYPTOWATCH_API_KEY_HEADER,
        CRYPTOWATCH_API_URL, MAX_WINDOW_ATTEMPTS,
    },
    error::ConfigError,
    market::Strictness,
    transport::TransportConfig,
    types::Website,
};
use reqwest::Url;

/// Website used when `COIN_PRICE_WEBSITE` is not set
pub const DEFAULT_WEBSITE: Website = Website::CoinGecko;

/// Configuration of a [`PriceEngine`](crate::engine::PriceEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub website: Website,
    pub coingecko_url: String,
    /// Demo API key sent as query parameter
    pub coingecko_demo_key: Option<String>,
    pub cryptowatch_url: String,
    /// API key sent as `X-CW-API-Key` header
    pub cryptowatch_api_key: Option<String>,
    /// Alcor URL template, `?` stands for the chain
    pub alcor_url: String,
    pub alcor_chains: Vec<String>,
    /// Window-expansion queries per historical price
    pub max_attempts: u32,
    pub strictness: Strictness,
    /// Venues kept per pair on multi-venue websites, 0 keeps all
    pub max_markets_per_pair: usize,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            website: DEFAULT_WEBSITE,
            coingecko_url: COINGECKO_API_URL.to_string(),
            coingecko_demo_key: None,
            cryptowatch_url: CRYPTOWATCH_API_URL.to_string(),
            cryptowatch_api_key: None,
            alcor_url: ALCOR_API_URL_TEMPLATE.to_string(),
            alcor_chains: ALCOR_CHAINS.iter().map(|c| c.to_string()).collect(),
            max_attempts: MAX_WINDOW_ATTEMPTS,
            strictness: Strictness::default(),
            max_markets_per_pair: 0,
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration for `website` with all other values at their defaults
    pub fn for_website(website: Website) -> Self {
        Self {
            website,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Recognized variables: `COIN_PRICE_WEBSITE`, `COINGECKO_URL`,
    /// `COINGECKO_API_DEMO`, `CRYPTOWATCH_URL`, `CRYPTOWATCH_API_KEY`,
    /// `ALCOR_URL`, `ALCOR_CHAINS` (comma or semicolon separated),
    /// `PRICE_MAX_ATTEMPTS`, `CRYPTOWATCH_STRICTNESS` and
    /// `MAX_MARKETS_PER_PAIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(website) = var("COIN_PRICE_WEBSITE") {
            config.website = website.parse()?;
        }
        if let Some(url) = var("COINGECKO_URL") {
            config.coingecko_url = url;
        }
        config.coingecko_demo_key = var("COINGECKO_API_DEMO");
        if let Some(url) = var("CRYPTOWATCH_URL") {
            config.cryptowatch_url = url;
        }
        config.cryptowatch_api_key = var("CRYPTOWATCH_API_KEY");
        if let Some(url) = var("ALCOR_URL") {
            config.alcor_url = url;
        }
        if let Some(chains) = var("ALCOR_CHAINS") {
            config.alcor_chains = split_list(&chains);
        }
        if let Some(attempts) = var("PRICE_MAX_ATTEMPTS") {
            config.max_attempts = attempts
                .parse()
                .map_err(|_| ConfigError::invalid("PRICE_MAX_ATTEMPTS", attempts))?;
        }
        if let Some(strictness) = var("CRYPTOWATCH_STRICTNESS") {
            config.strictness = strictness.parse()?;
        }
        if let Some(max) = var("MAX_MARKETS_PER_PAIR") {
            config.max_markets_per_pair = max
                .parse()
                .map_err(|_| ConfigError::invalid("MAX_MARKETS_PER_PAIR", max))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values an engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "0"));
        }
        for (key, url) in [
            ("coingecko_url", &self.coingecko_url),
            ("cryptowatch_url", &self.cryptowatch_url),
        ] {
            Url::parse(url).map_err(|_| ConfigError::invalid(key, url.clone()))?;
        }
        if !self.alcor_url.contains('?') {
            return Err(ConfigError::invalid("alcor_url", self.alcor_url.clone()));
        }
        if self.alcor_chains.is_empty() {
            return Err(ConfigError::invalid("alcor_chains", ""));
        }
        Ok(())
    }

    /// Transport configuration for `website`, including its static headers
    pub fn transport_for(&self, website: Website) -> TransportConfig {
        match (website, &self.cryptowatch_api_key) {
            (Website::Cryptowatch, Some(key)) => self
                .transport
                .clone()
                .with_header(CRYPTOWATCH_API_KEY_HEADER, key.clone()),
            _ => self.transport.clone(),
        }
    }
}

/// Split a `,` or `;` separated list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.website, Website::CoinGecko);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.alcor_chains, vec!["eos", "telos", "wax", "proton"]);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("COIN_PRICE_WEBSITE", "Cryptowatch"),
            ("CRYPTOWATCH_API_KEY", "secret"),
            ("ALCOR_CHAINS", "wax; proton"),
            ("PRICE_MAX_ATTEMPTS", "4"),
            ("CRYPTOWATCH_STRICTNESS", "1"),
            ("MAX_MARKETS_PER_PAIR", "3"),
        ]))
        .unwrap();

        assert_eq!(config.website, Website::Cryptowatch);
        assert_eq!(config.alcor_chains, vec!["wax", "proton"]);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.strictness, Strictness::Loose);
        assert_eq!(config.max_markets_per_pair, 3);

        let transport = config.transport_for(Website::Cryptowatch);
        assert_eq!(transport.headers, vec![("X-CW-API-Key".to_string(), "secret".to_string())]);
        assert!(config.transport_for(Website::CoinGecko).headers.is_empty());
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = EngineConfig::from_lookup(
            lookup(&[("COINGECKO_API_DEMO", "  "), ("COINGECKO_URL", "")]),
        )
        .unwrap();
        assert_eq!(config.coingecko_demo_key, None);
        assert_eq!(config.coingecko_url, COINGECKO_API_URL);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("COIN_PRICE_WEBSITE", "binance")])),
            Err(ConfigError::UnknownWebsite(_))
        ));
        assert!(EngineConfig::from_lookup(lookup(&[("PRICE_MAX_ATTEMPTS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("PRICE_MAX_ATTEMPTS", "many")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("CRYPTOWATCH_STRICTNESS", "5")])).is_err());
        let bad_alcor_url = lookup(&[("ALCOR_URL", "https://alcor.exchange/api")]);
        assert!(EngineConfig::from_lookup(bad_alcor_url).is_err());
    }
}
