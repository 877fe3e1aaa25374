//! Market resolution helpers shared by the providers
//!
//! Pair filtering by strictness for multi-venue listings, and the
//! case-insensitive matching used to search cached catalogs.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How loosely a requested currency may match a pair's quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Quote equals a requested currency; falls back to all pairs if none does
    #[default]
    Exact,
    /// Quote is the currency with at most one extra character before and after
    Loose,
    /// Pair contains the currency anywhere
    VeryLoose,
}

impl Strictness {
    pub fn level(&self) -> u8 {
        match self {
            Strictness::Exact => 0,
            Strictness::Loose => 1,
            Strictness::VeryLoose => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Strictness::Exact),
            1 => Some(Strictness::Loose),
            2 => Some(Strictness::VeryLoose),
            _ => None,
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

impl FromStr for Strictness {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Strictness::from_level)
            .ok_or_else(|| ConfigError::invalid("strictness", s))
    }
}

/// A trading pair listed for a base asset on one exchange
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PairListing {
    pub exchange: String,
    pub pair: String,
    pub active: bool,
    pub route: String,
}

impl PairListing {
    /// Quote part of the pair for the given base symbol
    pub fn quote(&self, symbol: &str) -> String {
        quote_of(&self.pair, symbol)
    }
}

/// Quote part of `pair` once the base `symbol` is removed
pub fn quote_of(pair: &str, symbol: &str) -> String {
    let pair = pair.to_lowercase();
    let symbol = symbol.to_lowercase();
    if symbol.is_empty() {
        return pair;
    }
    match pair.strip_prefix(&symbol) {
        Some(rest) => rest.to_string(),
        None => pair.replace(&symbol, ""),
    }
}

/// Keep the listings of `symbol` that match `currencies` under `strictness`
///
/// Order of `listings` is preserved; a listing matching several currencies
/// appears once.
pub fn filter_pairs(
    listings: Vec<PairListing>,
    symbol: &str,
    currencies: &[String],
    strictness: Strictness,
) -> Vec<PairListing> {
    let currencies: Vec<String> = currencies.iter().map(|c| c.to_lowercase()).collect();

    match strictness {
        Strictness::Exact => {
            let exact: Vec<PairListing> = listings
                .iter()
                .filter(|l| currencies.contains(&l.quote(symbol)))
                .cloned()
                .collect();
            if exact.is_empty() {
                listings
            } else {
                exact
            }
        }
        Strictness::Loose => {
            let patterns: Vec<Regex> = currencies
                .iter()
                .filter_map(|c| loose_pattern(symbol, c))
                .collect();
            listings
                .into_iter()
                .filter(|l| {
                    let pair = l.pair.to_lowercase();
                    patterns.iter().any(|re| re.is_match(&pair))
                })
                .collect()
        }
        Strictness::VeryLoose => listings
            .into_iter()
            .filter(|l| {
                let pair = l.pair.to_lowercase();
                currencies.iter().any(|c| pair.contains(c.as_str()))
            })
            .collect(),
    }
}

fn loose_pattern(symbol: &str, currency: &str) -> Option<Regex> {
    let pattern = format!(
        r"^{}\w?{}\w?$",
        regex::escape(&symbol.to_lowercase()),
        regex::escape(currency)
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Skipping unusable pair pattern");
            None
        }
    }
}

/// How a catalog field is compared with a search string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Prefix,
    Substring,
}

/// Case-insensitive comparison of a search string with one catalog field
pub fn field_matches(query: &str, field: &str, mode: MatchMode) -> bool {
    let query = query.to_lowercase();
    let field = field.to_lowercase();
    match mode {
        MatchMode::Prefix => field.starts_with(&query),
        MatchMode::Substring => field.contains(&query),
    }
}

/// Remove duplicate listings keeping the first occurrence
pub fn dedup_listings(listings: Vec<PairListing>) -> Vec<PairListing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|l| seen.insert((l.exchange.clone(), l.pair.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(exchange: &str, pair: &str) -> PairListing {
        PairListing {
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            active: true,
            route: format!("https://api.test/markets/{}/{}", exchange, pair),
        }
    }

    fn currencies(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn pairs(listings: &[PairListing]) -> Vec<&str> {
        listings.iter().map(|l| l.pair.as_str()).collect()
    }

    #[test]
    fn exact_keeps_only_matching_quotes() {
        let listings = vec![
            listing("kraken", "btcusdt"),
            listing("kraken", "btceur"),
            listing("bitflyer", "btcjpy"),
        ];
        let kept = filter_pairs(listings, "btc", &currencies(&["usd", "eur"]), Strictness::Exact);
        assert_eq!(pairs(&kept), vec!["btceur"]);
    }

    #[test]
    fn exact_falls_back_to_all_when_nothing_matches() {
        let listings = vec![listing("a", "btcjpy"), listing("b", "btccny"), listing("c", "btcjpy")];
        let kept = filter_pairs(
            listings.clone(),
            "btc",
            &currencies(&["usd", "eur"]),
            Strictness::Exact,
        );
        assert_eq!(kept, listings);
    }

    #[test]
    fn loose_allows_one_extra_character() {
        let listings = vec![
            listing("a", "btcusdt"),
            listing("b", "btczusd"),
            listing("c", "btcusd"),
            listing("d", "btcbusdxx"),
            listing("e", "btceur"),
        ];
        let kept = filter_pairs(listings, "BTC", &currencies(&["usd"]), Strictness::Loose);
        assert_eq!(pairs(&kept), vec!["btcusdt", "btczusd", "btcusd"]);
    }

    #[test]
    fn very_loose_accepts_substring() {
        let listings = vec![
            listing("a", "btcbusdxx"),
            listing("b", "btceur"),
            listing("c", "btcjpy"),
        ];
        let kept = filter_pairs(
            listings,
            "btc",
            &currencies(&["usd", "eur"]),
            Strictness::VeryLoose,
        );
        assert_eq!(pairs(&kept), vec!["btcbusdxx", "btceur"]);
    }

    #[test]
    fn pair_matching_two_currencies_is_kept_once() {
        let listings = vec![listing("a", "btcusdt")];
        let kept = filter_pairs(
            listings,
            "btc",
            &currencies(&["usd", "usdt"]),
            Strictness::VeryLoose,
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn quote_strips_base_symbol() {
        assert_eq!(quote_of("btcusd", "btc"), "usd");
        assert_eq!(quote_of("BTCEUR", "btc"), "eur");
        assert_eq!(quote_of("usdbtc", "btc"), "usd");
    }

    #[test]
    fn strictness_levels_parse() {
        assert_eq!("0".parse::<Strictness>().unwrap(), Strictness::Exact);
        assert_eq!("2".parse::<Strictness>().unwrap(), Strictness::VeryLoose);
        assert!("3".parse::<Strictness>().is_err());
        assert_eq!(Strictness::Loose.to_string(), "1");
    }

    #[test]
    fn field_matching_is_case_insensitive() {
        assert!(field_matches("BIT", "bitcoin", MatchMode::Prefix));
        assert!(!field_matches("coin", "bitcoin", MatchMode::Prefix));
        assert!(field_matches("COIN", "Bitcoin", MatchMode::Substring));
    }

    #[test]
    fn dedup_keeps_first_listing() {
        let kept = dedup_listings(
            vec![listing("a", "btcusd"), listing("a", "btcusd"), listing("b", "btcusd")],
        );
        assert_eq!(kept.len(), 2);
    }
}
