//! Coin persistence interface
//!
//! Coins selected through search are stored per website and later loaded as
//! the default coin set of a price batch. Table names come from the closed
//! [`DbTable`] enum and are never built from caller text.

use crate::{
    constants::{ALCOR_API_URL_TEMPLATE, COINGECKO_API_URL, CRYPTOWATCH_API_URL},
    error::StoreError,
    market::{field_matches, MatchMode},
    types::{CoinRef, Website},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tables of the coin database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbTable {
    /// `website(id, name, url, api)`
    Website,
    /// `coin(id, website_id, chain, siteid, name, symbol, base)`
    Coin,
}

impl DbTable {
    pub fn name(&self) -> &'static str {
        match self {
            DbTable::Website => "website",
            DbTable::Coin => "coin",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DbTable::Website => &["id", "name", "url", "api"],
            DbTable::Coin => &["id", "website_id", "chain", "siteid", "name", "symbol", "base"],
        }
    }
}

/// Row of the `website` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub api: String,
}

/// Row of the `coin` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub id: i64,
    pub website_id: i64,
    pub coin: CoinRef,
}

/// Storage of websites and their coins
#[async_trait]
pub trait CoinStore: Send + Sync {
    /// Website row by name
    async fn website(&self, website: Website) -> Result<Option<WebsiteRecord>, StoreError>;

    /// Coins stored for `website`, in insertion order
    async fn coins(&self, website: Website) -> Result<Vec<CoinRef>, StoreError>;

    /// Store a coin for `website`, returning its new row id
    async fn insert_coin(&self, website: Website, coin: &CoinRef) -> Result<i64, StoreError>;

    /// Stored coins whose site id, name, symbol or base contains `query`
    async fn search_coins(
        &self,
        website: Website,
        query: &str,
    ) -> Result<Vec<CoinRef>, StoreError> {
        Ok(self
            .coins(website)
            .await?
            .into_iter()
            .filter(|coin| {
                [Some(&coin.site_id), Some(&coin.name), Some(&coin.symbol), coin.base.as_ref()]
                    .into_iter()
                    .flatten()
                    .any(|field| field_matches(query, field, MatchMode::Substring))
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct Tables {
    websites: HashMap<Website, WebsiteRecord>,
    coins: Vec<CoinRecord>,
}

/// In-memory coin store
///
/// Starts with one `website` row per supported website.
#[derive(Debug, Clone)]
pub struct InMemoryCoinStore {
    tables: Arc<RwLock<Tables>>,
}

impl Default for InMemoryCoinStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoinStore {
    pub fn new() -> Self {
        let websites = Website::all()
            .iter()
            .enumerate()
            .map(|(i, website)| {
                let url = match website {
                    Website::Alcor => ALCOR_API_URL_TEMPLATE,
                    Website::CoinGecko => COINGECKO_API_URL,
                    Website::Cryptowatch => CRYPTOWATCH_API_URL,
                };
                let record = WebsiteRecord {
                    id: i as i64 + 1,
                    name: website.name().to_string(),
                    url: url.to_string(),
                    api: String::new(),
                };
                (*website, record)
            })
            .collect();

        Self {
            tables: Arc::new(RwLock::new(Tables {
                websites,
                coins: Vec::new(),
            })),
        }
    }

    /// Store with `coins` already inserted for `website`
    pub async fn with_coins(website: Website, coins: &[CoinRef]) -> Result<Self, StoreError> {
        let store = Self::new();
        for coin in coins {
            store.insert_coin(website, coin).await?;
        }
        Ok(store)
    }
}

#[async_trait]
impl CoinStore for InMemoryCoinStore {
    async fn website(&self, website: Website) -> Result<Option<WebsiteRecord>, StoreError> {
        Ok(self.tables.read().await.websites.get(&website).cloned())
    }

    async fn coins(&self, website: Website) -> Result<Vec<CoinRef>, StoreError> {
        let tables = self.tables.read().await;
        let Some(record) = tables.websites.get(&website) else {
            return Err(StoreError::UnknownWebsite(website.name().to_string()));
        };
        Ok(tables
            .coins
            .iter()
            .filter(|c| c.website_id == record.id)
            .map(|c| c.coin.clone())
            .collect())
    }

    async fn insert_coin(&self, website: Website, coin: &CoinRef) -> Result<i64, StoreError> {
        let mut tables = self.tables.write().await;
        let website_id = tables
            .websites
            .get(&website)
            .map(|w| w.id)
            .ok_or_else(|| StoreError::UnknownWebsite(website.name().to_string()))?;

        let exists = tables
            .coins
            .iter()
            .any(|c| {
                c.website_id == website_id
                    && c.coin.site_id == coin.site_id
                    && c.coin.chain == coin.chain
            });
        if exists {
            return Err(StoreError::DuplicateCoin(coin.site_id.clone()));
        }

        let id = tables.coins.len() as i64 + 1;
        tables.coins.push(CoinRecord {
            id,
            website_id,
            coin: coin.clone(),
        });
        tracing::debug!(
            table = DbTable::Coin.name(),
            website = %website,
            site_id = %coin.site_id,
            id,
            "Stored coin"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coins_are_kept_per_website() {
        let store = InMemoryCoinStore::new();
        store.insert_coin(Website::CoinGecko, &CoinRef::new("bitcoin")).await.unwrap();
        store.insert_coin(Website::Cryptowatch, &CoinRef::new("btc")).await.unwrap();
        store.insert_coin(Website::CoinGecko, &CoinRef::new("ethereum")).await.unwrap();

        let ids: Vec<String> = store
            .coins(Website::CoinGecko)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.site_id)
            .collect();
        assert_eq!(ids, vec!["bitcoin", "ethereum"]);
        assert_eq!(store.website(Website::Alcor).await.unwrap().unwrap().name, "alcor");
    }

    #[tokio::test]
    async fn duplicate_coin_is_rejected() {
        let store = InMemoryCoinStore::new();
        let coin = CoinRef::new("157").with_chain("proton");
        store.insert_coin(Website::Alcor, &coin).await.unwrap();

        assert_eq!(
            store.insert_coin(Website::Alcor, &coin).await,
            Err(StoreError::DuplicateCoin("157".to_string()))
        );
        // Same id on another chain is a different market
        assert!(store
            .insert_coin(Website::Alcor, &CoinRef::new("157").with_chain("wax"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn search_covers_name_symbol_and_base() {
        let store = InMemoryCoinStore::with_coins(
            Website::Alcor,
            &[CoinRef::new("157")
                .with_name("FREEOS@freeostokens")
                .with_symbol("FREEOS")
                .with_chain("proton")
                .with_base("XUSDC@xtokens")],
        )
        .await
        .unwrap();

        assert_eq!(store.search_coins(Website::Alcor, "freeos").await.unwrap().len(), 1);
        assert_eq!(store.search_coins(Website::Alcor, "xusdc").await.unwrap().len(), 1);
        assert!(store.search_coins(Website::Alcor, "btc").await.unwrap().is_empty());
        assert!(store.search_coins(Website::CoinGecko, "freeos").await.unwrap().is_empty());
    }

    #[test]
    fn table_names_are_fixed() {
        assert_eq!(DbTable::Website.name(), "website");
        assert_eq!(DbTable::Coin.name(), "coin");
        assert_eq!(DbTable::Coin.columns().len(), 7);
    }
}
