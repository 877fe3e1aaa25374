//! Daily asset catalog cache
//!
//! Providers keep their asset/market lists here, one slot per scope (a chain,
//! a coin lookup). A slot is reused until the calendar day changes or
//! [`CatalogCache::invalidate`] is called. Callers get an `Arc` snapshot, so a
//! running batch never sees a reload. Failed loads are never stored.

use crate::error::PriceError;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Content key of a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogKey {
    /// Hash of whatever the catalog was loaded for
    pub scope: u64,
    pub loaded_on: NaiveDate,
}

/// A loaded catalog
#[derive(Debug)]
pub struct AssetCatalog<T> {
    pub entries: T,
    pub key: CatalogKey,
}

impl<T> AssetCatalog<T> {
    /// Day of the year the catalog was loaded
    pub fn day_of_year(&self) -> u32 {
        self.key.loaded_on.ordinal()
    }
}

/// Hash a catalog scope
pub fn scope_of<H: Hash + ?Sized>(value: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Today's date in UTC
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Read-mostly catalog cache with single-flight refresh
#[derive(Debug)]
pub struct CatalogCache<T> {
    slots: RwLock<HashMap<u64, Arc<AssetCatalog<T>>>>,
    refresh: Mutex<()>,
}

impl<T> Default for CatalogCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CatalogCache<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            refresh: Mutex::new(()),
        }
    }

    /// Return the catalog for `scope`, loading it when missing or stale
    pub async fn get_or_load<F, Fut>(
        &self,
        scope: u64,
        load: F,
    ) -> Result<Arc<AssetCatalog<T>>, PriceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PriceError>>,
    {
        self.get_or_load_on(scope, today(), load).await
    }

    /// Same as [`get_or_load`](Self::get_or_load) with an explicit current date
    pub async fn get_or_load_on<F, Fut>(
        &self,
        scope: u64,
        today: NaiveDate,
        load: F,
    ) -> Result<Arc<AssetCatalog<T>>, PriceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PriceError>>,
    {
        let wanted = CatalogKey {
            scope,
            loaded_on: today,
        };
        if let Some(catalog) = self.fresh(wanted).await {
            return Ok(catalog);
        }

        let _refreshing = self.refresh.lock().await;
        // Another caller may have finished the refresh while we waited
        if let Some(catalog) = self.fresh(wanted).await {
            return Ok(catalog);
        }

        tracing::debug!(scope, %today, "Loading catalog");
        let entries = load().await?;
        let catalog = Arc::new(AssetCatalog {
            entries,
            key: wanted,
        });

        let mut slots = self.slots.write().await;
        slots.retain(|_, cached| cached.key.loaded_on == today);
        slots.insert(scope, catalog.clone());
        Ok(catalog)
    }

    /// Drop every cached catalog so the next request reloads it
    pub async fn invalidate(&self) {
        self.slots.write().await.clear();
    }

    /// Catalog cached for `scope`, fresh or not
    pub async fn cached(&self, scope: u64) -> Option<Arc<AssetCatalog<T>>> {
        self.slots.read().await.get(&scope).cloned()
    }

    async fn fresh(&self, wanted: CatalogKey) -> Option<Arc<AssetCatalog<T>>> {
        self.slots
            .read()
            .await
            .get(&wanted.scope)
            .filter(|catalog| catalog.key == wanted)
            .cloned()
    }
}
