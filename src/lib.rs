//! # Coin Price SDK
//!
//! Resolves current and historical cryptocurrency prices on Alcor, CoinGecko
//! and Cryptowatch.
//!
//! Historical prices are found by querying a widening window around the
//! target instant until the website returns samples, then picking the sample
//! closest to the target. Rate limits (HTTP 429) and transient gateway errors
//! are absorbed by the transport; every coin and currency of a batch yields a
//! [`PricePoint`], failed ones carry an error text.
//!
//! ## Usage
//!
//! ```no_run
//! use coin_price_sdk::{CoinRef, EngineConfig, PriceEngine, TracingReporter, Website};
//! use chrono::{TimeZone, Utc};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::for_website(Website::Cryptowatch);
//! let engine = PriceEngine::new(config, Arc::new(TracingReporter))?;
//!
//! let at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
//! let coins = [CoinRef::new("btc")];
//! let prices = engine
//!     .historical_prices(&coins, &["usd".to_string()], at, &CancellationToken::new())
//!     .await;
//!
//! for p in prices {
//!     match &p.error {
//!         None => println!("{} {} {:?}: {:.2}", p.coin.symbol, p.currency, p.venue, p.price),
//!         Some(e) => println!("{} {}: {}", p.coin.symbol, p.currency, e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod market;
pub mod metrics;
pub mod provider;
pub mod providers;
pub mod reporter;
pub mod select;
pub mod store;
pub mod timestamp;
pub mod transport;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::PriceEngine;
pub use error::{ConfigError, PriceError, StoreError};
pub use export::{ExportFormat, PriceSink, TableFormat};
pub use market::Strictness;
pub use metrics::TransportMetrics;
pub use provider::PriceProvider;
pub use reporter::{BroadcastReporter, NoopReporter, ReportEvent, Reporter, TracingReporter};
pub use store::{CoinStore, InMemoryCoinStore};
pub use types::{CoinRef, CoinSearchHit, Market, PricePoint, Sample, Website};
