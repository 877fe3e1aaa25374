//! Price website implementations

pub mod alcor;
pub mod coingecko;
pub mod cryptowatch;

pub use alcor::AlcorProvider;
pub use coingecko::CoinGeckoProvider;
pub use cryptowatch::CryptowatchProvider;
