//! Constants for the price resolution engine
//!
//! Defaults for every tunable live here. `EngineConfig::default()` is built
//! from these values and `EngineConfig::from_env()` overrides them.

/// HTTP request timeout (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// User agent for HTTP requests
pub const USER_AGENT: &str = "coin-price-sdk/0.1.0";

/// Maximum number of window-expansion queries for one historical price
pub const MAX_WINDOW_ATTEMPTS: u32 = 10;

/// Base unit of the window expansion (one hour)
pub const WINDOW_UNIT_SECS: i64 = 3600;

/// Total attempts for requests failing with 502/503/504 or connection errors
pub const TRANSIENT_ATTEMPTS: u32 = 5;

/// Backoff factor for transient failures (seconds)
pub const TRANSIENT_BACKOFF_FACTOR_SECS: f64 = 1.5;

/// Upper bound for a single transient backoff sleep (seconds)
pub const TRANSIENT_BACKOFF_MAX_SECS: f64 = 120.0;

/// HTTP status codes retried automatically by the transport
pub const TRANSIENT_STATUS_CODES: &[u16] = &[502, 503, 504];

/// Error text for a query that exhausted its window budget
pub const NO_DATA_FOUND: &str = "no data found";

/// Error text for a market that could not be resolved on the venue
pub const MARKET_NOT_FOUND: &str = "not data found";

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Query parameter carrying the CoinGecko demo API key
pub const COINGECKO_DEMO_KEY_PARAM: &str = "x_cg_demo_api_key";

/// Cryptowatch API base URL
pub const CRYPTOWATCH_API_URL: &str = "https://api.cryptowat.ch";

/// Header carrying the Cryptowatch API key
pub const CRYPTOWATCH_API_KEY_HEADER: &str = "X-CW-API-Key";

/// Candle period requested from Cryptowatch (one hour)
pub const CRYPTOWATCH_OHLC_PERIOD: i64 = 3600;

/// Alcor API URL template, `?` is replaced by the chain name
pub const ALCOR_API_URL_TEMPLATE: &str = "https://?.alcor.exchange/api";

/// Chains searched on Alcor by default
pub const ALCOR_CHAINS: &[&str] = &["eos", "telos", "wax", "proton"];

/// Chart resolution requested from Alcor (minutes)
pub const ALCOR_CHART_RESOLUTION: i64 = 60;

/// Quote currencies used when the caller does not name any
pub const DEFAULT_CURRENCIES: &[&str] = &["usd", "eur", "btc", "eth"];
