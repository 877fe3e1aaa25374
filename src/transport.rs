//! HTTP transport shared by all providers
//!
//! Every provider request goes through [`Transport::fetch`], which hides the
//! rate-limit countdown, transient retries and the TLS fallback, and hands
//! back an [`ApiResponse`] instead of a raw HTTP response.

use crate::{
    constants::{
        REQUEST_TIMEOUT_SECS, TRANSIENT_ATTEMPTS, TRANSIENT_BACKOFF_FACTOR_SECS,
        TRANSIENT_BACKOFF_MAX_SECS, TRANSIENT_STATUS_CODES, USER_AGENT,
    },
    error::{ConfigError, PriceError},
    metrics::{MetricsCollector, TransportMetrics},
    reporter::Reporter,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Value of a query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("true"),
            ParamValue::Bool(false) => f.write_str("false"),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Ordered query parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Vec<(String, ParamValue)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter (builder style)
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a parameter, replacing an existing value for the same key
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Append `params` to `base`, continuing an existing query string if present
pub fn build_url(base: &str, params: &QueryParams) -> Result<Url, PriceError> {
    let mut url = Url::parse(base)
        .map_err(|e| PriceError::transport(format!("invalid url {}: {}", base, e)))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params.iter() {
            pairs.append_pair(key, &value.to_string());
        }
    }
    Ok(url)
}

/// Uniform outcome of a provider request
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Decoded body; top-level arrays are wrapped as `{"result": [...]}`
    Success(Value),
    /// Provider answered with an error
    ProviderError(String),
    /// Request could not be completed
    TransportError(String),
}

impl ApiResponse {
    pub fn into_result(self) -> Result<Value, PriceError> {
        match self {
            ApiResponse::Success(body) => Ok(body),
            ApiResponse::ProviderError(text) => Err(PriceError::Provider(text)),
            ApiResponse::TransportError(text) => Err(PriceError::Transport(text)),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Static headers sent with every request (API keys)
    pub headers: Vec<(String, String)>,
    /// Length of one rate-limit countdown step
    pub countdown_tick: Duration,
    /// Total attempts for 502/503/504 and connection failures
    pub transient_attempts: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
            headers: Vec::new(),
            countdown_tick: Duration::from_secs(1),
            transient_attempts: TRANSIENT_ATTEMPTS,
            backoff_factor: Duration::from_secs_f64(TRANSIENT_BACKOFF_FACTOR_SECS),
            backoff_max: Duration::from_secs_f64(TRANSIENT_BACKOFF_MAX_SECS),
        }
    }
}

impl TransportConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Configuration without real waiting, for tests and dry runs
    pub fn without_delays() -> Self {
        Self {
            countdown_tick: Duration::ZERO,
            backoff_factor: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sleep before transient retry number `retry` (1-based)
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let scale = 2f64.powi(retry.saturating_sub(1) as i32);
        let secs = (self.backoff_factor.as_secs_f64() * scale).min(self.backoff_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// HTTP transport with one connection pool
pub struct Transport {
    client: Client,
    insecure_client: Client,
    config: TransportConfig,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<MetricsCollector>,
}

impl Transport {
    /// Creates a transport reporting rate-limit countdowns to `reporter`
    pub fn new(
        website: &str,
        config: TransportConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::invalid("header name", name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::invalid(name, "<non-ascii header value>"))?;
            headers.insert(header_name, header_value);
        }

        let build = |accept_invalid_certs: bool| {
            Client::builder()
                .timeout(config.timeout)
                .user_agent(config.user_agent.as_str())
                .default_headers(headers.clone())
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
        };
        let client = build(false)?;
        let insecure_client = build(true)?;

        Ok(Self {
            client,
            insecure_client,
            config,
            reporter,
            metrics: Arc::new(MetricsCollector::new(website)),
        })
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    pub async fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot().await
    }

    /// GET `url` with `params` appended
    pub async fn fetch(
        &self,
        url: &str,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> ApiResponse {
        let url = match build_url(url, params) {
            Ok(url) => url,
            Err(e) => return ApiResponse::TransportError(e.to_string()),
        };

        let start = Instant::now();
        let response = self.fetch_url(url, cancel).await;
        self.metrics
            .record_request(start.elapsed(), matches!(response, ApiResponse::Success(_)))
            .await;
        response
    }

    /// GET and deserialize a successful body into `T`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> Result<T, PriceError> {
        let body = self.fetch(url, params, cancel).await.into_result()?;
        Ok(serde_json::from_value(body)?)
    }

    async fn fetch_url(&self, url: Url, cancel: &CancellationToken) -> ApiResponse {
        let mut verify_tls = true;
        let mut transient_attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return ApiResponse::TransportError(PriceError::Cancelled.to_string());
            }

            tracing::debug!(url = %url, verify_tls, "GET");
            let client = if verify_tls { &self.client } else { &self.insecure_client };
            let sent = tokio::select! {
                sent = client.get(url.clone()).send() => sent,
                _ = cancel.cancelled() => {
                    return ApiResponse::TransportError(PriceError::Cancelled.to_string());
                }
            };

            let retry_reason = match sent {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let Some(retry_after) = retry_after_secs(&response) else {
                        tracing::warn!(url = %url, "Rate limited without Retry-After");
                        return ApiResponse::TransportError(
                            "HTTP 429 Too Many Requests without Retry-After".to_string(),
                        );
                    };
                    self.metrics.record_rate_limit_wait().await;
                    if let Err(e) = self.countdown(retry_after, cancel).await {
                        return ApiResponse::TransportError(e.to_string());
                    }
                    continue;
                }
                Ok(response) if TRANSIENT_STATUS_CODES.contains(&response.status().as_u16()) => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let status = response.status();
                    return match response.bytes().await {
                        Ok(body) => normalize_body(status, &body),
                        Err(e) => ApiResponse::TransportError(
                            format!("failed to read response body: {}", e),
                        ),
                    };
                }
                Err(e) if verify_tls && is_certificate_error(&e) => {
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        "TLS verification failed, retrying unverified"
                    );
                    self.metrics.record_tls_fallback().await;
                    verify_tls = false;
                    continue;
                }
                Err(e) if e.is_connect() || e.is_timeout() => e.to_string(),
                Err(e) => return ApiResponse::TransportError(format!("request failed: {}", e)),
            };

            transient_attempt += 1;
            if transient_attempt >= self.config.transient_attempts {
                return ApiResponse::TransportError(format!(
                    "{} after {} attempts",
                    retry_reason, transient_attempt
                ));
            }

            let delay = self.config.backoff_delay(transient_attempt);
            tracing::warn!(
                url = %url,
                attempt = transient_attempt,
                max_attempts = self.config.transient_attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %retry_reason,
                "Transient failure, retrying"
            );
            self.metrics.record_transient_retry().await;
            if let Err(e) = sleep_or_cancel(delay, cancel).await {
                return ApiResponse::TransportError(e.to_string());
            }
        }
    }

    /// Wait out a `Retry-After` of `retry_after` seconds plus one grace second,
    /// reporting the remaining seconds once per tick
    async fn countdown(
        &self,
        retry_after: u64,
        cancel: &CancellationToken,
    ) -> Result<(), PriceError> {
        tracing::warn!(retry_after, "Rate limited, waiting before retry");
        for remaining in (1..=retry_after).rev() {
            self.reporter.waiting(remaining);
            sleep_or_cancel(self.config.countdown_tick, cancel).await?;
        }
        sleep_or_cancel(self.config.countdown_tick, cancel).await
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), PriceError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(PriceError::Cancelled),
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Whether any error in the chain of `e` is a TLS certificate failure
fn is_certificate_error(e: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(e);
    while let Some(err) = source {
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("ssl") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Turn a non-429, non-transient HTTP response into an [`ApiResponse`]
pub(crate) fn normalize_body(status: StatusCode, body: &[u8]) -> ApiResponse {
    let decoded = serde_json::from_slice::<Value>(body).ok().map(|value| match value {
        Value::Array(items) => json!({ "result": items }),
        other => other,
    });

    if status.is_success() {
        return match decoded {
            Some(body) => ApiResponse::Success(body),
            None => ApiResponse::ProviderError(
                PriceError::invalid_response(format!("HTTP {} body is not JSON", status.as_u16()))
                    .to_string(),
            ),
        };
    }

    match decoded.as_ref().and_then(|body| body.get("error")) {
        Some(Value::String(text)) => ApiResponse::ProviderError(text.clone()),
        Some(other) => ApiResponse::ProviderError(other.to_string()),
        None => ApiResponse::ProviderError(format!("no status (HTTP {})", status.as_u16())),
    }
}
