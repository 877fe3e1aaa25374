//! Transport metrics
//!
//! Rolling latency window plus counters for the conditions the transport
//! absorbs on its own (rate limits, transient retries, TLS fallback).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for latency percentiles
const MAX_SAMPLES: usize = 100;

/// Snapshot of transport health for one website
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMetrics {
    pub website: String,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub rate_limit_waits: u64,
    pub transient_retries: u64,
    pub tls_fallbacks: u64,
}

#[derive(Debug, Default)]
struct MetricsState {
    latencies_ms: VecDeque<(f64, bool)>,
    total_requests: u64,
    failed_requests: u64,
    rate_limit_waits: u64,
    transient_retries: u64,
    tls_fallbacks: u64,
}

/// Collects transport metrics
#[derive(Debug)]
pub struct MetricsCollector {
    website: String,
    state: RwLock<MetricsState>,
}

impl MetricsCollector {
    pub fn new(website: &str) -> Self {
        Self {
            website: website.to_string(),
            state: RwLock::new(MetricsState::default()),
        }
    }

    /// Records a finished request with its duration and outcome
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let mut state = self.state.write().await;
        state.total_requests += 1;
        if !success {
            state.failed_requests += 1;
        }
        if state.latencies_ms.len() >= MAX_SAMPLES {
            state.latencies_ms.pop_front();
        }
        state
            .latencies_ms
            .push_back((duration.as_secs_f64() * 1000.0, success));
    }

    pub async fn record_rate_limit_wait(&self) {
        self.state.write().await.rate_limit_waits += 1;
    }

    pub async fn record_transient_retry(&self) {
        self.state.write().await.transient_retries += 1;
    }

    pub async fn record_tls_fallback(&self) {
        self.state.write().await.tls_fallbacks += 1;
    }

    /// Computes current metrics
    pub async fn snapshot(&self) -> TransportMetrics {
        let state = self.state.read().await;

        let mut latencies: Vec<f64> = state
            .latencies_ms
            .iter()
            .filter(|(_, success)| *success)
            .map(|(ms, _)| *ms)
            .collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let success_rate = if state.total_requests > 0 {
            (state.total_requests - state.failed_requests) as f64 / state.total_requests as f64
        } else {
            1.0
        };

        TransportMetrics {
            website: self.website.clone(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: state.total_requests,
            failed_requests: state.failed_requests,
            rate_limit_waits: state.rate_limit_waits,
            transient_retries: state.transient_retries,
            tls_fallbacks: state.tls_fallbacks,
        }
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_requests_and_counters() {
        let collector = MetricsCollector::new("cryptowatch");

        collector.record_request(Duration::from_millis(100), true).await;
        collector.record_request(Duration::from_millis(200), true).await;
        collector.record_request(Duration::from_millis(150), false).await;
        collector.record_rate_limit_wait().await;
        collector.record_transient_retry().await;
        collector.record_transient_retry().await;

        let metrics = collector.snapshot().await;

        assert_eq!(metrics.website, "cryptowatch");
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.rate_limit_waits, 1);
        assert_eq!(metrics.transient_retries, 2);
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
    }

    #[tokio::test]
    async fn empty_collector_reports_full_success() {
        let metrics = MetricsCollector::new("alcor").snapshot().await;
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.latency_p50_ms, 0.0);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let values: Vec<f64> = (1..=11).map(f64::from).collect();
        assert_eq!(percentile(&values, 50.0), 6.0);
        assert_eq!(percentile(&values, 99.0), 11.0);
    }
}
