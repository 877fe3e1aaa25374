//! Progress and rate-limit reporting
//!
//! The engine calls a [`Reporter`] synchronously at fixed points: once per
//! item before its network round trip, once per second while waiting out a
//! rate limit, and whenever a provider reports its remaining allowance.
//! Reporters observe only; they cannot influence control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Observer for engine progress
pub trait Reporter: Send + Sync {
    /// Item `current` of `total` is about to be requested
    fn progress(&self, _current: usize, _total: usize) {}

    /// Free-form status line, e.g. a catalog reload
    fn progress_text(&self, _text: &str) {}

    /// Seconds left before a rate-limited request is reissued
    fn waiting(&self, _remaining_secs: u64) {}

    /// Allowance data returned by the provider
    fn allowance(&self, _allowance: &serde_json::Value) {}
}

/// Reporter that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Reporter forwarding to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn progress(&self, current: usize, total: usize) {
        tracing::info!(current, total, "Retrieving price");
    }

    fn progress_text(&self, text: &str) {
        tracing::info!("{}", text);
    }

    fn waiting(&self, remaining_secs: u64) {
        tracing::info!(remaining_secs, "Rate limited, waiting");
    }

    fn allowance(&self, allowance: &serde_json::Value) {
        tracing::debug!(%allowance, "Provider allowance");
    }
}

/// Events published by [`BroadcastReporter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportEvent {
    Progress {
        id: Uuid,
        current: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    ProgressText {
        id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },
    Waiting {
        id: Uuid,
        remaining_secs: u64,
        timestamp: DateTime<Utc>,
    },
    Allowance {
        id: Uuid,
        allowance: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl ReportEvent {
    /// Get the event ID
    pub fn id(&self) -> Uuid {
        match self {
            ReportEvent::Progress { id, .. }
            | ReportEvent::ProgressText { id, .. }
            | ReportEvent::Waiting { id, .. }
            | ReportEvent::Allowance { id, .. } => *id,
        }
    }

    /// Get the event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            ReportEvent::Progress { .. } => "PROGRESS",
            ReportEvent::ProgressText { .. } => "PROGRESS_TEXT",
            ReportEvent::Waiting { .. } => "WAITING",
            ReportEvent::Allowance { .. } => "ALLOWANCE",
        }
    }
}

impl std::fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportEvent::Progress { current, total, .. } => {
                write!(f, "Retrieving nr {:3} of {}", current, total)
            }
            ReportEvent::ProgressText { text, .. } => f.write_str(text),
            ReportEvent::Waiting { remaining_secs, .. } => {
                write!(f, "Waiting {} seconds", remaining_secs)
            }
            ReportEvent::Allowance { allowance, .. } => write!(f, "Allowance {}", allowance),
        }
    }
}

/// Reporter publishing [`ReportEvent`]s on a broadcast channel
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    tx: broadcast::Sender<ReportEvent>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReportEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: ReportEvent) {
        let _ = self.tx.send(event);
    }
}

impl Reporter for BroadcastReporter {
    fn progress(&self, current: usize, total: usize) {
        self.publish(ReportEvent::Progress {
            id: Uuid::new_v4(),
            current,
            total,
            timestamp: Utc::now(),
        });
    }

    fn progress_text(&self, text: &str) {
        self.publish(ReportEvent::ProgressText {
            id: Uuid::new_v4(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn waiting(&self, remaining_secs: u64) {
        self.publish(ReportEvent::Waiting {
            id: Uuid::new_v4(),
            remaining_secs,
            timestamp: Utc::now(),
        });
    }

    fn allowance(&self, allowance: &serde_json::Value) {
        self.publish(ReportEvent::Allowance {
            id: Uuid::new_v4(),
            allowance: allowance.clone(),
            timestamp: Utc::now(),
        });
    }
}
