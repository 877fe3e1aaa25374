//! Timestamp normalization between provider units and UTC instants

use chrono::{DateTime, Utc};

/// Unit a provider reports its sample timestamps in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Normalize a raw provider timestamp to whole seconds (truncating)
    pub fn to_secs(self, raw: i64) -> i64 {
        match self {
            TimeUnit::Seconds => raw,
            TimeUnit::Milliseconds => raw / 1000,
        }
    }

    /// Same as [`to_secs`](Self::to_secs) for JSON numbers, which may arrive as floats
    pub fn float_to_secs(self, raw: f64) -> i64 {
        self.to_secs(raw as i64)
    }

    /// Express whole seconds in this unit
    pub fn from_secs(self, secs: i64) -> i64 {
        match self {
            TimeUnit::Seconds => secs,
            TimeUnit::Milliseconds => secs.saturating_mul(1000),
        }
    }
}

/// Convert unix seconds to a UTC instant, out-of-range values clamp to the epoch
pub fn secs_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip_keeps_second_resolution() {
        for raw_ms in [0_i64, 999, 1_000, 1_650_000_123_456, 1_700_000_000_000] {
            let secs = TimeUnit::Milliseconds.to_secs(raw_ms);
            let back = TimeUnit::Milliseconds.from_secs(secs);
            assert_eq!(TimeUnit::Milliseconds.to_secs(back), secs);
            assert_eq!(back, raw_ms - raw_ms % 1000);
        }
    }

    #[test]
    fn seconds_are_untouched() {
        assert_eq!(TimeUnit::Seconds.to_secs(1_650_000_000), 1_650_000_000);
        assert_eq!(TimeUnit::Milliseconds.float_to_secs(1_650_000_000_999.0), 1_650_000_000);
    }

    #[test]
    fn utc_conversion() {
        assert_eq!(secs_to_utc(0), DateTime::UNIX_EPOCH);
        assert_eq!(secs_to_utc(86_400).to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }
}
