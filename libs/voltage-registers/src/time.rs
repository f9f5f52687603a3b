//! Clock abstraction for register store timestamps
//!
//! Transactions stamp the store with the time they started. The clock is
//! injected so tests can pin it.

use chrono::{DateTime, TimeZone, Utc};

/// Source of "now" for register store commits
pub trait TimeProvider: Send + Sync + 'static {
    /// Current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock provider
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed time provider for deterministic tests
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ms: i64,
}

impl FixedTimeProvider {
    pub fn new(timestamp_ms: i64) -> Self {
        Self { timestamp_ms }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Convert a millisecond timestamp into a UTC date time
pub fn millis_to_utc(timestamp_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp_ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let time1 = provider.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = provider.now_millis();

        assert!(time2 >= time1 + 10);
    }

    #[test]
    fn test_fixed_time_provider() {
        let provider = FixedTimeProvider::new(1_700_000_000_000);
        assert_eq!(provider.now_millis(), 1_700_000_000_000);
        assert_eq!(provider.now_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_millis_to_utc() {
        let dt = millis_to_utc(1_700_000_000_000);
        assert_eq!(
            dt.map(|d| d.to_rfc3339()),
            Some("2023-11-14T22:13:20+00:00".to_string())
        );
    }
}
