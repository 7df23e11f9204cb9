//! Heartbeat logging for the engine driver

use crate::domain::AccountStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Tracks heartbeat intervals for periodic status logging
pub struct Heartbeat {
    interval: Duration,
    last_beat: DateTime<Utc>,
}

impl Heartbeat {
    /// Create a new heartbeat with the given interval in seconds
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            last_beat: Utc::now(),
        }
    }

    /// Check if enough time has passed since the last beat
    pub fn should_beat(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_beat);
        elapsed.to_std().unwrap_or_default() >= self.interval
    }

    /// Record a heartbeat at the current time
    pub fn beat(&mut self) {
        self.last_beat = Utc::now();
    }

    /// Log a per-status account summary if the interval has elapsed
    pub fn maybe_log(&mut self, counts: &BTreeMap<AccountStatus, usize>, monitors: usize) {
        if !self.should_beat() {
            return;
        }
        info!("💓 Heartbeat: {} | {} monitors running", summarize(counts), monitors);
        self.beat();
    }
}

/// `IDLE=3 WAITING_TARGET=1 ...` in lifecycle order, zero counts omitted
pub fn summarize(counts: &BTreeMap<AccountStatus, usize>) -> String {
    let parts: Vec<String> = counts
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(status, n)| format!("{}={}", status, n))
        .collect();
    if parts.is_empty() {
        "no accounts".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_order() {
        let mut counts = BTreeMap::new();
        counts.insert(AccountStatus::Completed, 1);
        counts.insert(AccountStatus::Idle, 3);
        counts.insert(AccountStatus::Failed, 0);
        assert_eq!(summarize(&counts), "IDLE=3 COMPLETED=1");
        assert_eq!(summarize(&BTreeMap::new()), "no accounts");
    }

    #[test]
    fn test_zero_interval_always_beats() {
        let hb = Heartbeat::new(0);
        assert!(hb.should_beat());
        let hb = Heartbeat::new(3600);
        assert!(!hb.should_beat());
    }
}
