//! Per-account monitors
//!
//! Each monitor is a cancellable task bound to one account. It stops when
//! its own signal or the process shutdown fires, or when the account leaves
//! the status it watches.

pub mod funding;
pub mod target;

pub use funding::{estimated_income, should_exit, FundingRateMonitor};
pub use target::{exit_order_specs, trigger_reason, TargetMonitor, TriggerReason, LOG_EVERY_POLLS};

use super::chain::TargetOutcome;
use crate::domain::AccountStatus;
use crate::infrastructure::StopSignal;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Target,
    Funding,
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorKind::Target => write!(f, "target"),
            MonitorKind::Funding => write!(f, "funding"),
        }
    }
}

/// How a monitor task ended
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The target trigger fired and the critical batch ran
    Triggered(TargetOutcome),
    /// Funding collection was exited and the account completed
    Completed,
    Cancelled,
    /// The account is no longer in the watched status
    Superseded(AccountStatus),
}

/// Local stop signal combined with the process-wide one
#[derive(Clone, Debug)]
pub struct MonitorControl {
    local: StopSignal,
    global: StopSignal,
}

impl MonitorControl {
    pub fn new(global: StopSignal) -> Self {
        Self {
            local: StopSignal::new(),
            global,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.local.is_triggered() && !self.global.is_triggered()
    }

    pub fn stop(&self) {
        self.local.trigger();
    }

    /// Sleep unless either signal fires first; `true` if the monitor
    /// should keep going
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_active(),
            _ = self.local.wait() => false,
            _ = self.global.wait() => false,
        }
    }
}
