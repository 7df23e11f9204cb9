//! Risk enforcement
//!
//! Periodic sweep over every account that may still hold legs, market
//! condition checks, de-leveraging of HIGH-risk accounts and the escalation
//! hooks used by the coordinators when something fails.

use super::scorer::RiskScorer;
use crate::application::context::EngineContext;
use crate::domain::{
    AccountStatus, BatchResult, MarketCondition, RiskLevel, Transaction, TransactionKind,
};
use crate::infrastructure::{AlertLevel, RiskConfig, StopSignal};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fraction of an over-leveraged position closed per enforcement
pub const REDUCTION_FRACTION: f64 = 0.5;

pub fn classify_funding_rate(rate: f64, min_funding_rate: f64, emergency_exit_threshold: f64) -> MarketCondition {
    if rate < emergency_exit_threshold {
        MarketCondition::Extreme
    } else if rate < min_funding_rate {
        MarketCondition::Volatile
    } else {
        MarketCondition::Normal
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub condition: MarketCondition,
    pub scored: usize,
    /// Accounts that newly reached HIGH during this sweep
    pub escalated: Vec<String>,
}

pub struct RiskEnforcer {
    ctx: EngineContext,
    scorer: Arc<RiskScorer>,
    config: RiskConfig,
    funding_symbol: String,
    last_seen: Mutex<HashMap<String, RiskLevel>>,
    last_condition: Mutex<MarketCondition>,
    stop: StopSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RiskEnforcer {
    pub fn new(
        ctx: EngineContext,
        scorer: Arc<RiskScorer>,
        config: RiskConfig,
        funding_symbol: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            scorer,
            config,
            funding_symbol: funding_symbol.into(),
            last_seen: Mutex::new(HashMap::new()),
            last_condition: Mutex::new(MarketCondition::Normal),
            stop: StopSignal::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the periodic sweep
    pub fn start(self: &Arc<Self>) {
        let enforcer = Arc::clone(self);
        let interval = self.config.sweep_interval();
        info!(
            interval_secs = self.config.sweep_interval_secs,
            max_leverage = self.config.max_leverage_ratio,
            "🛡️ Risk enforcer started"
        );

        let handle = tokio::spawn(async move {
            while enforcer.ctx.is_running() && !enforcer.stop.is_triggered() {
                enforcer.sweep_once().await;

                tokio::select! {
                    completed = enforcer.stop.sleep(interval) => {
                        if !completed {
                            break;
                        }
                    }
                    _ = enforcer.ctx.shutdown.wait() => break,
                }
            }
            info!("Risk enforcer: sweep task stopped");
        });

        *self.task.lock() = Some(handle);
    }

    /// Stop the sweep and wait for it to finish
    pub async fn stop(&self) {
        self.stop.trigger();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Risk enforcer task failed to join: {}", e);
            }
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let condition = self.check_market_conditions().await;
        let mut report = SweepReport {
            condition,
            scored: 0,
            escalated: Vec::new(),
        };

        if condition == MarketCondition::Extreme && self.config.halt_on_extreme_market {
            self.trigger_emergency_stop("Extreme market conditions").await;
            return report;
        }

        let accounts: Vec<String> = self
            .ctx
            .state
            .statuses()
            .into_iter()
            .filter(|(_, status)| !matches!(status, AccountStatus::Idle | AccountStatus::Completed))
            .map(|(id, _)| id)
            .collect();

        for account_id in accounts {
            let level = self.scorer.score(&account_id).await;
            self.ctx.state.set_risk_level(&account_id, level);
            report.scored += 1;

            let previous = self.last_seen.lock().insert(account_id.clone(), level);
            if level == RiskLevel::High && previous != Some(RiskLevel::High) {
                self.ctx
                    .alerts
                    .send(
                        &format!("High risk detected for account {}", account_id),
                        AlertLevel::Error,
                    )
                    .await;
                self.enforce_risk_limits(&account_id).await;
                report.escalated.push(account_id);
            }
        }

        debug!(
            scored = report.scored,
            escalated = report.escalated.len(),
            "Risk sweep complete"
        );
        report
    }

    /// Classify the market from the funding rate; a read error counts as VOLATILE
    pub async fn check_market_conditions(&self) -> MarketCondition {
        let condition = match self.ctx.feed.funding_rate(&self.funding_symbol).await {
            Ok(rate) => classify_funding_rate(
                rate,
                self.config.min_funding_rate,
                self.config.emergency_exit_threshold,
            ),
            Err(e) => {
                warn!("Failed to read funding rate for market check: {}", e);
                MarketCondition::Volatile
            }
        };

        let previous = std::mem::replace(&mut *self.last_condition.lock(), condition);
        if condition != MarketCondition::Normal && condition != previous {
            self.ctx
                .alerts
                .send(
                    &format!("Market conditions {:?} on {}", condition, self.funding_symbol),
                    AlertLevel::Warning,
                )
                .await;
        }
        condition
    }

    /// Halve every position whose leverage exceeds the maximum.
    ///
    /// Skips the account while its critical batch is in flight.
    /// Returns the number of positions reduced.
    pub async fn enforce_risk_limits(&self, account_id: &str) -> usize {
        let Some(_guard) = self.ctx.locks.try_acquire(account_id) else {
            info!(account_id, "Critical batch in flight, skipping risk enforcement");
            return 0;
        };

        let positions = match self.ctx.ledger.positions(account_id).await {
            Ok(positions) => positions,
            Err(e) => {
                error!(account_id, "Failed to read positions for risk enforcement: {}", e);
                self.ctx
                    .alerts
                    .send(
                        &format!("Risk enforcement failed for {}: {}", account_id, e),
                        AlertLevel::Error,
                    )
                    .await;
                return 0;
            }
        };

        let mut reduced = 0;
        for position in positions
            .iter()
            .filter(|p| p.leverage > self.config.max_leverage_ratio)
        {
            let amount = position.amount * REDUCTION_FRACTION;
            match self
                .ctx
                .gateway
                .close_position(account_id, &position.symbol, amount, None)
                .await
            {
                Ok(order) => {
                    reduced += 1;
                    // Keep the stored legs at the size left open on the venue
                    let remaining = ((position.amount - order.filled) / position.amount).max(0.0);
                    self.ctx.state.write(|state| {
                        if let Some(account) = state.account_mut(account_id) {
                            account.scale_legs(&position.symbol, remaining);
                        }
                    });
                    warn!(
                        account_id,
                        symbol = %position.symbol,
                        leverage = position.leverage,
                        "Reduced position by {:.0}%",
                        REDUCTION_FRACTION * 100.0
                    );
                    self.ctx
                        .state
                        .record(
                            Transaction::new(account_id, TransactionKind::RiskReduction, order.filled)
                                .with_symbol(&position.symbol)
                                .with_reference(order.order_id),
                        )
                        .await;
                }
                Err(e) => {
                    error!(account_id, symbol = %position.symbol, "Failed to reduce position: {}", e);
                    self.ctx
                        .alerts
                        .send(
                            &format!(
                                "Failed to reduce {} on {}: {}",
                                position.symbol, account_id, e
                            ),
                            AlertLevel::Error,
                        )
                        .await;
                }
            }
        }

        if reduced > 0 {
            self.ctx.state.persist_account(account_id).await;
            self.ctx
                .alerts
                .send(
                    &format!(
                        "Risk reduced on {}: {} position(s) cut by {:.0}%",
                        account_id,
                        reduced,
                        REDUCTION_FRACTION * 100.0
                    ),
                    AlertLevel::Warning,
                )
                .await;
        }
        reduced
    }

    /// Raise the stored level only. Escalation bookkeeping stays with the sweep.
    fn mark_high(&self, account_id: &str) {
        self.ctx.state.set_risk_level(account_id, RiskLevel::High);
    }

    pub async fn handle_account_error(&self, account_id: &str, message: &str) {
        error!(account_id, "Account error: {}", message);
        self.ctx
            .alerts
            .send(
                &format!("Account {} error: {}", account_id, message),
                AlertLevel::Error,
            )
            .await;
        self.mark_high(account_id);
        self.enforce_risk_limits(account_id).await;
    }

    pub async fn handle_operation_failure(&self, account_id: &str, results: &BatchResult) {
        let details: Vec<String> = results
            .failures()
            .iter()
            .map(|r| {
                format!(
                    "- {}: {}",
                    r.operation_id,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        error!(account_id, failed = details.len(), "Critical operations failed");
        self.ctx
            .alerts
            .send(
                &format!(
                    "Critical operations failed for {}:\n{}",
                    account_id,
                    details.join("\n")
                ),
                AlertLevel::Error,
            )
            .await;
        self.mark_high(account_id);
        self.enforce_risk_limits(account_id).await;
    }

    /// Deactivate the strategy and stop every loop
    pub async fn trigger_emergency_stop(&self, reason: &str) {
        error!("🚨 EMERGENCY STOP: {}", reason);
        self.ctx
            .alerts
            .send(&format!("Emergency stop: {}", reason), AlertLevel::Critical)
            .await;

        self.ctx.state.write(|state| {
            state.is_active = false;
            state.touch();
        });
        self.stop.trigger();
        self.ctx.shutdown.trigger();
        self.ctx.state.persist().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_classification() {
        assert_eq!(classify_funding_rate(0.0001, -0.01, -0.02), MarketCondition::Normal);
        assert_eq!(classify_funding_rate(-0.01, -0.01, -0.02), MarketCondition::Normal);
        assert_eq!(classify_funding_rate(-0.015, -0.01, -0.02), MarketCondition::Volatile);
        assert_eq!(classify_funding_rate(-0.025, -0.01, -0.02), MarketCondition::Extreme);
    }
}
