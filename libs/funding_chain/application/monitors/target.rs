//! Target monitor
//!
//! Watches one WAITING_TARGET account. Places the resting exit orders once,
//! then polls the spot price and the account's risk level until either the
//! target is reached or risk turns HIGH. The critical batch runs exactly
//! once per monitor; the loop never retriggers.

use super::{MonitorControl, MonitorOutcome};
use crate::application::chain::ChainCoordinator;
use crate::application::context::EngineContext;
use crate::application::errors::{EngineError, EngineResult};
use crate::domain::{
    AccountStatus, ConditionalOrderSpec, HedgeEntry, OrderSide, OrderType, RiskLevel,
};
use crate::infrastructure::AlertLevel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress is logged once per this many polls
pub const LOG_EVERY_POLLS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    TargetReached,
    HighRisk,
}

pub fn trigger_reason(price: f64, target_price: f64, tolerance: f64, risk: RiskLevel) -> Option<TriggerReason> {
    if price >= target_price * tolerance {
        Some(TriggerReason::TargetReached)
    } else if risk == RiskLevel::High {
        Some(TriggerReason::HighRisk)
    } else {
        None
    }
}

/// Reduce-only limit buys at the target, one per short leg
pub fn exit_order_specs(hedge: &HedgeEntry) -> Vec<ConditionalOrderSpec> {
    hedge
        .legs
        .iter()
        .map(|leg| ConditionalOrderSpec {
            symbol: leg.symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            amount: leg.amount,
            price: hedge.target_price(),
            reduce_only: true,
        })
        .collect()
}

pub struct TargetMonitor {
    account_id: String,
    hedge: HedgeEntry,
    ctx: EngineContext,
    chain: Arc<ChainCoordinator>,
    spot_symbol: String,
    poll_interval: Duration,
    price_tolerance: f64,
    place_orders: bool,
    control: MonitorControl,
}

impl TargetMonitor {
    /// `place_orders` is false when the exit orders already rest on the
    /// venue, e.g. for an account recovered after a restart
    pub fn new(
        account_id: impl Into<String>,
        hedge: HedgeEntry,
        ctx: EngineContext,
        chain: Arc<ChainCoordinator>,
        place_orders: bool,
        control: MonitorControl,
    ) -> Self {
        let config = chain.config();
        Self {
            account_id: account_id.into(),
            hedge,
            spot_symbol: config.spot_symbol.clone(),
            poll_interval: config.target_poll_interval(),
            price_tolerance: config.price_tolerance,
            ctx,
            chain,
            place_orders,
            control,
        }
    }

    pub async fn run(self) -> EngineResult<MonitorOutcome> {
        let id = self.account_id.as_str();
        if !self.control.is_active() {
            return Ok(MonitorOutcome::Cancelled);
        }

        info!(
            account_id = id,
            entry_price = self.hedge.entry_price(),
            target_price = self.hedge.target_price(),
            "🎯 Target monitor started"
        );

        if self.place_orders {
            self.place_exit_orders().await;
        }

        let mut polls: u64 = 0;
        loop {
            if !self.control.is_active() {
                info!(account_id = id, "Target monitor cancelled");
                return Ok(MonitorOutcome::Cancelled);
            }
            match self.ctx.state.status(id) {
                Some(AccountStatus::WaitingTarget) => {}
                Some(other) => return Ok(MonitorOutcome::Superseded(other)),
                None => return Err(EngineError::UnknownAccount(id.to_string())),
            }

            polls += 1;
            match self.ctx.feed.price(&self.spot_symbol).await {
                Ok(price) => {
                    let risk = self.ctx.state.risk_level(id).unwrap_or_default();
                    if polls % LOG_EVERY_POLLS == 0 {
                        info!(
                            account_id = id,
                            price,
                            target_price = self.hedge.target_price(),
                            risk = %risk,
                            "Waiting for target"
                        );
                    }

                    if let Some(reason) =
                        trigger_reason(price, self.hedge.target_price(), self.price_tolerance, risk)
                    {
                        info!(account_id = id, price, ?reason, "Target trigger fired");
                        let outcome = self.chain.on_target_reached(id).await?;
                        return Ok(MonitorOutcome::Triggered(outcome));
                    }
                }
                Err(e) => warn!(account_id = id, "Price read failed: {}", e),
            }

            if !self.control.sleep(self.poll_interval).await {
                info!(account_id = id, "Target monitor cancelled");
                return Ok(MonitorOutcome::Cancelled);
            }
        }
    }

    async fn place_exit_orders(&self) {
        let id = self.account_id.as_str();
        if !self.ctx.gateway.capabilities().conditional_orders {
            debug!(account_id = id, "Backend has no conditional orders, polling only");
            return;
        }

        let specs = exit_order_specs(&self.hedge);
        match self.ctx.gateway.place_conditional_orders(id, &specs).await {
            Ok(orders) => info!(
                account_id = id,
                count = orders.len(),
                price = self.hedge.target_price(),
                "Exit orders placed"
            ),
            Err(e) => {
                warn!(account_id = id, "Failed to place exit orders: {}", e);
                self.ctx
                    .alerts
                    .send(
                        &format!("Exit orders for {} not placed: {}. Polling only", id, e),
                        AlertLevel::Warning,
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HedgeLeg, PriceTarget};
    use chrono::Utc;

    #[test]
    fn test_trigger_on_price_with_tolerance() {
        let target = 62000.0;
        assert_eq!(trigger_reason(61000.0, target, 0.995, RiskLevel::Low), None);
        assert_eq!(
            trigger_reason(61700.0, target, 0.995, RiskLevel::Low),
            Some(TriggerReason::TargetReached)
        );
        assert_eq!(
            trigger_reason(63000.0, target, 0.995, RiskLevel::High),
            Some(TriggerReason::TargetReached)
        );
    }

    #[test]
    fn test_trigger_on_high_risk_below_target() {
        assert_eq!(
            trigger_reason(50000.0, 62000.0, 0.995, RiskLevel::High),
            Some(TriggerReason::HighRisk)
        );
        assert_eq!(trigger_reason(50000.0, 62000.0, 0.995, RiskLevel::Medium), None);
    }

    #[test]
    fn test_exit_orders_cover_every_leg() {
        let hedge = HedgeEntry {
            target: PriceTarget::compute(60000.0, 10000.0),
            leverage_amount: 40000.0,
            borrowed_amount: 40000.0,
            initial_notional: 50000.0,
            base_amount: 0.8,
            spot_order_id: None,
            legs: vec![
                HedgeLeg { symbol: "BTC/USDT".into(), amount: 0.4, order_id: "a".into() },
                HedgeLeg { symbol: "BTC/USDC".into(), amount: 0.4, order_id: "b".into() },
            ],
            entered_at: Utc::now(),
        };

        let specs = exit_order_specs(&hedge);
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.reduce_only && s.side == OrderSide::Buy));
        assert!(specs.iter().all(|s| (s.price - 60200.0).abs() < 1e-6));
        assert!((specs.iter().map(|s| s.amount).sum::<f64>() - 0.8).abs() < 1e-12);
    }
}
