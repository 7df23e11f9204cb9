//! Funding rate monitor
//!
//! Watches one FUNDING_COLLECTION account. Checks the funding rate on every
//! interval, logs the estimated income of the coin-margined short, and exits
//! funding collection once the rate drops below the configured minimum.
//! A failed exit is retried on the next interval.

use super::{MonitorControl, MonitorOutcome};
use crate::application::chain::ChainCoordinator;
use crate::application::context::EngineContext;
use crate::application::errors::{EngineError, EngineResult};
use crate::domain::AccountStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn should_exit(rate: f64, min_funding_rate: f64) -> bool {
    rate < min_funding_rate
}

/// Income of one funding interval for a short of `amount` entered at `entry_price`
pub fn estimated_income(amount: f64, entry_price: f64, rate: f64) -> f64 {
    amount * entry_price * rate.abs()
}

pub struct FundingRateMonitor {
    account_id: String,
    ctx: EngineContext,
    chain: Arc<ChainCoordinator>,
    funding_symbol: String,
    min_funding_rate: f64,
    check_interval: Duration,
    control: MonitorControl,
}

impl FundingRateMonitor {
    pub fn new(
        account_id: impl Into<String>,
        ctx: EngineContext,
        chain: Arc<ChainCoordinator>,
        min_funding_rate: f64,
        control: MonitorControl,
    ) -> Self {
        let config = chain.config();
        Self {
            account_id: account_id.into(),
            funding_symbol: config.funding_symbol.clone(),
            check_interval: config.funding_check_interval(),
            min_funding_rate,
            ctx,
            chain,
            control,
        }
    }

    pub async fn run(self) -> EngineResult<MonitorOutcome> {
        let id = self.account_id.as_str();
        info!(
            account_id = id,
            symbol = %self.funding_symbol,
            min_rate = self.min_funding_rate,
            "💰 Funding monitor started"
        );

        loop {
            if !self.control.is_active() {
                info!(account_id = id, "Funding monitor cancelled");
                return Ok(MonitorOutcome::Cancelled);
            }
            match self.ctx.state.status(id) {
                Some(AccountStatus::FundingCollection) => {}
                Some(other) => return Ok(MonitorOutcome::Superseded(other)),
                None => return Err(EngineError::UnknownAccount(id.to_string())),
            }

            match self.ctx.feed.funding_rate(&self.funding_symbol).await {
                Ok(rate) if should_exit(rate, self.min_funding_rate) => {
                    warn!(
                        account_id = id,
                        rate,
                        min_rate = self.min_funding_rate,
                        "Funding rate below minimum, exiting funding collection"
                    );
                    match self.chain.exit_funding(id).await {
                        Ok(_) => return Ok(MonitorOutcome::Completed),
                        Err(e) => error!(account_id = id, "Funding exit failed, retrying next interval: {}", e),
                    }
                }
                Ok(rate) => self.log_income(rate).await,
                Err(e) => error!(account_id = id, "Failed to read funding rate: {}", e),
            }

            if !self.control.sleep(self.check_interval).await {
                info!(account_id = id, "Funding monitor cancelled");
                return Ok(MonitorOutcome::Cancelled);
            }
        }
    }

    async fn log_income(&self, rate: f64) {
        let id = self.account_id.as_str();
        let positions = match self.ctx.ledger.positions(id).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(account_id = id, rate, "Could not read positions for income estimate: {}", e);
                return;
            }
        };

        match positions.iter().find(|p| p.is_coin_margined() && p.is_short()) {
            Some(short) => info!(
                account_id = id,
                rate,
                amount = short.amount,
                income = estimated_income(short.amount, short.entry_price, rate),
                "Funding collection"
            ),
            None => warn!(account_id = id, rate, "No coin-margined short found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_strictly_below_minimum() {
        assert!(should_exit(-0.015, -0.01));
        assert!(!should_exit(-0.01, -0.01));
        assert!(!should_exit(0.0001, -0.01));
    }

    #[test]
    fn test_income_uses_rate_magnitude() {
        let income = estimated_income(0.125, 60000.0, -0.0002);
        assert!((income - 1.5).abs() < 1e-9);
        assert_eq!(estimated_income(0.125, 60000.0, 0.0002), income);
    }
}
