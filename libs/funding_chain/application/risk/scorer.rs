//! Risk scoring
//!
//! Maps an account's positions and leverage to a [`RiskLevel`]:
//!
//! | signal                                   | level  |
//! |------------------------------------------|--------|
//! | any liquidation distance < 5%            | HIGH   |
//! | any liquidation distance < 15%           | MEDIUM |
//! | effective leverage > max                 | HIGH   |
//! | effective leverage > 70% of max          | MEDIUM |
//! | collaborator failure while scoring       | MEDIUM |
//!
//! The result is the maximum over all signals.

use crate::domain::{PositionSide, RiskLevel};
use crate::infrastructure::{Ledger, MarketFeed, PortResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub const HIGH_LIQUIDATION_DISTANCE: f64 = 0.05;
pub const MEDIUM_LIQUIDATION_DISTANCE: f64 = 0.15;
pub const MEDIUM_LEVERAGE_FRACTION: f64 = 0.7;

/// Relative distance from the current price to the liquidation price.
///
/// Negative once the price has moved past liquidation.
pub fn liquidation_distance(side: PositionSide, current_price: f64, liquidation_price: f64) -> f64 {
    match side {
        PositionSide::Long => (current_price - liquidation_price) / current_price,
        PositionSide::Short => (liquidation_price - current_price) / current_price,
    }
}

pub fn level_for_distance(distance: f64) -> RiskLevel {
    if distance < HIGH_LIQUIDATION_DISTANCE {
        RiskLevel::High
    } else if distance < MEDIUM_LIQUIDATION_DISTANCE {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn level_for_leverage(ratio: f64, max_leverage_ratio: f64) -> RiskLevel {
    if ratio > max_leverage_ratio {
        RiskLevel::High
    } else if ratio > max_leverage_ratio * MEDIUM_LEVERAGE_FRACTION {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub struct RiskScorer {
    feed: Arc<dyn MarketFeed>,
    ledger: Arc<dyn Ledger>,
    max_leverage_ratio: f64,
}

impl RiskScorer {
    pub fn new(feed: Arc<dyn MarketFeed>, ledger: Arc<dyn Ledger>, max_leverage_ratio: f64) -> Self {
        Self {
            feed,
            ledger,
            max_leverage_ratio,
        }
    }

    pub fn max_leverage_ratio(&self) -> f64 {
        self.max_leverage_ratio
    }

    /// Score an account. Never fails: any error while reading scores MEDIUM.
    pub async fn score(&self, account_id: &str) -> RiskLevel {
        match self.try_score(account_id).await {
            Ok(level) => level,
            Err(e) => {
                warn!(account_id, "Risk check failed, assuming MEDIUM: {}", e);
                RiskLevel::Medium
            }
        }
    }

    async fn try_score(&self, account_id: &str) -> PortResult<RiskLevel> {
        let positions = self.ledger.positions(account_id).await?;
        let mut level = RiskLevel::Low;

        for position in &positions {
            let Some(liquidation_price) = position.liquidation_price else {
                continue;
            };
            let price = self.feed.price(&position.symbol).await?;
            let distance = liquidation_distance(position.side, price, liquidation_price);
            debug!(account_id, symbol = %position.symbol, distance, "Liquidation distance");
            match level_for_distance(distance) {
                RiskLevel::High => return Ok(RiskLevel::High),
                other => level = level.max(other),
            }
        }

        let leverage = self.ledger.leverage_info(account_id).await?;
        let by_leverage = level_for_leverage(leverage.effective_ratio(), self.max_leverage_ratio);
        Ok(level.max(by_leverage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_thresholds() {
        assert_eq!(level_for_distance(0.049), RiskLevel::High);
        assert_eq!(level_for_distance(0.05), RiskLevel::Medium);
        assert_eq!(level_for_distance(0.149), RiskLevel::Medium);
        assert_eq!(level_for_distance(0.15), RiskLevel::Low);
    }

    #[test]
    fn test_leverage_thresholds() {
        assert_eq!(level_for_leverage(1.0, 10.0), RiskLevel::Low);
        assert_eq!(level_for_leverage(6.9, 10.0), RiskLevel::Low);
        assert_eq!(level_for_leverage(7.5, 10.0), RiskLevel::Medium);
        assert_eq!(level_for_leverage(10.0, 10.0), RiskLevel::Medium);
        assert_eq!(level_for_leverage(10.5, 10.0), RiskLevel::High);
    }

    #[test]
    fn test_liquidation_distance_by_side() {
        let long = liquidation_distance(PositionSide::Long, 100.0, 97.0);
        assert!((long - 0.03).abs() < 1e-12);
        assert_eq!(level_for_distance(long), RiskLevel::High);

        let short = liquidation_distance(PositionSide::Short, 100.0, 104.0);
        assert!((short - 0.04).abs() < 1e-12);

        // Short already past liquidation
        let past = liquidation_distance(PositionSide::Short, 100.0, 96.0);
        assert!(past < 0.0);
        assert_eq!(level_for_distance(past), RiskLevel::High);
    }
}
