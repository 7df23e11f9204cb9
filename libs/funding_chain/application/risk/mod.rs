//! Risk scoring and enforcement

pub mod enforcer;
pub mod scorer;

pub use enforcer::{classify_funding_rate, RiskEnforcer, SweepReport, REDUCTION_FRACTION};
pub use scorer::{
    level_for_distance, level_for_leverage, liquidation_distance, RiskScorer,
    HIGH_LIQUIDATION_DISTANCE, MEDIUM_LEVERAGE_FRACTION, MEDIUM_LIQUIDATION_DISTANCE,
};
