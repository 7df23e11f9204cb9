//! Strategy and risk configuration
//!
//! Chain sizing, instrument selection and risk thresholds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the capital-chained strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Exchange identifier used to name accounts (`{exchange_id}_sub_{i}`)
    #[serde(default = "default_exchange_id")]
    pub exchange_id: String,

    /// Number of chained sub-accounts
    #[serde(default = "default_accounts_count")]
    pub accounts_count: usize,

    /// Quote capital transferred into the first account
    #[serde(default = "default_account_capital")]
    pub account_capital: f64,

    /// Borrowed quote per unit of capital on the spot leg
    #[serde(default = "default_leverage_ratio")]
    pub leverage_ratio: f64,

    /// Loss (in quote) on the short legs that defines the target price
    #[serde(default = "default_target_loss")]
    pub target_loss: f64,

    /// Fraction of the base balance kept for the funding leg (e.g., 0.15 = 15%)
    #[serde(default = "default_funding_allocation")]
    pub funding_allocation: f64,

    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_base_asset")]
    pub base_asset: String,

    #[serde(default = "default_spot_symbol")]
    pub spot_symbol: String,

    /// Linear hedge symbols; the first is the primary leg, the rest are
    /// candidates for the second leg in order of preference
    #[serde(default = "default_hedge_symbols")]
    pub hedge_symbols: Vec<String>,

    /// Coin-margined perpetual used for funding collection
    #[serde(default = "default_funding_symbol")]
    pub funding_symbol: String,

    #[serde(default = "default_target_poll_interval_ms")]
    pub target_poll_interval_ms: u64,

    #[serde(default = "default_funding_check_interval_secs")]
    pub funding_check_interval_secs: u64,

    #[serde(default = "default_driver_tick_ms")]
    pub driver_tick_ms: u64,

    /// Fraction of the target price at which the target counts as reached
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,
}

fn default_exchange_id() -> String {
    "binance".to_string()
}

fn default_accounts_count() -> usize {
    20
}

fn default_account_capital() -> f64 {
    10000.0
}

fn default_leverage_ratio() -> f64 {
    4.0
}

fn default_target_loss() -> f64 {
    10000.0
}

fn default_funding_allocation() -> f64 {
    0.15 // 15%
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_base_asset() -> String {
    "BTC".to_string()
}

fn default_spot_symbol() -> String {
    "BTC/USDT".to_string()
}

fn default_hedge_symbols() -> Vec<String> {
    vec!["BTC/USDT".to_string(), "BTC/USDC".to_string()]
}

fn default_funding_symbol() -> String {
    "BTC/USD".to_string()
}

fn default_target_poll_interval_ms() -> u64 {
    500
}

fn default_funding_check_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_driver_tick_ms() -> u64 {
    1000
}

fn default_price_tolerance() -> f64 {
    0.995
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            exchange_id: default_exchange_id(),
            accounts_count: default_accounts_count(),
            account_capital: default_account_capital(),
            leverage_ratio: default_leverage_ratio(),
            target_loss: default_target_loss(),
            funding_allocation: default_funding_allocation(),
            quote_asset: default_quote_asset(),
            base_asset: default_base_asset(),
            spot_symbol: default_spot_symbol(),
            hedge_symbols: default_hedge_symbols(),
            funding_symbol: default_funding_symbol(),
            target_poll_interval_ms: default_target_poll_interval_ms(),
            funding_check_interval_secs: default_funding_check_interval_secs(),
            driver_tick_ms: default_driver_tick_ms(),
            price_tolerance: default_price_tolerance(),
        }
    }
}

impl StrategyConfig {
    /// Account that funds the head of the chain
    pub fn master_account_id(&self) -> String {
        format!("{}_main", self.exchange_id)
    }

    pub fn primary_hedge_symbol(&self) -> &str {
        self.hedge_symbols
            .first()
            .map(String::as_str)
            .unwrap_or(self.spot_symbol.as_str())
    }

    pub fn target_poll_interval(&self) -> Duration {
        Duration::from_millis(self.target_poll_interval_ms)
    }

    pub fn funding_check_interval(&self) -> Duration {
        Duration::from_secs(self.funding_check_interval_secs)
    }

    pub fn driver_tick(&self) -> Duration {
        Duration::from_millis(self.driver_tick_ms)
    }
}

/// Risk thresholds shared by the scorer, the enforcer and the funding monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_leverage_ratio")]
    pub max_leverage_ratio: f64,

    /// Funding rate below which funding collection is abandoned
    #[serde(default = "default_min_funding_rate")]
    pub min_funding_rate: f64,

    /// Funding rate below which the market counts as EXTREME
    #[serde(default = "default_emergency_exit_threshold")]
    pub emergency_exit_threshold: f64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Stop the whole strategy when the market turns EXTREME
    #[serde(default)]
    pub halt_on_extreme_market: bool,
}

fn default_max_leverage_ratio() -> f64 {
    10.0
}

fn default_min_funding_rate() -> f64 {
    -0.01 // -1%
}

fn default_emergency_exit_threshold() -> f64 {
    -0.02 // -2%
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage_ratio: default_max_leverage_ratio(),
            min_funding_rate: default_min_funding_rate(),
            emergency_exit_threshold: default_emergency_exit_threshold(),
            sweep_interval_secs: default_sweep_interval_secs(),
            halt_on_extreme_market: false,
        }
    }
}

impl RiskConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
