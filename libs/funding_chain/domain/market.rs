//! Market and ledger models shared with the collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Margin model of a derivative position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    /// Quote-margined (USDT/USDC perpetuals)
    Linear,
    /// Base-margined (inverse perpetuals)
    Coin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled: f64,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub amount: f64,
    pub entry_price: f64,
    pub leverage: f64,
    pub margin_mode: MarginMode,
    pub liquidation_price: Option<f64>,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn is_coin_margined(&self) -> bool {
        self.margin_mode == MarginMode::Coin
    }

    pub fn is_short(&self) -> bool {
        self.side == PositionSide::Short
    }
}

/// Margin loan held on an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginPosition {
    pub symbol: String,
    pub leverage: f64,
    pub borrowed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeverageInfo {
    pub margin_positions: Vec<MarginPosition>,
}

impl LeverageInfo {
    /// Highest leverage across margin positions, 1.0 when there are none
    pub fn effective_ratio(&self) -> f64 {
        self.margin_positions
            .iter()
            .map(|p| p.leverage)
            .reduce(f64::max)
            .unwrap_or(1.0)
    }

    pub fn total_borrowed(&self) -> f64 {
        self.margin_positions.iter().map(|p| p.borrowed).sum()
    }
}

/// Resting order placed on the venue ahead of time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: f64,
    pub price: f64,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketCondition {
    Normal,
    Volatile,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    SpotLeveragedBuy,
    OpenShort,
    ClosePosition,
    RepayLoan,
    OpenCoinMarginShort,
    RiskReduction,
}

/// One line of an account's transaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub account_id: String,
    pub kind: TransactionKind,
    pub symbol: Option<String>,
    pub amount: f64,
    pub price: Option<f64>,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(account_id: impl Into<String>, kind: TransactionKind, amount: f64) -> Self {
        Self {
            account_id: account_id.into(),
            kind,
            symbol: None,
            amount,
            price: None,
            reference: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Split `BTC/USDT` into (`BTC`, `USDT`)
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    let pair = symbol.split(':').next().unwrap_or(symbol);
    match pair.split_once('/') {
        Some((base, quote)) => (base, quote),
        None => (pair, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_leverage() {
        assert_eq!(LeverageInfo::default().effective_ratio(), 1.0);

        let info = LeverageInfo {
            margin_positions: vec![
                MarginPosition { symbol: "BTC/USDT".into(), leverage: 3.0, borrowed: 100.0 },
                MarginPosition { symbol: "ETH/USDT".into(), leverage: 8.0, borrowed: 50.0 },
            ],
        };
        assert_eq!(info.effective_ratio(), 8.0);
        assert_eq!(info.total_borrowed(), 150.0);
    }

    #[test]
    fn test_split_symbol() {
        assert_eq!(split_symbol("BTC/USDT"), ("BTC", "USDT"));
        assert_eq!(split_symbol("BTC/USD:BTC"), ("BTC", "USD"));
        assert_eq!(split_symbol("BTC"), ("BTC", ""));
    }
}
