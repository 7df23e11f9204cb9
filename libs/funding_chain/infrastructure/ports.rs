//! Collaborator ports
//!
//! Everything the core needs from the outside world. Exchange connectors,
//! persistence and notification channels plug in behind these traits.

use super::state_store::{AccountStatePatch, AccountStateRecord, StoreError};
use crate::domain::{
    BatchResult, ConditionalOrderSpec, CriticalOperation, LeverageInfo, MarginMode, Order,
    Position, StrategySnapshot, Transaction,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type PortResult<T> = std::result::Result<T, CollaboratorError>;

// =============================================================================
// Market data
// =============================================================================

#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn price(&self, symbol: &str) -> PortResult<f64>;

    async fn funding_rate(&self, symbol: &str) -> PortResult<f64>;
}

// =============================================================================
// Execution
// =============================================================================

/// What an execution backend can do, declared once up front
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GatewayCapabilities {
    /// Executes a whole critical batch in one call
    pub native_batch: bool,
    /// Accepts resting reduce-only orders
    pub conditional_orders: bool,
    /// Linear perpetual symbols the backend lists
    pub linear_symbols: Vec<String>,
}

impl GatewayCapabilities {
    pub fn supports_linear(&self, symbol: &str) -> bool {
        self.linear_symbols.iter().any(|s| s == symbol)
    }
}

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    fn capabilities(&self) -> GatewayCapabilities;

    /// Market buy on margin, borrowing quote as needed
    async fn open_leveraged_long(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        leverage: f64,
    ) -> PortResult<Order>;

    async fn open_short(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        margin: MarginMode,
    ) -> PortResult<Order>;

    /// Market close when `limit_price` is `None`
    async fn close_position(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        limit_price: Option<f64>,
    ) -> PortResult<Order>;

    async fn repay_loan(&self, account_id: &str, asset: &str, amount: f64) -> PortResult<bool>;

    async fn place_conditional_orders(
        &self,
        account_id: &str,
        specs: &[ConditionalOrderSpec],
    ) -> PortResult<Vec<Order>>;

    /// Only called when `capabilities().native_batch` is set
    async fn execute_batch(
        &self,
        account_id: &str,
        operations: &[CriticalOperation],
    ) -> PortResult<BatchResult>;
}

// =============================================================================
// Ledger
// =============================================================================

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, account_id: &str, asset: &str) -> PortResult<f64>;

    async fn positions(&self, account_id: &str) -> PortResult<Vec<Position>>;

    async fn leverage_info(&self, account_id: &str) -> PortResult<LeverageInfo>;

    /// `Ok(false)` when the venue refuses the transfer
    async fn transfer(&self, from: &str, to: &str, asset: &str, amount: f64) -> PortResult<bool>;
}

// =============================================================================
// Persistence
// =============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self) -> Result<Option<StrategySnapshot>, StoreError>;

    async fn save_state(&self, snapshot: &StrategySnapshot) -> Result<(), StoreError>;

    async fn record_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn account_state(&self, account_id: &str)
        -> Result<Option<AccountStateRecord>, StoreError>;

    async fn update_account_state(
        &self,
        account_id: &str,
        patch: AccountStatePatch,
    ) -> Result<AccountStateRecord, StoreError>;
}
