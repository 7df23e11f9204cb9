//! Paper exchange
//!
//! In-memory venue implementing [`MarketFeed`], [`ExecutionGateway`] and
//! [`Ledger`]. Orders fill instantly at the current price. There is no
//! margin solvency model: balances may go negative and only loans are
//! checked on repay. Faults can be injected per operation so failure paths
//! can be driven deterministically.

use super::config::{PaperConfig, StrategyConfig};
use super::ports::{
    CollaboratorError, ExecutionGateway, GatewayCapabilities, Ledger, MarketFeed, PortResult,
};
use crate::domain::{
    split_symbol, BatchResult, ConditionalOrderSpec, CriticalOperation, LeverageInfo, MarginMode,
    MarginPosition, OperationResult, Order, OrderSide, OrderStatus, OrderType, Position,
    PositionSide,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const EPSILON: f64 = 1e-9;

/// Operation that should fail while the fault is injected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PaperFault {
    PriceFeed,
    FundingFeed,
    Ledger,
    Transfer,
    OpenLong,
    OpenShort(String),
    ClosePosition(String),
    RepayLoan,
    ConditionalOrders,
    Batch,
}

#[derive(Default)]
struct PaperBook {
    /// Last price per base asset
    prices: HashMap<String, f64>,
    funding_rates: HashMap<String, f64>,
    balances: HashMap<String, HashMap<String, f64>>,
    positions: HashMap<String, Vec<Position>>,
    margin: HashMap<String, Vec<MarginPosition>>,
    conditional: HashMap<String, Vec<ConditionalOrderSpec>>,
    faults: HashSet<PaperFault>,
    order_seq: u64,
}

impl PaperBook {
    fn check(&self, fault: &PaperFault) -> PortResult<()> {
        if self.faults.contains(fault) {
            return Err(CollaboratorError::Transient(format!("injected fault: {:?}", fault)));
        }
        Ok(())
    }

    fn price(&self, symbol: &str) -> PortResult<f64> {
        let (base, _) = split_symbol(symbol);
        self.prices
            .get(base)
            .copied()
            .ok_or_else(|| CollaboratorError::NotFound(format!("no price for {}", symbol)))
    }

    fn balance(&self, account_id: &str, asset: &str) -> f64 {
        self.balances
            .get(account_id)
            .and_then(|b| b.get(asset))
            .copied()
            .unwrap_or(0.0)
    }

    fn adjust(&mut self, account_id: &str, asset: &str, delta: f64) {
        *self
            .balances
            .entry(account_id.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_insert(0.0) += delta;
    }

    #[allow(clippy::too_many_arguments)]
    fn order(
        &mut self,
        account_id: &str,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        amount: f64,
        price: f64,
        status: OrderStatus,
        reduce_only: bool,
    ) -> Order {
        self.order_seq += 1;
        Order {
            order_id: format!("paper-{}", self.order_seq),
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            amount,
            price: Some(price),
            status,
            filled: if status == OrderStatus::Filled { amount } else { 0.0 },
            reduce_only,
            timestamp: Utc::now(),
        }
    }
}

pub struct PaperExchange {
    book: Mutex<PaperBook>,
    capabilities: GatewayCapabilities,
    position_leverage: f64,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(PaperBook::default()),
            capabilities: GatewayCapabilities {
                native_batch: false,
                conditional_orders: true,
                linear_symbols: vec!["BTC/USDT".to_string(), "BTC/USDC".to_string()],
            },
            position_leverage: 5.0,
        }
    }

    /// Seeded venue for the configured instruments
    pub fn from_config(paper: &PaperConfig, strategy: &StrategyConfig) -> Self {
        let exchange = Self::new()
            .with_capabilities(GatewayCapabilities {
                native_batch: false,
                conditional_orders: true,
                linear_symbols: strategy.hedge_symbols.clone(),
            })
            .with_position_leverage(paper.position_leverage);
        exchange.set_price(&strategy.spot_symbol, paper.initial_price);
        exchange.set_funding_rate(&strategy.funding_symbol, paper.funding_rate);
        exchange.deposit(
            &strategy.master_account_id(),
            &strategy.quote_asset,
            paper.master_balance,
        );
        exchange
    }

    pub fn with_capabilities(mut self, capabilities: GatewayCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_position_leverage(mut self, leverage: f64) -> Self {
        self.position_leverage = leverage;
        self
    }

    /// Set the price of the symbol's base asset (shared by all its pairs)
    pub fn set_price(&self, symbol: &str, price: f64) {
        let (base, _) = split_symbol(symbol);
        self.book.lock().prices.insert(base.to_string(), price);
    }

    pub fn set_funding_rate(&self, symbol: &str, rate: f64) {
        self.book
            .lock()
            .funding_rates
            .insert(symbol.to_string(), rate);
    }

    pub fn deposit(&self, account_id: &str, asset: &str, amount: f64) {
        self.book.lock().adjust(account_id, asset, amount);
    }

    pub fn inject(&self, fault: PaperFault) {
        self.book.lock().faults.insert(fault);
    }

    pub fn clear(&self, fault: &PaperFault) {
        self.book.lock().faults.remove(fault);
    }

    pub fn conditional_orders(&self, account_id: &str) -> Vec<ConditionalOrderSpec> {
        self.book
            .lock()
            .conditional
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn outstanding_loan(&self, account_id: &str) -> f64 {
        self.book
            .lock()
            .margin
            .get(account_id)
            .map(|m| m.iter().map(|p| p.borrowed).sum())
            .unwrap_or(0.0)
    }

    pub fn open_positions(&self, account_id: &str) -> Vec<Position> {
        self.book
            .lock()
            .positions
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Override leverage and liquidation price of an open position
    pub fn set_position_risk(
        &self,
        account_id: &str,
        symbol: &str,
        leverage: f64,
        liquidation_price: Option<f64>,
    ) {
        let mut book = self.book.lock();
        if let Some(positions) = book.positions.get_mut(account_id) {
            for position in positions.iter_mut().filter(|p| p.symbol == symbol) {
                position.leverage = leverage;
                position.liquidation_price = liquidation_price;
            }
        }
    }

    /// Override leverage of every margin loan on the account
    pub fn set_margin_leverage(&self, account_id: &str, leverage: f64) {
        let mut book = self.book.lock();
        if let Some(loans) = book.margin.get_mut(account_id) {
            for loan in loans.iter_mut() {
                loan.leverage = leverage;
            }
        }
    }

    async fn run_operation(&self, account_id: &str, op: &CriticalOperation) -> PortResult<serde_json::Value> {
        match op {
            CriticalOperation::ClosePosition {
                symbol,
                amount,
                limit_price,
            } => {
                let order = self
                    .close_position(account_id, symbol, *amount, *limit_price)
                    .await?;
                Ok(json!({ "order_id": order.order_id, "filled": order.filled }))
            }
            CriticalOperation::RepayLoan { asset, amount } => {
                if self.repay_loan(account_id, asset, *amount).await? {
                    Ok(json!({ "repaid": amount }))
                } else {
                    Err(CollaboratorError::Rejected("repay refused".to_string()))
                }
            }
            CriticalOperation::OpenCoinMarginShort { symbol, amount } => {
                let order = self
                    .open_short(account_id, symbol, *amount, MarginMode::Coin)
                    .await?;
                Ok(json!({ "order_id": order.order_id, "filled": order.filled }))
            }
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketFeed for PaperExchange {
    async fn price(&self, symbol: &str) -> PortResult<f64> {
        let book = self.book.lock();
        book.check(&PaperFault::PriceFeed)?;
        book.price(symbol)
    }

    async fn funding_rate(&self, symbol: &str) -> PortResult<f64> {
        let book = self.book.lock();
        book.check(&PaperFault::FundingFeed)?;
        book.funding_rates
            .get(symbol)
            .copied()
            .ok_or_else(|| CollaboratorError::NotFound(format!("no funding rate for {}", symbol)))
    }
}

#[async_trait]
impl ExecutionGateway for PaperExchange {
    fn capabilities(&self) -> GatewayCapabilities {
        self.capabilities.clone()
    }

    async fn open_leveraged_long(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        leverage: f64,
    ) -> PortResult<Order> {
        let mut book = self.book.lock();
        book.check(&PaperFault::OpenLong)?;
        let price = book.price(symbol)?;
        let (base, quote) = split_symbol(symbol);

        let cost = amount * price;
        let own = book.balance(account_id, quote).max(0.0);
        let borrowed = (cost - own).max(0.0);
        let equity = cost - borrowed;

        book.adjust(account_id, quote, -equity);
        book.adjust(account_id, base, amount);
        if borrowed > EPSILON {
            let effective = if equity > EPSILON { cost / equity } else { leverage };
            book.margin
                .entry(account_id.to_string())
                .or_default()
                .push(MarginPosition {
                    symbol: symbol.to_string(),
                    leverage: effective,
                    borrowed,
                });
        }

        debug!(
            "Paper: {} bought {:.6} {} at {:.2} (borrowed {:.2})",
            account_id, amount, symbol, price, borrowed
        );
        Ok(book.order(
            account_id,
            symbol,
            OrderSide::Buy,
            OrderType::Market,
            amount,
            price,
            OrderStatus::Filled,
            false,
        ))
    }

    async fn open_short(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        margin: MarginMode,
    ) -> PortResult<Order> {
        let mut book = self.book.lock();
        book.check(&PaperFault::OpenShort(symbol.to_string()))?;
        if margin == MarginMode::Linear && !self.capabilities.supports_linear(symbol) {
            return Err(CollaboratorError::NotFound(format!("{} is not listed", symbol)));
        }
        let price = book.price(symbol)?;
        let leverage = self.position_leverage;

        let positions = book.positions.entry(account_id.to_string()).or_default();
        match positions
            .iter_mut()
            .find(|p| p.symbol == symbol && p.margin_mode == margin && p.is_short())
        {
            Some(existing) => {
                let total = existing.amount + amount;
                existing.entry_price = (existing.entry_price * existing.amount + price * amount) / total;
                existing.amount = total;
                existing.liquidation_price = Some(existing.entry_price * (1.0 + 1.0 / leverage));
            }
            None => positions.push(Position {
                symbol: symbol.to_string(),
                side: PositionSide::Short,
                amount,
                entry_price: price,
                leverage,
                margin_mode: margin,
                liquidation_price: Some(price * (1.0 + 1.0 / leverage)),
                unrealized_pnl: 0.0,
            }),
        }

        Ok(book.order(
            account_id,
            symbol,
            OrderSide::Sell,
            OrderType::Market,
            amount,
            price,
            OrderStatus::Filled,
            false,
        ))
    }

    async fn close_position(
        &self,
        account_id: &str,
        symbol: &str,
        amount: f64,
        limit_price: Option<f64>,
    ) -> PortResult<Order> {
        let mut book = self.book.lock();
        book.check(&PaperFault::ClosePosition(symbol.to_string()))?;
        let market = book.price(symbol)?;
        let exec_price = limit_price.unwrap_or(market);

        let positions = book
            .positions
            .get_mut(account_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("no positions on {}", account_id)))?;
        let idx = positions
            .iter()
            .position(|p| p.symbol == symbol && p.amount > EPSILON)
            .ok_or_else(|| CollaboratorError::NotFound(format!("no open {} position", symbol)))?;

        let position = &mut positions[idx];
        let closed = if amount <= 0.0 || amount >= position.amount {
            position.amount
        } else {
            amount
        };
        let pnl = match position.side {
            PositionSide::Short => (position.entry_price - exec_price) * closed,
            PositionSide::Long => (exec_price - position.entry_price) * closed,
        };
        let side = match position.side {
            PositionSide::Short => OrderSide::Buy,
            PositionSide::Long => OrderSide::Sell,
        };
        let margin = position.margin_mode;
        position.amount -= closed;
        if position.amount <= EPSILON {
            positions.remove(idx);
        }

        let (base, quote) = split_symbol(symbol);
        match margin {
            MarginMode::Linear => book.adjust(account_id, quote, pnl),
            MarginMode::Coin => book.adjust(account_id, base, pnl / exec_price),
        }

        let order_type = if limit_price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        Ok(book.order(
            account_id,
            symbol,
            side,
            order_type,
            closed,
            exec_price,
            OrderStatus::Filled,
            true,
        ))
    }

    async fn repay_loan(&self, account_id: &str, asset: &str, amount: f64) -> PortResult<bool> {
        let mut book = self.book.lock();
        book.check(&PaperFault::RepayLoan)?;

        let loans = book.margin.entry(account_id.to_string()).or_default();
        let outstanding: f64 = loans.iter().map(|l| l.borrowed).sum();
        if amount > outstanding + EPSILON {
            return Ok(false);
        }

        let mut remaining = amount;
        for loan in loans.iter_mut() {
            let paid = remaining.min(loan.borrowed);
            loan.borrowed -= paid;
            remaining -= paid;
        }
        loans.retain(|l| l.borrowed > EPSILON);
        book.adjust(account_id, asset, -amount);
        Ok(true)
    }

    async fn place_conditional_orders(
        &self,
        account_id: &str,
        specs: &[ConditionalOrderSpec],
    ) -> PortResult<Vec<Order>> {
        if !self.capabilities.conditional_orders {
            return Err(CollaboratorError::Unsupported(
                "conditional orders".to_string(),
            ));
        }
        let mut book = self.book.lock();
        book.check(&PaperFault::ConditionalOrders)?;

        let orders = specs
            .iter()
            .map(|spec| {
                book.order(
                    account_id,
                    &spec.symbol,
                    spec.side,
                    spec.order_type,
                    spec.amount,
                    spec.price,
                    OrderStatus::Open,
                    spec.reduce_only,
                )
            })
            .collect();
        book.conditional
            .entry(account_id.to_string())
            .or_default()
            .extend(specs.iter().cloned());
        Ok(orders)
    }

    async fn execute_batch(
        &self,
        account_id: &str,
        operations: &[CriticalOperation],
    ) -> PortResult<BatchResult> {
        if !self.capabilities.native_batch {
            return Err(CollaboratorError::Unsupported("batch execution".to_string()));
        }
        self.book.lock().check(&PaperFault::Batch)?;

        let mut results = BatchResult::new();
        for (i, op) in operations.iter().enumerate() {
            let id = op.operation_id(i);
            let result = match self.run_operation(account_id, op).await {
                Ok(data) => OperationResult::ok(id, data),
                Err(e) => OperationResult::failed(id, e.to_string()),
            };
            results.insert(result);
        }
        Ok(results)
    }
}

#[async_trait]
impl Ledger for PaperExchange {
    async fn balance(&self, account_id: &str, asset: &str) -> PortResult<f64> {
        let book = self.book.lock();
        book.check(&PaperFault::Ledger)?;
        Ok(book.balance(account_id, asset))
    }

    async fn positions(&self, account_id: &str) -> PortResult<Vec<Position>> {
        let book = self.book.lock();
        book.check(&PaperFault::Ledger)?;
        let mut positions = book.positions.get(account_id).cloned().unwrap_or_default();
        for position in positions.iter_mut() {
            if let Ok(price) = book.price(&position.symbol) {
                position.unrealized_pnl = match position.side {
                    PositionSide::Short => (position.entry_price - price) * position.amount,
                    PositionSide::Long => (price - position.entry_price) * position.amount,
                };
            }
        }
        Ok(positions)
    }

    async fn leverage_info(&self, account_id: &str) -> PortResult<LeverageInfo> {
        let book = self.book.lock();
        book.check(&PaperFault::Ledger)?;
        Ok(LeverageInfo {
            margin_positions: book.margin.get(account_id).cloned().unwrap_or_default(),
        })
    }

    async fn transfer(&self, from: &str, to: &str, asset: &str, amount: f64) -> PortResult<bool> {
        let mut book = self.book.lock();
        book.check(&PaperFault::Transfer)?;
        if book.balance(from, asset) + EPSILON < amount {
            return Ok(false);
        }
        book.adjust(from, asset, -amount);
        book.adjust(to, asset, amount);
        Ok(true)
    }
}
