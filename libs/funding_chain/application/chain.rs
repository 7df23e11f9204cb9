//! Chain coordinator
//!
//! Moves capital along the account chain:
//! - `bootstrap`: fund the head account and open the hedged position
//! - `advance`: open a short on carried base asset in the next account
//! - `on_target_reached`: run the critical batch, enter funding collection
//!   and carry the remainder forward
//! - `exit_funding`: close the funding leg and complete the account

use super::context::EngineContext;
use super::coordinator::CriticalOperationCoordinator;
use super::errors::{EngineError, EngineResult};
use super::risk::RiskEnforcer;
use crate::domain::{
    carry_over_amount, AccountStatus, BatchResult, CarryEntry, ChainArena, CriticalOperation,
    EntryData, FundingLeg, HedgeEntry, HedgeLeg, MarginMode, Position, PriceTarget,
    Transaction, TransactionKind, TransitionError,
};
use crate::infrastructure::{AlertLevel, GatewayCapabilities, StrategyConfig};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened after a target trigger
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    /// Batch succeeded and the next account received the carried amount
    Advanced { carried: f64, next: String },
    /// Batch succeeded on the last account of the chain
    ChainEnd { carried: f64 },
    /// Batch succeeded but the carry transfer did not; next stays IDLE
    CarryFailed { carried: f64, next: String },
    /// Carry arrived but opening the next account's short failed
    NextFailed { carried: f64, next: String },
    /// At least one critical operation failed; the account is FAILED
    BatchFailed { failed: Vec<String> },
}

/// Second hedge leg: the first configured candidate the backend lists,
/// otherwise the primary symbol again.
pub fn resolve_secondary_hedge(config: &StrategyConfig, capabilities: &GatewayCapabilities) -> String {
    config
        .hedge_symbols
        .iter()
        .skip(1)
        .find(|symbol| capabilities.supports_linear(symbol))
        .cloned()
        .unwrap_or_else(|| config.primary_hedge_symbol().to_string())
}

/// Unwind batch for an account that reached its target.
///
/// Each hedge symbol is closed at the short size the venue reports now,
/// so a leg already cut by risk enforcement is not bought back twice.
/// Symbols with nothing left open are skipped.
pub fn unwind_operations(
    hedge: &HedgeEntry,
    open_positions: &[Position],
    base_balance: f64,
    config: &StrategyConfig,
) -> Vec<CriticalOperation> {
    let mut symbols: Vec<&str> = Vec::with_capacity(hedge.legs.len());
    for leg in &hedge.legs {
        if !symbols.contains(&leg.symbol.as_str()) {
            symbols.push(&leg.symbol);
        }
    }

    let mut operations: Vec<CriticalOperation> = symbols
        .into_iter()
        .filter_map(|symbol| {
            let live: f64 = open_positions
                .iter()
                .filter(|p| p.symbol == symbol && p.is_short() && !p.is_coin_margined())
                .map(|p| p.amount)
                .sum();
            (live > 0.0).then(|| CriticalOperation::ClosePosition {
                symbol: symbol.to_string(),
                amount: live,
                limit_price: None,
            })
        })
        .collect();

    if hedge.borrowed_amount > 0.0 {
        operations.push(CriticalOperation::RepayLoan {
            asset: config.quote_asset.clone(),
            amount: hedge.borrowed_amount,
        });
    }

    operations.push(CriticalOperation::OpenCoinMarginShort {
        symbol: config.funding_symbol.clone(),
        amount: base_balance * config.funding_allocation,
    });
    operations
}

pub struct ChainCoordinator {
    ctx: EngineContext,
    config: StrategyConfig,
    coordinator: CriticalOperationCoordinator,
    enforcer: Arc<RiskEnforcer>,
    secondary_hedge_symbol: String,
}

impl ChainCoordinator {
    pub fn new(ctx: EngineContext, config: StrategyConfig, enforcer: Arc<RiskEnforcer>) -> Self {
        let capabilities = ctx.gateway.capabilities();
        let secondary_hedge_symbol = resolve_secondary_hedge(&config, &capabilities);
        let coordinator = CriticalOperationCoordinator::new(Arc::clone(&ctx.gateway));
        info!(
            primary = config.primary_hedge_symbol(),
            secondary = %secondary_hedge_symbol,
            batch_mode = ?coordinator.mode(),
            "Chain coordinator ready"
        );
        Self {
            ctx,
            config,
            coordinator,
            enforcer,
            secondary_hedge_symbol,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn hedge_symbols(&self) -> (&str, &str) {
        (self.config.primary_hedge_symbol(), &self.secondary_hedge_symbol)
    }

    /// Create the account chain on first start and bootstrap its head
    pub async fn initialize_chain(&self) -> EngineResult<()> {
        if !self.ctx.state.read(|s| s.chain.is_empty()) {
            info!("Account chain already present, skipping initialization");
            return Ok(());
        }

        let head = self.ctx.state.write(|state| {
            state.chain = ChainArena::linear(&self.config.exchange_id, self.config.accounts_count);
            state.touch();
            state.chain.head().map(|a| a.account_id.clone())
        });
        self.ctx.state.persist().await;
        info!(
            "🔗 Created chain of {} accounts for {}",
            self.config.accounts_count, self.config.exchange_id
        );

        let head = head.ok_or_else(|| EngineError::UnknownAccount("chain head".to_string()))?;
        self.bootstrap(&head, self.config.account_capital).await?;
        Ok(())
    }

    async fn fail(&self, account_id: &str, message: String) {
        self.ctx.state.fail_account(account_id, &message).await;
        self.enforcer.handle_account_error(account_id, &message).await;
    }

    fn require_status(&self, account_id: &str, expected: AccountStatus, next: AccountStatus) -> EngineResult<()> {
        let status = self
            .ctx
            .state
            .status(account_id)
            .ok_or_else(|| EngineError::UnknownAccount(account_id.to_string()))?;
        if status != expected {
            return Err(TransitionError::Illegal {
                account_id: account_id.to_string(),
                from: status,
                to: next,
            }
            .into());
        }
        Ok(())
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Fund an IDLE account from the master account and open its hedge.
    ///
    /// On failure the account is marked FAILED and escalated; legs already
    /// opened stay open.
    pub async fn bootstrap(&self, account_id: &str, capital: f64) -> EngineResult<HedgeEntry> {
        info!(account_id, capital, "🚀 Bootstrapping account");
        match self.try_bootstrap(account_id, capital).await {
            Ok(hedge) => Ok(hedge),
            Err(e) => {
                self.fail(account_id, format!("bootstrap failed: {}", e)).await;
                Err(e)
            }
        }
    }

    async fn try_bootstrap(&self, account_id: &str, capital: f64) -> EngineResult<HedgeEntry> {
        self.require_status(account_id, AccountStatus::Idle, AccountStatus::Initialized)?;
        let cfg = &self.config;
        let master = cfg.master_account_id();

        if !self
            .ctx
            .ledger
            .transfer(&master, account_id, &cfg.quote_asset, capital)
            .await?
        {
            return Err(EngineError::TransferRefused {
                from: master,
                to: account_id.to_string(),
                asset: cfg.quote_asset.clone(),
                amount: capital,
            });
        }
        self.ctx
            .state
            .record(
                Transaction::new(account_id, TransactionKind::Transfer, capital)
                    .with_symbol(&cfg.quote_asset)
                    .with_reference(&master),
            )
            .await;

        let price = self.ctx.feed.price(&cfg.spot_symbol).await?;
        let leverage_amount = capital * cfg.leverage_ratio;
        let notional = capital + leverage_amount;
        let base_amount = notional / price;

        let spot = self
            .ctx
            .gateway
            .open_leveraged_long(account_id, &cfg.spot_symbol, base_amount, cfg.leverage_ratio)
            .await?;
        self.ctx
            .state
            .record(
                Transaction::new(account_id, TransactionKind::SpotLeveragedBuy, base_amount)
                    .with_symbol(&cfg.spot_symbol)
                    .with_price(price)
                    .with_reference(&spot.order_id),
            )
            .await;

        let half = base_amount / 2.0;
        let (primary, secondary) = self.hedge_symbols();
        let mut legs = Vec::with_capacity(2);
        for symbol in [primary, secondary] {
            let order = self
                .ctx
                .gateway
                .open_short(account_id, symbol, half, MarginMode::Linear)
                .await?;
            self.ctx
                .state
                .record(
                    Transaction::new(account_id, TransactionKind::OpenShort, half)
                        .with_symbol(symbol)
                        .with_price(price)
                        .with_reference(&order.order_id),
                )
                .await;
            legs.push(HedgeLeg {
                symbol: symbol.to_string(),
                amount: half,
                order_id: order.order_id,
            });
        }

        let hedge = HedgeEntry {
            target: PriceTarget::compute(price, cfg.target_loss),
            leverage_amount,
            borrowed_amount: leverage_amount,
            initial_notional: notional,
            base_amount,
            spot_order_id: Some(spot.order_id),
            legs,
            entered_at: Utc::now(),
        };

        // Both steps under one write so the driver never sees the
        // half-built INITIALIZED account
        let target_loss = cfg.target_loss;
        let armed = self.ctx.state.transition(account_id, move |account| {
            account.initialize(EntryData::Hedge(hedge))?;
            account.arm(target_loss).cloned()
        })?;
        self.ctx.state.persist_account(account_id).await;

        info!(
            account_id,
            entry_price = armed.entry_price(),
            target_price = armed.target_price(),
            base_amount,
            "Account hedged, waiting for target"
        );
        Ok(armed)
    }

    // =========================================================================
    // Advance
    // =========================================================================

    /// Open a single short sized to the carried base amount on an IDLE
    /// account. Leaves it INITIALIZED; the driver arms it.
    pub async fn advance(&self, account_id: &str, carried_base: f64) -> EngineResult<()> {
        info!(account_id, carried_base, "➡️ Advancing chain");
        match self.try_advance(account_id, carried_base).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(account_id, format!("advance failed: {}", e)).await;
                Err(e)
            }
        }
    }

    async fn try_advance(&self, account_id: &str, carried_base: f64) -> EngineResult<()> {
        self.require_status(account_id, AccountStatus::Idle, AccountStatus::Initialized)?;
        let cfg = &self.config;
        let (primary, _) = self.hedge_symbols();

        let price = self.ctx.feed.price(&cfg.spot_symbol).await?;
        let leverage_amount = carried_base * price * cfg.leverage_ratio;

        let order = self
            .ctx
            .gateway
            .open_short(account_id, primary, carried_base, MarginMode::Linear)
            .await?;
        self.ctx
            .state
            .record(
                Transaction::new(account_id, TransactionKind::OpenShort, carried_base)
                    .with_symbol(primary)
                    .with_price(price)
                    .with_reference(&order.order_id),
            )
            .await;

        let carry = CarryEntry {
            reference_price: price,
            base_amount: carried_base,
            leverage_amount,
            leg: HedgeLeg {
                symbol: primary.to_string(),
                amount: carried_base,
                order_id: order.order_id,
            },
            entered_at: Utc::now(),
        };
        self.ctx
            .state
            .transition(account_id, |account| account.initialize(EntryData::Carry(carry)))?;
        self.ctx.state.persist_account(account_id).await;

        info!(account_id, reference_price = price, "Account initialized from carry");
        Ok(())
    }

    /// INITIALIZED -> WAITING_TARGET for a carried account
    pub async fn arm(&self, account_id: &str) -> EngineResult<HedgeEntry> {
        let target_loss = self.config.target_loss;
        let armed = self
            .ctx
            .state
            .transition(account_id, |account| account.arm(target_loss).cloned())?;
        self.ctx.state.persist_account(account_id).await;
        info!(
            account_id,
            target_price = armed.target_price(),
            "Account armed, waiting for target"
        );
        Ok(armed)
    }

    // =========================================================================
    // Target reached
    // =========================================================================

    /// Run the critical batch for an account in WAITING_TARGET.
    ///
    /// Holds the account guard for the whole batch so risk enforcement
    /// cannot act on the same positions concurrently.
    pub async fn on_target_reached(&self, account_id: &str) -> EngineResult<TargetOutcome> {
        let cfg = &self.config;
        let guard = self.ctx.locks.acquire(account_id).await;

        self.require_status(
            account_id,
            AccountStatus::WaitingTarget,
            AccountStatus::FundingCollection,
        )?;
        let hedge = self
            .ctx
            .state
            .hedge(account_id)
            .ok_or_else(|| EngineError::NotArmed(account_id.to_string()))?;

        info!(account_id, "⚡ Target reached, executing critical operations");

        // Balance and live leg sizes are read under the guard; either read
        // failing is a single global error for the batch
        let snapshot = match self.ctx.ledger.balance(account_id, &cfg.base_asset).await {
            Ok(balance) => match self.ctx.ledger.positions(account_id).await {
                Ok(open) => Ok((balance, open)),
                Err(e) => Err(format!("failed to read positions: {}", e)),
            },
            Err(e) => Err(format!("failed to read {} balance: {}", cfg.base_asset, e)),
        };
        let (operations, results, base_balance) = match snapshot {
            Ok((balance, open)) => {
                let operations = unwind_operations(&hedge, &open, balance, cfg);
                let results = self.coordinator.execute(account_id, &operations).await;
                (operations, results, balance)
            }
            Err(message) => (Vec::new(), BatchResult::global_error(message), 0.0),
        };
        self.record_batch(account_id, &operations, &results).await;
        drop(guard);

        if !results.is_success() {
            let failed = results.failed_ids();
            self.ctx
                .state
                .fail_account(account_id, &format!("critical batch failed: {}", failed.join(", ")))
                .await;
            self.enforcer
                .handle_operation_failure(account_id, &results)
                .await;
            return Ok(TargetOutcome::BatchFailed { failed });
        }

        let funding_amount = base_balance * cfg.funding_allocation;
        let funding_order_id = operations
            .iter()
            .enumerate()
            .find(|(_, op)| matches!(op, CriticalOperation::OpenCoinMarginShort { .. }))
            .and_then(|(i, op)| results.get(&op.operation_id(i)))
            .and_then(|r| r.result_data.as_ref())
            .and_then(|data| data.get("order_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let funding = FundingLeg {
            symbol: cfg.funding_symbol.clone(),
            amount: funding_amount,
            order_id: funding_order_id,
            started_at: Utc::now(),
        };
        self.ctx
            .state
            .transition(account_id, |account| account.start_funding(funding))?;
        self.ctx.state.persist_account(account_id).await;
        info!(account_id, funding_amount, "✅ Funding collection started");

        let carried = carry_over_amount(base_balance, cfg.funding_allocation);
        let Some(next) = self.ctx.state.next_account_id(account_id) else {
            info!(account_id, carried, "End of chain reached");
            return Ok(TargetOutcome::ChainEnd { carried });
        };

        match self
            .ctx
            .ledger
            .transfer(account_id, &next, &cfg.base_asset, carried)
            .await
        {
            Ok(true) => {
                self.ctx
                    .state
                    .record(
                        Transaction::new(account_id, TransactionKind::Transfer, carried)
                            .with_symbol(&cfg.base_asset)
                            .with_reference(&next),
                    )
                    .await;
            }
            Ok(false) => {
                self.carry_failed(account_id, &next, carried, "transfer refused").await;
                return Ok(TargetOutcome::CarryFailed { carried, next });
            }
            Err(e) => {
                self.carry_failed(account_id, &next, carried, &e.to_string()).await;
                return Ok(TargetOutcome::CarryFailed { carried, next });
            }
        }

        match self.advance(&next, carried).await {
            Ok(()) => Ok(TargetOutcome::Advanced { carried, next }),
            Err(e) => {
                warn!(account_id, next = %next, "Next account failed to initialize: {}", e);
                Ok(TargetOutcome::NextFailed { carried, next })
            }
        }
    }

    async fn carry_failed(&self, account_id: &str, next: &str, carried: f64, reason: &str) {
        error!(account_id, next, carried, "Carry transfer failed: {}", reason);
        self.ctx
            .alerts
            .send(
                &format!(
                    "Carry of {:.8} {} from {} to {} failed: {}. {} stays IDLE",
                    carried, self.config.base_asset, account_id, next, reason, next
                ),
                AlertLevel::Error,
            )
            .await;
    }

    async fn record_batch(&self, account_id: &str, operations: &[CriticalOperation], results: &BatchResult) {
        for (i, op) in operations.iter().enumerate() {
            let Some(result) = results.get(&op.operation_id(i)) else {
                continue;
            };
            if !result.success {
                continue;
            }
            let transaction = match op {
                CriticalOperation::ClosePosition { symbol, amount, .. } => {
                    Transaction::new(account_id, TransactionKind::ClosePosition, *amount)
                        .with_symbol(symbol)
                }
                CriticalOperation::RepayLoan { asset, amount } => {
                    Transaction::new(account_id, TransactionKind::RepayLoan, *amount).with_symbol(asset)
                }
                CriticalOperation::OpenCoinMarginShort { symbol, amount } => {
                    Transaction::new(account_id, TransactionKind::OpenCoinMarginShort, *amount)
                        .with_symbol(symbol)
                }
            };
            self.ctx
                .state
                .record(transaction.with_reference(&result.operation_id))
                .await;
        }
    }

    // =========================================================================
    // Funding exit
    // =========================================================================

    /// Close every coin-margined short and complete the account
    pub async fn exit_funding(&self, account_id: &str) -> EngineResult<usize> {
        match self.try_exit_funding(account_id).await {
            Ok(closed) => Ok(closed),
            Err(e) => {
                self.enforcer
                    .handle_account_error(account_id, &format!("funding exit failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn try_exit_funding(&self, account_id: &str) -> EngineResult<usize> {
        self.require_status(
            account_id,
            AccountStatus::FundingCollection,
            AccountStatus::Completed,
        )?;
        let positions = self.ctx.ledger.positions(account_id).await?;

        let mut closed = 0;
        for position in positions
            .iter()
            .filter(|p| p.is_coin_margined() && p.is_short())
        {
            let order = self
                .ctx
                .gateway
                .close_position(account_id, &position.symbol, position.amount, None)
                .await?;
            self.ctx
                .state
                .record(
                    Transaction::new(account_id, TransactionKind::ClosePosition, position.amount)
                        .with_symbol(&position.symbol)
                        .with_reference(&order.order_id),
                )
                .await;
            closed += 1;
        }

        self.ctx
            .state
            .transition(account_id, |account| account.complete())?;
        self.ctx.state.persist_account(account_id).await;
        info!(account_id, closed, "🏁 Funding collection finished, account completed");
        Ok(closed)
    }
}
