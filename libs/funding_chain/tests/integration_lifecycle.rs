//! Integration tests for the account lifecycle
//!
//! Drives the engine against the paper venue: bootstrap, target trigger,
//! carry to the next account, funding exit and the failure paths in between.

mod common;

use common::*;
use funding_chain::domain::{AccountStatus, MarginMode, RiskLevel, TransactionKind};
use funding_chain::infrastructure::{
    GatewayCapabilities, Ledger, PaperExchange, PaperFault, StateStore,
};
use funding_chain::application::MonitorKind;
use funding_chain::StrategyEngine;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

fn base_amount() -> f64 {
    50000.0 / ENTRY_PRICE
}

/// Initialize, wait for the exit orders, then move the price to the trigger
async fn trigger_head(h: &Harness) -> StrategyEngine {
    let mut engine = h.initialized_engine().await;
    assert!(
        drive_until(&mut engine, TIMEOUT, |e| e.monitor_kind(SUB_1) == Some(MonitorKind::Target)).await
    );
    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);
    engine
}

/// Run until the head collects funding and the next account is armed
async fn reach_funding(h: &Harness) -> StrategyEngine {
    let mut engine = trigger_head(h).await;
    assert!(
        drive_until(&mut engine, TIMEOUT, |e| {
            status(e, SUB_2) == Some(AccountStatus::WaitingTarget)
                && e.monitor_kind(SUB_1) == Some(MonitorKind::Funding)
        })
        .await,
        "chain did not advance"
    );
    engine
}

#[tokio::test]
async fn test_bootstrap_hedges_head_account() {
    let h = Harness::new();
    let engine = h.initialized_engine().await;

    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::WaitingTarget));
    assert_eq!(status(&engine, SUB_2), Some(AccountStatus::Idle));
    assert_eq!(status(&engine, SUB_3), Some(AccountStatus::Idle));

    let hedge = engine.context().state.hedge(SUB_1).unwrap();
    let symbols: Vec<&str> = hedge.legs.iter().map(|l| l.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTC/USDT", "BTC/USDC"]);
    assert!(approx(hedge.entry_price(), ENTRY_PRICE));
    assert!(approx(hedge.target_price(), TARGET_PRICE));
    assert!(approx(hedge.base_amount, base_amount()));
    assert!(approx(hedge.hedged_amount(), base_amount()));
    assert!(approx(hedge.borrowed_amount, 40000.0));

    // Capital left the master account and the shortfall was borrowed
    assert!(approx(h.exchange.balance(MASTER, "USDT").await.unwrap(), 90000.0));
    assert!(approx(h.exchange.outstanding_loan(SUB_1), 40000.0));

    let kinds: Vec<TransactionKind> = h
        .store
        .transactions(SUB_1)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Transfer,
            TransactionKind::SpotLeveragedBuy,
            TransactionKind::OpenShort,
            TransactionKind::OpenShort,
        ]
    );

    let snapshot = h.store.load_state().await.unwrap().unwrap();
    assert!(snapshot.is_active);
    assert_eq!(snapshot.accounts.len(), 3);
    let record = h.store.account_state(SUB_1).await.unwrap().unwrap();
    assert_eq!(record.status, AccountStatus::WaitingTarget);
    assert_eq!(record.next_account_id.as_deref(), Some(SUB_2));
}

#[tokio::test]
async fn test_exit_orders_placed_once_per_account() {
    let h = Harness::new();
    let mut engine = h.initialized_engine().await;

    assert!(drive_until(&mut engine, TIMEOUT, |_| h.exchange.conditional_orders(SUB_1).len() == 2).await);
    let orders = h.exchange.conditional_orders(SUB_1);
    assert!(orders.iter().all(|o| o.reduce_only && approx(o.price, TARGET_PRICE)));

    // Restarting the monitor does not place them again
    engine.stop_monitor(SUB_1).await;
    assert!(drive_until(&mut engine, TIMEOUT, |e| e.monitor_kind(SUB_1).is_some()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.exchange.conditional_orders(SUB_1).len(), 2);
}

#[tokio::test]
async fn test_target_hit_enters_funding_and_carries_forward() {
    let h = Harness::new();
    let engine = reach_funding(&h).await;
    let base = base_amount();

    // Head: hedge unwound, loan repaid, coin-margined short open
    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::FundingCollection));
    let funding = engine.context().state.account(SUB_1).unwrap().funding.unwrap();
    assert_eq!(funding.symbol, "BTC/USD");
    assert!(approx(funding.amount, base * 0.15));
    assert!(funding.order_id.is_some());
    assert!(h.exchange.outstanding_loan(SUB_1) < 1e-6);

    let positions = h.exchange.open_positions(SUB_1);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].margin_mode, MarginMode::Coin);
    assert!(approx(positions[0].amount, base * 0.15));

    // Next: carried base shorted on the primary symbol and armed
    let next = engine.context().state.hedge(SUB_2).unwrap();
    assert_eq!(next.legs.len(), 1);
    assert_eq!(next.legs[0].symbol, "BTC/USDT");
    assert!(approx(next.legs[0].amount, base * 0.85));
    assert!(approx(next.borrowed_amount, 0.0));
    assert!(approx(next.entry_price(), TRIGGER_PRICE));
    assert!(approx(next.target_price(), TRIGGER_PRICE + 2000.0));
    assert!(approx(h.exchange.balance(SUB_2, "BTC").await.unwrap(), base * 0.85));

    assert_eq!(status(&engine, SUB_3), Some(AccountStatus::Idle));

    let kinds: Vec<TransactionKind> = h
        .store
        .transactions(SUB_1)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert!(kinds.contains(&TransactionKind::RepayLoan));
    assert!(kinds.contains(&TransactionKind::OpenCoinMarginShort));
    assert_eq!(kinds.last(), Some(&TransactionKind::Transfer));
}

#[tokio::test]
async fn test_funding_exit_completes_account() {
    let h = Harness::new();
    let mut engine = reach_funding(&h).await;

    h.exchange.set_funding_rate("BTC/USD", -0.015);
    assert!(
        drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_1) == Some(AccountStatus::Completed)).await
    );

    let account = engine.context().state.account(SUB_1).unwrap();
    assert!(account.completed_at.is_some());
    assert!(h
        .exchange
        .open_positions(SUB_1)
        .iter()
        .all(|p| p.margin_mode != MarginMode::Coin));

    // Carried account keeps waiting for its own target
    assert_eq!(status(&engine, SUB_2), Some(AccountStatus::WaitingTarget));
}

#[tokio::test]
async fn test_batch_failure_marks_account_failed() {
    let h = Harness::new();
    let mut engine = h.initialized_engine().await;
    h.exchange.inject(PaperFault::RepayLoan);
    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);

    assert!(
        drive_until(&mut engine, TIMEOUT, |e| {
            status(e, SUB_1) == Some(AccountStatus::Failed)
                && e.context().state.risk_level(SUB_1) == Some(RiskLevel::High)
        })
        .await
    );

    let account = engine.context().state.account(SUB_1).unwrap();
    let error = account.error.unwrap();
    assert!(error.contains("op_2_repay_loan"), "unexpected error: {}", error);
    assert!(!error.contains("op_0_close_position"));
    assert!(h.alerts.contains("Critical operations failed"));

    // No rollback: the later operation still went through
    assert!(h
        .exchange
        .open_positions(SUB_1)
        .iter()
        .any(|p| p.margin_mode == MarginMode::Coin));

    // Nothing was carried
    assert_eq!(status(&engine, SUB_2), Some(AccountStatus::Idle));
    assert!(approx(h.exchange.balance(SUB_2, "BTC").await.unwrap(), 0.0));
}

#[tokio::test]
async fn test_native_batch_failure_records_global_error() {
    let mut config = test_config();
    config.strategy.accounts_count = 2;
    let exchange = PaperExchange::from_config(&config.paper, &config.strategy).with_capabilities(
        GatewayCapabilities {
            native_batch: true,
            conditional_orders: true,
            linear_symbols: config.strategy.hedge_symbols.clone(),
        },
    );
    let h = Harness::with_exchange(config, exchange);
    let mut engine = h.initialized_engine().await;
    h.exchange.inject(PaperFault::Batch);
    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);

    assert!(drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_1) == Some(AccountStatus::Failed)).await);
    let error = engine.context().state.account(SUB_1).unwrap().error.unwrap();
    assert!(error.contains("global_error"), "unexpected error: {}", error);

    // The batch never ran, so the hedge is still in place
    assert_eq!(h.exchange.open_positions(SUB_1).len(), 2);
}

#[tokio::test]
async fn test_native_batch_success_advances_chain() {
    let config = test_config();
    let exchange = PaperExchange::from_config(&config.paper, &config.strategy).with_capabilities(
        GatewayCapabilities {
            native_batch: true,
            conditional_orders: false,
            linear_symbols: config.strategy.hedge_symbols.clone(),
        },
    );
    let h = Harness::with_exchange(config, exchange);
    let mut engine = trigger_head(&h).await;

    assert!(
        drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_2) == Some(AccountStatus::WaitingTarget)).await
    );
    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::FundingCollection));
    // Polling-only backend
    assert!(h.exchange.conditional_orders(SUB_1).is_empty());
}

#[tokio::test]
async fn test_carry_transfer_failure_leaves_next_idle() {
    let h = Harness::new();
    let mut engine = h.initialized_engine().await;
    h.exchange.inject(PaperFault::Transfer);
    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);

    assert!(
        drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_1) == Some(AccountStatus::FundingCollection)).await
    );
    assert!(wait_for(TIMEOUT, || h.alerts.contains("stays IDLE")).await);

    assert_eq!(status(&engine, SUB_2), Some(AccountStatus::Idle));
    assert!(engine.context().state.account(SUB_2).unwrap().entry_data.is_none());
    // The carried amount stayed on the head account
    assert!(approx(h.exchange.balance(SUB_1, "BTC").await.unwrap(), base_amount()));
}

#[tokio::test]
async fn test_bootstrap_failure_marks_head_failed() {
    let h = Harness::new();
    h.exchange.inject(PaperFault::OpenLong);
    let engine = h.initialized_engine().await;

    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::Failed));
    let error = engine.context().state.account(SUB_1).unwrap().error.unwrap();
    assert!(error.contains("bootstrap failed"));
    assert!(h.alerts.contains("Account binance_sub_1 error"));
    assert_eq!(
        engine.context().state.risk_level(SUB_1),
        Some(RiskLevel::High)
    );
    assert_eq!(status(&engine, SUB_2), Some(AccountStatus::Idle));
}

#[tokio::test]
async fn test_exit_order_failure_keeps_polling() {
    let h = Harness::new();
    h.exchange.inject(PaperFault::ConditionalOrders);
    let mut engine = trigger_head(&h).await;

    assert!(
        drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_1) == Some(AccountStatus::FundingCollection)).await
    );
    assert!(h.alerts.contains("Exit orders for binance_sub_1 not placed"));
}

#[tokio::test]
async fn test_single_listed_hedge_symbol_doubles_primary_leg() {
    let mut config = test_config();
    config.strategy.hedge_symbols = vec!["BTC/USDT".to_string(), "BTC/USDC".to_string()];
    let exchange = PaperExchange::from_config(&config.paper, &config.strategy).with_capabilities(
        GatewayCapabilities {
            native_batch: false,
            conditional_orders: true,
            linear_symbols: vec!["BTC/USDT".to_string()],
        },
    );
    let h = Harness::with_exchange(config, exchange);
    let mut engine = h.initialized_engine().await;

    let hedge = engine.context().state.hedge(SUB_1).unwrap();
    assert!(hedge.legs.iter().all(|l| l.symbol == "BTC/USDT"));
    assert_eq!(h.exchange.open_positions(SUB_1).len(), 1);

    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);
    assert!(
        drive_until(&mut engine, TIMEOUT, |e| status(e, SUB_2) == Some(AccountStatus::WaitingTarget)).await
    );
    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::FundingCollection));
}

#[tokio::test]
async fn test_restart_recovers_waiting_account() {
    let h = Harness::new();
    let mut first = h.initialized_engine().await;
    assert!(drive_until(&mut first, TIMEOUT, |_| h.exchange.conditional_orders(SUB_1).len() == 2).await);
    first.stop().await;
    drop(first);

    let mut second = h.engine().await;
    assert_eq!(status(&second, SUB_1), Some(AccountStatus::WaitingTarget));
    second.initialize().await.unwrap();

    // No second bootstrap
    assert!(approx(h.exchange.balance(MASTER, "USDT").await.unwrap(), 90000.0));
    assert!(
        drive_until(&mut second, TIMEOUT, |e| e.monitor_kind(SUB_1) == Some(MonitorKind::Target)).await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.exchange.conditional_orders(SUB_1).len(), 2);

    h.exchange.set_price("BTC/USDT", TRIGGER_PRICE);
    assert!(
        drive_until(&mut second, TIMEOUT, |e| status(e, SUB_1) == Some(AccountStatus::FundingCollection)).await
    );
}

#[tokio::test]
async fn test_run_loop_exits_on_shutdown() {
    let h = Harness::new();
    let mut engine = h.initialized_engine().await;

    let handle = tokio::spawn(async move {
        engine.run().await.unwrap();
        engine
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.shutdown.trigger();

    let engine = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(engine.monitor_count(), 0);
    assert_eq!(status(&engine, SUB_1), Some(AccountStatus::WaitingTarget));
}
