//! Common test utilities for funding chain integration tests
//!
//! Provides a paper-venue harness with a temporary state store and an
//! in-memory alert sink, plus polling helpers for asynchronous assertions.

#![allow(dead_code)]

use funding_chain::application::{Collaborators, StrategyEngine};
use funding_chain::domain::AccountStatus;
use funding_chain::infrastructure::{
    AlertDispatcher, AppConfig, JsonStateStore, MemoryAlertSink, PaperExchange, StateStore,
    StopSignal,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

pub const SUB_1: &str = "binance_sub_1";
pub const SUB_2: &str = "binance_sub_2";
pub const SUB_3: &str = "binance_sub_3";
pub const MASTER: &str = "binance_main";

/// Entry price the paper venue starts at
pub const ENTRY_PRICE: f64 = 60000.0;
/// Target of a hedge entered at [`ENTRY_PRICE`] with the test loss target
pub const TARGET_PRICE: f64 = 62000.0;
/// Price that satisfies the 0.995 trigger tolerance for [`TARGET_PRICE`]
pub const TRIGGER_PRICE: f64 = 61700.0;

/// Three accounts, fast loops and a target far enough from entry that
/// the trigger does not fire on the entry price
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.strategy.accounts_count = 3;
    config.strategy.target_loss = 100_000.0;
    config.strategy.target_poll_interval_ms = 10;
    config.strategy.driver_tick_ms = 20;
    config.strategy.funding_check_interval_secs = 1;
    config.risk.sweep_interval_secs = 1;
    config
}

pub struct Harness {
    pub config: AppConfig,
    pub exchange: Arc<PaperExchange>,
    pub store: Arc<JsonStateStore>,
    pub alerts: Arc<MemoryAlertSink>,
    pub shutdown: StopSignal,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let exchange = PaperExchange::from_config(&config.paper, &config.strategy);
        Self::with_exchange(config, exchange)
    }

    /// Harness around a venue the caller has already seeded
    pub fn with_exchange(config: AppConfig, exchange: PaperExchange) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("strategy_state.json"), dir.path());
        Self {
            config,
            exchange: Arc::new(exchange),
            store: Arc::new(store),
            alerts: Arc::new(MemoryAlertSink::new()),
            shutdown: StopSignal::new(),
            dir,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        let store: Arc<dyn StateStore> = self.store.clone();
        let alerts = AlertDispatcher::new().with_sink(self.alerts.clone());
        Collaborators::paper(Arc::clone(&self.exchange), store, Arc::new(alerts))
    }

    pub async fn engine(&self) -> StrategyEngine {
        StrategyEngine::load(self.config.clone(), self.collaborators(), self.shutdown.clone())
            .await
            .unwrap()
    }

    /// Engine with the chain created and the head account hedged
    pub async fn initialized_engine(&self) -> StrategyEngine {
        let mut engine = self.engine().await;
        engine.initialize().await.unwrap();
        engine
    }
}

pub fn status(engine: &StrategyEngine, account_id: &str) -> Option<AccountStatus> {
    engine.context().state.status(account_id)
}

/// Tick the engine until `done` holds or the timeout elapses
pub async fn drive_until(
    engine: &mut StrategyEngine,
    timeout: Duration,
    mut done: impl FnMut(&StrategyEngine) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        engine.tick().await;
        if done(engine) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll `condition` without ticking until it holds or the timeout elapses
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
