//! Funding Chain Binary
//!
//! Runs the capital-chained funding strategy against the paper venue with
//! graceful shutdown support.
//!
//! Usage:
//!   CONFIG_PATH=config/strategy_config.yaml ./funding_chain   # Via environment variable
//!   ./funding_chain config/strategy_config.yaml                # Via CLI argument
//!   ./funding_chain --config config/strategy_config.yaml

use anyhow::Result;
use funding_chain::application::{Collaborators, StrategyEngine};
use funding_chain::infrastructure::heartbeat::summarize;
use funding_chain::infrastructure::{
    init_tracing, AlertDispatcher, AppConfig, CachedMarketFeed, JsonStateStore, MarketFeed,
    PaperExchange, ShutdownManager, StateStore,
};
use funding_chain_bot::bin_common::{
    parse_args, resolve_config_path, BinaryRunner, RunConfig, CONFIG_ENV_VAR,
};
use std::sync::Arc;
use tracing::{info, warn};

struct FundingChainApp {
    run_config: RunConfig,
    engine: StrategyEngine,
}

impl BinaryRunner for FundingChainApp {
    async fn run(&mut self) -> Result<()> {
        self.engine.initialize().await?;
        self.engine.run().await?;
        Ok(())
    }

    fn config(&self) -> &RunConfig {
        &self.run_config
    }

    fn stats(&self) -> Option<String> {
        let counts = self
            .engine
            .context()
            .state
            .read(|state| state.status_counts());
        Some(format!("Final accounts: {}", summarize(&counts)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load config
    // Priority: CLI arg > CONFIG_PATH env var > default path
    let location = resolve_config_path(&parse_args(), std::env::var(CONFIG_ENV_VAR).ok());
    let config = AppConfig::load(&location.path)?;

    // Initialize logging
    init_tracing(&config.log_level);
    info!(path = %location.path.display(), source = %location.source, "Config file resolved");
    config.log();

    // Initialize infrastructure
    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    info!("Seeding paper venue...");
    let exchange = Arc::new(PaperExchange::from_config(&config.paper, &config.strategy));
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::from_config(&config.store));
    let alerts = Arc::new(AlertDispatcher::from_config(&config.alerts));
    info!(sinks = alerts.sink_count(), "Alert dispatcher ready");

    let mut collaborators = Collaborators::paper(exchange, store, alerts);
    let cached: Arc<dyn MarketFeed> = Arc::new(CachedMarketFeed::from_config(
        Arc::clone(&collaborators.feed),
        &config.market,
    ));
    collaborators.feed = cached;

    let engine = StrategyEngine::load(config, collaborators, shutdown.signal()).await?;
    let mut app = FundingChainApp {
        run_config: RunConfig::new("Funding Chain"),
        engine,
    };

    let result = app.execute().await;
    if shutdown.is_running() {
        warn!("Engine stopped without a shutdown signal");
    }
    result
}
