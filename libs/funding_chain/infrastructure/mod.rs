//! Infrastructure Layer
//!
//! Collaborator ports and their implementations (paper venue, JSON state
//! store, alert sinks, price cache) plus config, logging and process
//! lifecycle helpers. Depends on the domain layer, never on application.

pub mod alerts;
pub mod config;
pub mod heartbeat;
pub mod logging;
pub mod market_cache;
pub mod paper;
pub mod ports;
pub mod shutdown;
pub mod state_store;

pub use alerts::{AlertDispatcher, AlertLevel, AlertSink, MemoryAlertSink, TelegramAlertSink};
pub use config::{AppConfig, ConfigError, RiskConfig, StrategyConfig};
pub use heartbeat::Heartbeat;
pub use logging::init_tracing;
pub use market_cache::CachedMarketFeed;
pub use paper::{PaperExchange, PaperFault};
pub use ports::{
    CollaboratorError, ExecutionGateway, GatewayCapabilities, Ledger, MarketFeed, PortResult,
    StateStore,
};
pub use shutdown::{ShutdownManager, StopSignal};
pub use state_store::{AccountStatePatch, AccountStateRecord, JsonStateStore, StoreError};
