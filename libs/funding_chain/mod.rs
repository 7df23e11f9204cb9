//! Funding Chain
//!
//! Capital-chained funding-rate arbitrage across a linked sequence of
//! exchange sub-accounts.
//!
//! ## Architecture
//!
//! - **domain**: Account lifecycle, chain arena, strategy state, critical batch
//! - **infrastructure**: Collaborator ports, paper venue, state store, config,
//!   alerts, logging and shutdown
//! - **application**: Chain and batch coordinators, monitors, risk, engine

pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used items
pub use application::{Collaborators, EngineError, EngineResult, StrategyEngine};
pub use domain::{AccountEntry, AccountStatus, RiskLevel, StrategyState};
pub use infrastructure::{
    init_tracing, AlertDispatcher, AppConfig, CachedMarketFeed, JsonStateStore, PaperExchange,
    ShutdownManager,
};
