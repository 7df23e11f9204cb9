//! Application Layer
//!
//! Coordinators, monitors, risk components and the engine driver.
//! This layer depends on domain and infrastructure layers.

pub mod chain;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod monitors;
pub mod risk;
pub mod state_handle;

pub use chain::{resolve_secondary_hedge, unwind_operations, ChainCoordinator, TargetOutcome};
pub use context::{AccountLocks, EngineContext};
pub use coordinator::{BatchMode, CriticalOperationCoordinator};
pub use engine::{Collaborators, StrategyEngine};
pub use errors::{EngineError, EngineResult};
pub use monitors::{
    FundingRateMonitor, MonitorControl, MonitorKind, MonitorOutcome, TargetMonitor, TriggerReason,
};
pub use risk::{classify_funding_rate, RiskEnforcer, RiskScorer, SweepReport};
pub use state_handle::StateHandle;
