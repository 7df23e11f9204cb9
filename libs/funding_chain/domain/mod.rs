//! Domain Layer
//!
//! Pure business types of the funding chain: account lifecycle, the chain
//! arena, strategy state and the critical-operation batch. No I/O here.

pub mod account;
pub mod chain;
pub mod errors;
pub mod market;
pub mod operation;
pub mod state;

pub use account::{
    AccountEntry, AccountStatus, CarryEntry, EntryData, FundingLeg, HedgeEntry, HedgeLeg,
    PriceTarget, RiskLevel,
};
pub use chain::ChainArena;
pub use errors::{ChainError, TransitionError};
pub use market::{
    split_symbol, ConditionalOrderSpec, LeverageInfo, MarginMode, MarginPosition,
    MarketCondition, Order, OrderSide, OrderStatus, OrderType, Position, PositionSide,
    Transaction, TransactionKind,
};
pub use operation::{
    carry_over_amount, BatchResult, CriticalOperation, OperationResult, GLOBAL_ERROR_KEY,
};
pub use state::{AccountRecord, StrategySnapshot, StrategyState};
