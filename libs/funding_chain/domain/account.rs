//! Account lifecycle
//!
//! One node of the chain: its status, the entry record captured when the
//! hedge was opened, and the cached risk level.
//!
//! ```text
//! IDLE -> INITIALIZED -> WAITING_TARGET -> FUNDING_COLLECTION -> COMPLETED
//!   \________\_______________\___________________\______________-> FAILED
//! ```

use super::errors::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Idle,
    Initialized,
    WaitingTarget,
    FundingCollection,
    Completed,
    Failed,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 6] = [
        AccountStatus::Idle,
        AccountStatus::Initialized,
        AccountStatus::WaitingTarget,
        AccountStatus::FundingCollection,
        AccountStatus::Completed,
        AccountStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Initialized => "INITIALIZED",
            Self::WaitingTarget => "WAITING_TARGET",
            Self::FundingCollection => "FUNDING_COLLECTION",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only forward step allowed from this status
    fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Initialized),
            Self::Initialized => Some(Self::WaitingTarget),
            Self::WaitingTarget => Some(Self::FundingCollection),
            Self::FundingCollection => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Transition table: one forward step, or FAILED from any non-terminal status.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    /// Whether an account in this status must carry entry data
    pub fn requires_entry(self) -> bool {
        matches!(
            self,
            Self::WaitingTarget | Self::FundingCollection | Self::Completed
        )
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Risk level
// =============================================================================

/// Discrete risk severity; ordering is LOW < MEDIUM < HIGH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Entry data
// =============================================================================

/// Entry price and the price at which the configured loss is realized.
/// Always constructed together, never one without the other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    pub entry_price: f64,
    pub target_price: f64,
    pub target_loss_amount: f64,
}

impl PriceTarget {
    /// Price at which the short leg realizes `target_loss_amount`.
    ///
    /// Every 1% move in price costs 0.5% of the loss target, so
    /// `target = entry * (1 + (loss / (entry * 100)) / 0.5)`.
    pub fn compute(entry_price: f64, target_loss_amount: f64) -> Self {
        let loss_pct = target_loss_amount / (entry_price * 100.0);
        let price_change_pct = loss_pct / 0.5;
        Self {
            entry_price,
            target_price: entry_price * (1.0 + price_change_pct),
            target_loss_amount,
        }
    }
}

/// One linear-margined short opened to hedge the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeLeg {
    pub symbol: String,
    pub amount: f64,
    pub order_id: String,
}

/// Entry of a fully hedged account, ready to be watched for its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeEntry {
    #[serde(flatten)]
    pub target: PriceTarget,
    /// Leverage notional computed at entry (`capital * leverage_ratio`)
    pub leverage_amount: f64,
    /// Quote amount actually borrowed and owed back at unwind
    pub borrowed_amount: f64,
    pub initial_notional: f64,
    pub base_amount: f64,
    pub spot_order_id: Option<String>,
    pub legs: Vec<HedgeLeg>,
    pub entered_at: DateTime<Utc>,
}

impl HedgeEntry {
    pub fn target_price(&self) -> f64 {
        self.target.target_price
    }

    pub fn entry_price(&self) -> f64 {
        self.target.entry_price
    }

    /// Total base amount shorted across all legs
    pub fn hedged_amount(&self) -> f64 {
        self.legs.iter().map(|leg| leg.amount).sum()
    }
}

/// Reduced entry of an account that received carried base asset.
/// No spot leg and no target yet; arming turns it into a [`HedgeEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarryEntry {
    pub reference_price: f64,
    pub base_amount: f64,
    pub leverage_amount: f64,
    pub leg: HedgeLeg,
    pub entered_at: DateTime<Utc>,
}

impl CarryEntry {
    pub fn arm(&self, target_loss_amount: f64) -> HedgeEntry {
        HedgeEntry {
            target: PriceTarget::compute(self.reference_price, target_loss_amount),
            leverage_amount: self.leverage_amount,
            borrowed_amount: 0.0,
            initial_notional: self.base_amount * self.reference_price,
            base_amount: self.base_amount,
            spot_order_id: None,
            legs: vec![self.leg.clone()],
            entered_at: self.entered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryData {
    Hedge(HedgeEntry),
    Carry(CarryEntry),
}

/// Coin-margined short opened when the account entered funding collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingLeg {
    pub symbol: String,
    pub amount: f64,
    pub order_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// AccountEntry
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub account_id: String,
    pub status: AccountStatus,
    pub entry_data: Option<EntryData>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    pub error: Option<String>,
    #[serde(default)]
    pub funding: Option<FundingLeg>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AccountEntry {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            status: AccountStatus::Idle,
            entry_data: None,
            risk_level: RiskLevel::Low,
            error: None,
            funding: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Armed hedge entry, present once the account is waiting for its target
    pub fn hedge(&self) -> Option<&HedgeEntry> {
        match &self.entry_data {
            Some(EntryData::Hedge(hedge)) => Some(hedge),
            _ => None,
        }
    }

    /// Scale every hedge leg on `symbol` by `factor` once part of it was
    /// closed outside the lifecycle. Returns the number of legs touched.
    pub fn scale_legs(&mut self, symbol: &str, factor: f64) -> usize {
        let legs: Vec<&mut HedgeLeg> = match &mut self.entry_data {
            Some(EntryData::Hedge(hedge)) => hedge.legs.iter_mut().collect(),
            Some(EntryData::Carry(carry)) => vec![&mut carry.leg],
            None => Vec::new(),
        };
        let mut scaled = 0;
        for leg in legs.into_iter().filter(|leg| leg.symbol == symbol) {
            leg.amount *= factor;
            scaled += 1;
        }
        if scaled > 0 {
            self.updated_at = Utc::now();
        }
        scaled
    }

    fn step(&mut self, next: AccountStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                account_id: self.account_id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next.requires_entry() && self.entry_data.is_none() {
            return Err(TransitionError::MissingEntryData(self.account_id.clone()));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// IDLE -> INITIALIZED, recording the entry block
    pub fn initialize(&mut self, entry: EntryData) -> Result<(), TransitionError> {
        if self.entry_data.is_some() {
            return Err(TransitionError::EntryAlreadySet(self.account_id.clone()));
        }
        if !self.status.can_transition_to(AccountStatus::Initialized) {
            return Err(TransitionError::Illegal {
                account_id: self.account_id.clone(),
                from: self.status,
                to: AccountStatus::Initialized,
            });
        }
        self.entry_data = Some(entry);
        self.step(AccountStatus::Initialized)
    }

    /// INITIALIZED -> WAITING_TARGET. A carried entry gets its target computed here.
    pub fn arm(&mut self, target_loss_amount: f64) -> Result<&HedgeEntry, TransitionError> {
        let armed = match &self.entry_data {
            Some(EntryData::Hedge(hedge)) => hedge.clone(),
            Some(EntryData::Carry(carry)) => carry.arm(target_loss_amount),
            None => return Err(TransitionError::MissingEntryData(self.account_id.clone())),
        };
        self.step(AccountStatus::WaitingTarget)?;
        self.entry_data = Some(EntryData::Hedge(armed));
        self.hedge()
            .ok_or_else(|| TransitionError::MissingEntryData(self.account_id.clone()))
    }

    /// WAITING_TARGET -> FUNDING_COLLECTION after a successful critical batch
    pub fn start_funding(&mut self, funding: FundingLeg) -> Result<(), TransitionError> {
        self.step(AccountStatus::FundingCollection)?;
        self.funding = Some(funding);
        Ok(())
    }

    /// FUNDING_COLLECTION -> COMPLETED
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.step(AccountStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Any non-terminal status -> FAILED
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.step(AccountStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }
}
