//! Shared strategy state
//!
//! All reads and mutations of [`StrategyState`] go through short synchronous
//! closures; the lock is never held across an `.await`. Persistence is
//! best effort: store failures are logged and the in-memory state stays
//! authoritative.

use super::errors::{EngineError, EngineResult};
use crate::domain::{
    AccountEntry, AccountStatus, HedgeEntry, RiskLevel, StrategyState, Transaction,
    TransitionError,
};
use crate::infrastructure::{AccountStatePatch, StateStore};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<RwLock<StrategyState>>,
    store: Arc<dyn StateStore>,
}

impl StateHandle {
    pub fn new(state: StrategyState, store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            store,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&StrategyState) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut StrategyState) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().is_active
    }

    pub fn account(&self, account_id: &str) -> Option<AccountEntry> {
        self.inner.read().account(account_id).cloned()
    }

    pub fn status(&self, account_id: &str) -> Option<AccountStatus> {
        self.inner.read().account(account_id).map(|a| a.status)
    }

    pub fn hedge(&self, account_id: &str) -> Option<HedgeEntry> {
        self.inner
            .read()
            .account(account_id)
            .and_then(|a| a.hedge().cloned())
    }

    pub fn next_account_id(&self, account_id: &str) -> Option<String> {
        self.inner.read().next_account_id(account_id)
    }

    /// `(account_id, status)` for every account, in chain order
    pub fn statuses(&self) -> Vec<(String, AccountStatus)> {
        let state = self.inner.read();
        state
            .chain
            .ordered_ids()
            .into_iter()
            .filter_map(|id| {
                let status = state.account(&id)?.status;
                Some((id, status))
            })
            .collect()
    }

    pub fn risk_level(&self, account_id: &str) -> Option<RiskLevel> {
        self.inner.read().account(account_id).map(|a| a.risk_level)
    }

    pub fn set_risk_level(&self, account_id: &str, level: RiskLevel) {
        if let Some(account) = self.inner.write().account_mut(account_id) {
            account.risk_level = level;
        }
    }

    /// Apply a lifecycle transition to one account
    pub fn transition<R>(
        &self,
        account_id: &str,
        f: impl FnOnce(&mut AccountEntry) -> Result<R, TransitionError>,
    ) -> EngineResult<R> {
        let mut state = self.inner.write();
        let account = state
            .account_mut(account_id)
            .ok_or_else(|| EngineError::UnknownAccount(account_id.to_string()))?;
        let result = f(account)?;
        state.touch();
        Ok(result)
    }

    /// Move a non-terminal account to FAILED. Returns `false` if it was
    /// already terminal or unknown.
    pub async fn fail_account(&self, account_id: &str, error: &str) -> bool {
        let failed = self
            .transition(account_id, |account| account.fail(error))
            .is_ok();
        if failed {
            self.persist_account(account_id).await;
        } else {
            warn!(account_id, "Account already terminal, not marking FAILED: {}", error);
        }
        failed
    }

    /// Save the full snapshot
    pub async fn persist(&self) {
        let snapshot = self.inner.read().snapshot();
        if let Err(e) = self.store.save_state(&snapshot).await {
            error!("Failed to persist strategy state: {}", e);
        }
    }

    /// Save the full snapshot and the account's own record
    pub async fn persist_account(&self, account_id: &str) {
        self.persist().await;

        let patch = {
            let state = self.inner.read();
            state
                .account(account_id)
                .map(|entry| AccountStatePatch::from_entry(entry, state.next_account_id(account_id)))
        };
        if let Some(patch) = patch {
            if let Err(e) = self.store.update_account_state(account_id, patch).await {
                error!(account_id, "Failed to persist account state: {}", e);
            }
        }
    }

    pub async fn record(&self, transaction: Transaction) {
        if let Err(e) = self.store.record_transaction(&transaction).await {
            error!(
                account_id = %transaction.account_id,
                "Failed to record transaction: {}", e
            );
        }
    }
}
