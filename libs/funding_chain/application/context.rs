//! Engine context
//!
//! Collaborators and shared state handed to every application component.

use super::state_handle::StateHandle;
use crate::infrastructure::{
    AlertDispatcher, ExecutionGateway, Ledger, MarketFeed, StateStore, StopSignal,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Context provided to the coordinators, monitors and risk components
#[derive(Clone)]
pub struct EngineContext {
    pub feed: Arc<dyn MarketFeed>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub ledger: Arc<dyn Ledger>,
    pub store: Arc<dyn StateStore>,
    pub alerts: Arc<AlertDispatcher>,
    pub state: StateHandle,
    pub locks: Arc<AccountLocks>,
    /// Process-wide shutdown
    pub shutdown: StopSignal,
}

impl EngineContext {
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        gateway: Arc<dyn ExecutionGateway>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn StateStore>,
        alerts: Arc<AlertDispatcher>,
        state: StateHandle,
        shutdown: StopSignal,
    ) -> Self {
        Self {
            feed,
            gateway,
            ledger,
            store,
            alerts,
            state,
            locks: Arc::new(AccountLocks::default()),
            shutdown,
        }
    }

    /// Check if the engine should continue running
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_triggered() && self.state.is_active()
    }
}

/// One async guard per account.
///
/// The critical batch holds its account's guard for its whole duration;
/// risk enforcement only tries the guard and skips the account when busy.
#[derive(Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    fn slot(&self, account_id: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    pub async fn acquire(&self, account_id: &str) -> OwnedMutexGuard<()> {
        self.slot(account_id).lock_owned().await
    }

    /// `None` while another task holds the account
    pub fn try_acquire(&self, account_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(account_id).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_skips_busy_account() {
        let locks = AccountLocks::default();
        let guard = locks.acquire("binance_sub_1").await;

        assert!(locks.try_acquire("binance_sub_1").is_none());
        assert!(locks.try_acquire("binance_sub_2").is_some());

        drop(guard);
        assert!(locks.try_acquire("binance_sub_1").is_some());
    }
}
