//! JSON file state store
//!
//! Layout under the data directory:
//! - `strategy_state.json` (configurable): full strategy snapshot
//! - `account_states.json`: per-account records keyed by account id
//! - `transactions_{account_id}.jsonl`: append-only transaction history
//!
//! Snapshot and account files are written to a temp file and renamed into
//! place so a crash never leaves a half-written document behind.

use super::config::StoreConfig;
use super::ports::StateStore;
use crate::domain::{
    AccountEntry, AccountStatus, EntryData, LeverageInfo, Position, StrategySnapshot, Transaction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Account records
// =============================================================================

/// Persisted per-account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStateRecord {
    pub account_id: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub balance: BTreeMap<String, f64>,
    #[serde(default)]
    pub positions: Vec<Position>,
    pub leverage_info: Option<LeverageInfo>,
    pub entry_data: Option<EntryData>,
    pub next_account_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AccountStateRecord {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            status: AccountStatus::Idle,
            balance: BTreeMap::new(),
            positions: Vec::new(),
            leverage_info: None,
            entry_data: None,
            next_account_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Merge the fields present in `patch`
    pub fn apply(&mut self, patch: AccountStatePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(balance) = patch.balance {
            self.balance.extend(balance);
        }
        if let Some(positions) = patch.positions {
            self.positions = positions;
        }
        if let Some(info) = patch.leverage_info {
            self.leverage_info = Some(info);
        }
        if let Some(entry) = patch.entry_data {
            self.entry_data = Some(entry);
        }
        if let Some(next) = patch.next_account_id {
            self.next_account_id = Some(next);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of an [`AccountStateRecord`]; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountStatePatch {
    pub status: Option<AccountStatus>,
    pub balance: Option<BTreeMap<String, f64>>,
    pub positions: Option<Vec<Position>>,
    pub leverage_info: Option<LeverageInfo>,
    pub entry_data: Option<EntryData>,
    pub next_account_id: Option<String>,
}

impl AccountStatePatch {
    /// Lifecycle fields of an account as currently held in memory
    pub fn from_entry(entry: &AccountEntry, next_account_id: Option<String>) -> Self {
        Self {
            status: Some(entry.status),
            entry_data: entry.entry_data.clone(),
            next_account_id,
            ..Default::default()
        }
    }
}

// =============================================================================
// JsonStateStore
// =============================================================================

pub struct JsonStateStore {
    state_file: PathBuf,
    data_dir: PathBuf,
    state_lock: Mutex<()>,
    accounts_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn new(state_file: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            data_dir: data_dir.into(),
            state_lock: Mutex::new(()),
            accounts_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.state_file, &config.transactions_dir)
    }

    fn account_states_path(&self) -> PathBuf {
        self.data_dir.join("account_states.json")
    }

    pub fn transactions_path(&self, account_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("transactions_{}.jsonl", account_id))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_accounts(&self) -> Result<BTreeMap<String, AccountStateRecord>> {
        Ok(Self::read_json(&self.account_states_path())
            .await?
            .unwrap_or_default())
    }

    /// Full transaction history of an account, oldest first
    pub async fn transactions(&self, account_id: &str) -> Result<Vec<Transaction>> {
        let content = match tokio::fs::read_to_string(self.transactions_path(account_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load_state(&self) -> Result<Option<StrategySnapshot>> {
        Self::read_json(&self.state_file).await
    }

    async fn save_state(&self, snapshot: &StrategySnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let _guard = self.state_lock.lock().await;
        Self::write_atomic(&self.state_file, &bytes).await?;
        debug!("Strategy state saved to {}", self.state_file.display());
        Ok(())
    }

    async fn record_transaction(&self, transaction: &Transaction) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let mut line = serde_json::to_vec(transaction)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.transactions_path(&transaction.account_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn account_state(&self, account_id: &str) -> Result<Option<AccountStateRecord>> {
        let _guard = self.accounts_lock.lock().await;
        Ok(self.read_accounts().await?.remove(account_id))
    }

    async fn update_account_state(
        &self,
        account_id: &str,
        patch: AccountStatePatch,
    ) -> Result<AccountStateRecord> {
        let _guard = self.accounts_lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        let record = accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountStateRecord::new(account_id));
        record.apply(patch);
        let updated = record.clone();

        let bytes = serde_json::to_vec_pretty(&accounts)?;
        Self::write_atomic(&self.account_states_path(), &bytes).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainArena, StrategyState, TransactionKind};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> JsonStateStore {
        JsonStateStore::new(dir.path().join("state/strategy_state.json"), dir.path())
    }

    #[tokio::test]
    async fn test_missing_state_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut state = StrategyState::new(ChainArena::linear("binance", 3));
        state.activate();
        let snapshot = state.snapshot();

        store.save_state(&snapshot).await.unwrap();
        let loaded = store.load_state().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        // Overwrite leaves no temp file behind
        store.save_state(&snapshot).await.unwrap();
        assert!(!dir.path().join("state/strategy_state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_transactions_append() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let first = Transaction::new("binance_sub_1", TransactionKind::Transfer, 10000.0)
            .with_symbol("USDT");
        let second = Transaction::new("binance_sub_1", TransactionKind::OpenShort, 0.4)
            .with_symbol("BTC/USDT")
            .with_price(60000.0);
        store.record_transaction(&first).await.unwrap();
        store.record_transaction(&second).await.unwrap();

        let history = store.transactions("binance_sub_1").await.unwrap();
        assert_eq!(history, vec![first, second]);
        assert!(store.transactions("binance_sub_2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_account_state_patch_merges() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut balance = BTreeMap::new();
        balance.insert("USDT".to_string(), 10000.0);
        store
            .update_account_state(
                "binance_sub_1",
                AccountStatePatch {
                    balance: Some(balance),
                    next_account_id: Some("binance_sub_2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store
            .update_account_state(
                "binance_sub_1",
                AccountStatePatch {
                    status: Some(AccountStatus::Initialized),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, AccountStatus::Initialized);
        assert_eq!(updated.balance.get("USDT"), Some(&10000.0));
        assert_eq!(updated.next_account_id.as_deref(), Some("binance_sub_2"));

        let reloaded = store.account_state("binance_sub_1").await.unwrap().unwrap();
        assert_eq!(reloaded, updated);
        assert!(store.account_state("binance_sub_9").await.unwrap().is_none());
    }
}
