//! Strategy state
//!
//! The single authoritative state object plus its persisted snapshot form.

use super::account::{AccountEntry, AccountStatus};
use super::chain::ChainArena;
use super::errors::ChainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct StrategyState {
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub chain: ChainArena,
}

impl StrategyState {
    pub fn new(chain: ChainArena) -> Self {
        Self {
            is_active: false,
            started_at: None,
            last_updated: Utc::now(),
            chain,
        }
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountEntry> {
        self.chain.get(account_id)
    }

    pub fn account_mut(&mut self, account_id: &str) -> Option<&mut AccountEntry> {
        self.chain.get_mut(account_id)
    }

    pub fn next_account_id(&self, account_id: &str) -> Option<String> {
        self.chain.next_of(account_id).map(str::to_string)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn status_counts(&self) -> BTreeMap<AccountStatus, usize> {
        let mut counts = BTreeMap::new();
        for account in self.chain.iter() {
            *counts.entry(account.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        let accounts = self
            .chain
            .iter_links()
            .map(|(entry, next)| {
                (
                    entry.account_id.clone(),
                    AccountRecord {
                        entry: entry.clone(),
                        next_account_id: next.map(str::to_string),
                    },
                )
            })
            .collect();

        StrategySnapshot {
            is_active: self.is_active,
            started_at: self.started_at,
            last_updated: self.last_updated,
            accounts,
        }
    }

    /// Rebuild from a snapshot, re-checking every chain link
    pub fn from_snapshot(snapshot: StrategySnapshot) -> Result<Self, ChainError> {
        let mut chain = ChainArena::new();
        let mut links = Vec::new();

        for (_, record) in snapshot.accounts {
            if let Some(next) = &record.next_account_id {
                links.push((record.entry.account_id.clone(), next.clone()));
            }
            chain.insert(record.entry)?;
        }
        for (from, to) in links {
            chain.link(&from, &to)?;
        }

        Ok(Self {
            is_active: snapshot.is_active,
            started_at: snapshot.started_at,
            last_updated: snapshot.last_updated,
            chain,
        })
    }
}

/// Persisted account: the lifecycle entry plus its successor link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(flatten)]
    pub entry: AccountEntry,
    pub next_account_id: Option<String>,
}

/// Persisted form of [`StrategyState`], keyed by account id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub accounts: BTreeMap<String, AccountRecord>,
}
