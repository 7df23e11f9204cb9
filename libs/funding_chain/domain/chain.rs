//! Account chain
//!
//! Arena of accounts linked by index. Every node keeps both its successor
//! and its predecessor so that duplicate predecessors are rejected in O(1).
//! Appending a fresh account can never close a cycle; joining two segments
//! walks one of them.

use super::account::AccountEntry;
use super::errors::ChainError;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ChainArena {
    nodes: Vec<AccountEntry>,
    index: HashMap<String, usize>,
    next: Vec<Option<usize>>,
    prev: Vec<Option<usize>>,
}

impl ChainArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `count` accounts named `{exchange_id}_sub_{i}` (1-based), each linked to the next.
    pub fn linear(exchange_id: &str, count: usize) -> Self {
        let mut arena = Self::new();
        let mut previous: Option<usize> = None;
        for i in 1..=count {
            let idx = arena.push(AccountEntry::new(format!("{}_sub_{}", exchange_id, i)));
            if let Some(p) = previous {
                arena.next[p] = Some(idx);
                arena.prev[idx] = Some(p);
            }
            previous = Some(idx);
        }
        arena
    }

    fn push(&mut self, entry: AccountEntry) -> usize {
        let idx = self.nodes.len();
        self.index.insert(entry.account_id.clone(), idx);
        self.nodes.push(entry);
        self.next.push(None);
        self.prev.push(None);
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.index.contains_key(account_id)
    }

    /// Insert an unlinked account
    pub fn insert(&mut self, entry: AccountEntry) -> Result<usize, ChainError> {
        if self.index.contains_key(&entry.account_id) {
            return Err(ChainError::DuplicateAccount(entry.account_id));
        }
        Ok(self.push(entry))
    }

    fn idx(&self, account_id: &str) -> Result<usize, ChainError> {
        self.index
            .get(account_id)
            .copied()
            .ok_or_else(|| ChainError::UnknownAccount(account_id.to_string()))
    }

    /// Point `from` at `to`.
    ///
    /// `from` must have no successor and `to` no predecessor; both checks
    /// are O(1). When `to` already has a successor the cycle check walks
    /// back from `from`, which is O(n) in the length of that segment.
    pub fn link(&mut self, from: &str, to: &str) -> Result<(), ChainError> {
        if from == to {
            return Err(ChainError::SelfLink(from.to_string()));
        }
        let f = self.idx(from)?;
        let t = self.idx(to)?;

        if let Some(existing) = self.next[f] {
            return Err(ChainError::AlreadyLinked {
                from: from.to_string(),
                existing: self.nodes[existing].account_id.clone(),
            });
        }
        if let Some(existing) = self.prev[t] {
            return Err(ChainError::DuplicatePredecessor {
                to: to.to_string(),
                existing: self.nodes[existing].account_id.clone(),
            });
        }

        // `to` heads its segment and `from` tails its own; they close a
        // cycle only if walking back from `from` reaches `to`.
        if self.next[t].is_some() {
            let mut cursor = self.prev[f];
            while let Some(c) = cursor {
                if c == t {
                    return Err(ChainError::Cycle {
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
                cursor = self.prev[c];
            }
        }

        self.next[f] = Some(t);
        self.prev[t] = Some(f);
        Ok(())
    }

    pub fn get(&self, account_id: &str) -> Option<&AccountEntry> {
        self.index.get(account_id).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, account_id: &str) -> Option<&mut AccountEntry> {
        match self.index.get(account_id) {
            Some(&i) => Some(&mut self.nodes[i]),
            None => None,
        }
    }

    pub fn next_of(&self, account_id: &str) -> Option<&str> {
        let i = *self.index.get(account_id)?;
        self.next[i].map(|n| self.nodes[n].account_id.as_str())
    }

    pub fn prev_of(&self, account_id: &str) -> Option<&str> {
        let i = *self.index.get(account_id)?;
        self.prev[i].map(|p| self.nodes[p].account_id.as_str())
    }

    /// First account of the first segment (no predecessor)
    pub fn head(&self) -> Option<&AccountEntry> {
        self.prev
            .iter()
            .position(|p| p.is_none())
            .map(|i| &self.nodes[i])
    }

    /// Accounts in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &AccountEntry> {
        self.nodes.iter()
    }

    /// Accounts with their successor id, in insertion order
    pub fn iter_links(&self) -> impl Iterator<Item = (&AccountEntry, Option<&str>)> {
        self.nodes.iter().enumerate().map(move |(i, node)| {
            let next = self.next[i].map(|n| self.nodes[n].account_id.as_str());
            (node, next)
        })
    }

    /// Walk the chain from the head, following successor links
    pub fn ordered_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.prev.iter().position(|p| p.is_none());
        while let Some(i) = cursor {
            ids.push(self.nodes[i].account_id.clone());
            cursor = self.next[i];
        }
        ids
    }
}
