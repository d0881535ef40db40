//! Per-address transaction history, newest first, capped.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Address;

/// Hard cap per address; the oldest entry falls off the end.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub hash: String,
    pub from: Address,
    pub to: Address,
    pub value_wei: u128,
    pub network_key: String,
    pub status: TxStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub network_key: Option<String>,
    pub sent_only: bool,
    pub received_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub struct TxHistory {
    entries: RwLock<HashMap<Address, Vec<HistoryEntry>>>,
}

impl TxHistory {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a new entry at the front of the address's list.
    pub fn record(&self, address: &Address, entry: HistoryEntry) {
        let mut entries = self.entries.write().expect("history lock poisoned");
        let list = entries.entry(address.clone()).or_default();
        list.insert(0, entry);
        list.truncate(HISTORY_CAP);
    }

    /// Update the status of a known transaction hash.
    pub fn set_status(&self, address: &Address, hash: &str, status: TxStatus) {
        let mut entries = self.entries.write().expect("history lock poisoned");
        if let Some(list) = entries.get_mut(address) {
            if let Some(entry) = list.iter_mut().find(|e| e.hash == hash) {
                entry.status = status;
            }
        }
    }

    pub fn list(&self, address: &Address, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        let entries = self.entries.read().expect("history lock poisoned");
        let Some(list) = entries.get(address) else {
            return Vec::new();
        };
        list.iter()
            .filter(|e| {
                filter
                    .network_key
                    .as_ref()
                    .map(|k| &e.network_key == k)
                    .unwrap_or(true)
            })
            .filter(|e| !filter.sent_only || &e.from == address)
            .filter(|e| !filter.received_only || &e.to == address)
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub(crate) fn export(&self) -> HashMap<Address, Vec<HistoryEntry>> {
        self.entries.read().expect("history lock poisoned").clone()
    }

    pub(crate) fn import(&self, data: HashMap<Address, Vec<HistoryEntry>>) {
        *self.entries.write().expect("history lock poisoned") = data;
    }

    pub fn clear(&self) {
        self.entries.write().expect("history lock poisoned").clear();
    }
}

impl Default for TxHistory {
    fn default() -> Self {
        Self::new()
    }
}
