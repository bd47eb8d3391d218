//! Matching ledger entries to entities and netting IN against OUT

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::keys::{normalize_key, EntityKeySet, KeyRegistry};
use crate::types::*;
use crate::utils::money::{round_cents, sum_cents, zero_cents};

/// Net ledger movement of one entity in one week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerNet {
    pub total_in: BigDecimal,
    pub total_out: BigDecimal,
    /// `total_in - total_out`
    pub net: BigDecimal,
    /// Ids of the entries counted, sorted
    pub entry_ids: Vec<String>,
}

impl LedgerNet {
    pub fn empty() -> Self {
        Self {
            total_in: zero_cents(),
            total_out: zero_cents(),
            net: zero_cents(),
            entry_ids: Vec::new(),
        }
    }

    pub fn has_entries(&self) -> bool {
        !self.entry_ids.is_empty()
    }
}

/// Index of one week's ledger entries by normalized key
#[derive(Debug, Clone, Default)]
pub struct LedgerMatcher {
    by_key: BTreeMap<String, Vec<LedgerEntry>>,
}

impl LedgerMatcher {
    pub fn new(entries: Vec<LedgerEntry>) -> Self {
        let mut by_key: BTreeMap<String, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in entries {
            by_key
                .entry(normalize_key(&entry.entity_id))
                .or_default()
                .push(entry);
        }
        Self { by_key }
    }

    /// Net of every entry addressed to any key of the entity
    ///
    /// An entry reachable through two keys is counted once. An empty key set
    /// nets to zero.
    pub fn net_for(&self, keys: &EntityKeySet) -> LedgerNet {
        let mut matched: BTreeMap<&str, &LedgerEntry> = BTreeMap::new();
        for key in keys.iter() {
            if let Some(entries) = self.by_key.get(key) {
                for entry in entries {
                    matched.entry(entry.id.as_str()).or_insert(entry);
                }
            }
        }

        if matched.is_empty() {
            return LedgerNet::empty();
        }

        let total_in = sum_cents(
            matched
                .values()
                .filter(|e| e.direction == Direction::In)
                .map(|e| &e.amount),
        );
        let total_out = sum_cents(
            matched
                .values()
                .filter(|e| e.direction == Direction::Out)
                .map(|e| &e.amount),
        );
        let net = round_cents(&(&total_in - &total_out));

        LedgerNet {
            total_in,
            total_out,
            net,
            entry_ids: matched.keys().map(|id| id.to_string()).collect(),
        }
    }

    /// Entries whose key no registered entity owns, sorted by id
    pub fn unmatched(&self, registry: &KeyRegistry) -> Vec<&LedgerEntry> {
        let mut entries: Vec<&LedgerEntry> = self
            .by_key
            .iter()
            .filter(|(key, _)| registry.owner_of(key).is_none())
            .flat_map(|(_, entries)| entries.iter())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
