//! Entity key resolution
//!
//! An agent or player can be addressed by its internal id, the platform's
//! external id, or an importer-prefixed id (`cp_<id>`). Every alias is
//! normalized into one [`EntityKeySet`] per entity, and a [`KeyRegistry`]
//! guarantees that no key is owned by two canonical entities within a
//! computation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::config::SettlementConfig;
use crate::types::IntegrityWarning;

/// Normalize a raw key for comparison
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Complete set of keys a ledger entry for one entity may be addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKeySet {
    canonical: String,
    keys: BTreeSet<String>,
}

impl EntityKeySet {
    /// Create a set that owns only the canonical id
    pub fn new(canonical: &str) -> Self {
        let mut keys = BTreeSet::new();
        let normalized = normalize_key(canonical);
        if !normalized.is_empty() {
            keys.insert(normalized);
        }
        Self {
            canonical: canonical.to_string(),
            keys,
        }
    }

    /// Canonical entity id, as supplied (not normalized)
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn insert(&mut self, raw: &str) -> bool {
        let key = normalize_key(raw);
        !key.is_empty() && self.keys.insert(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.keys.remove(&normalize_key(key))
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.keys.contains(&normalize_key(raw))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.keys.iter()
    }

    /// Keys other than the canonical id
    pub fn aliases(&self) -> impl Iterator<Item = &String> {
        let canonical = normalize_key(&self.canonical);
        self.keys.iter().filter(move |key| **key != canonical)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}

/// Builds key sets from an entity's known identifiers
#[derive(Debug, Clone)]
pub struct EntityKeyResolver {
    prefixes: Vec<String>,
}

impl EntityKeyResolver {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self {
            prefixes: prefixes.iter().map(|p| normalize_key(p)).collect(),
        }
    }

    pub fn from_config(config: &SettlementConfig) -> Self {
        Self::new(config.importer_prefixes.clone())
    }

    /// Every key an entry for this entity might carry
    ///
    /// The result is a set: the same alias supplied twice, or supplied both
    /// bare and prefixed, yields a single key.
    pub fn resolve<'a, I>(&self, canonical: &'a str, cross_refs: I) -> EntityKeySet
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = EntityKeySet::new(canonical);
        let ids: Vec<String> = std::iter::once(canonical)
            .chain(cross_refs)
            .map(normalize_key)
            .filter(|id| !id.is_empty())
            .collect();

        for id in &ids {
            let bare = self.strip_prefix(id);
            set.insert(bare);
            for prefix in &self.prefixes {
                set.insert(&format!("{}{}", prefix, bare));
            }
        }

        set
    }

    fn strip_prefix<'a>(&self, id: &'a str) -> &'a str {
        self.prefixes
            .iter()
            .find_map(|prefix| id.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(id)
    }
}

/// Key ownership for one settlement computation
///
/// First writer wins: a key already owned by another canonical entity is
/// dropped from the later entity's set and reported as an integrity warning.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    owners: BTreeMap<String, String>,
    warnings: Vec<IntegrityWarning>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the keys of `set`, returning the keys this entity actually owns
    pub fn register(&mut self, mut set: EntityKeySet) -> EntityKeySet {
        let canonical = set.canonical().to_string();
        let mut rejected = Vec::new();

        for key in set.iter() {
            match self.owners.get(key) {
                Some(owner) if *owner != canonical => {
                    rejected.push((key.clone(), owner.clone()));
                }
                Some(_) => {}
                None => {
                    self.owners.insert(key.clone(), canonical.clone());
                }
            }
        }

        for (key, owner) in rejected {
            warn!(
                key = %key,
                kept = %owner,
                rejected = %canonical,
                "entity key claimed by two canonical entities"
            );
            self.warnings.push(IntegrityWarning {
                message: format!(
                    "key '{}' belongs to '{}' and was also claimed by '{}'",
                    key, owner, canonical
                ),
                key: key.clone(),
                kept_entity: owner,
                rejected_entity: canonical.clone(),
            });
            set.remove(&key);
        }

        set
    }

    /// Canonical owner of a raw key
    pub fn owner_of(&self, raw: &str) -> Option<&str> {
        self.owners.get(&normalize_key(raw)).map(String::as_str)
    }

    pub fn warnings(&self) -> &[IntegrityWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<IntegrityWarning> {
        self.warnings
    }
}
