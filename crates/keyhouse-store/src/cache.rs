//! In-memory Key-Value Cache
//!
//! This module implements the serving store: the map every lookup reads
//! and every delta file writes into.
//!
//! ## What Does It Hold?
//!
//! Two maps, both versioned by logical commit time (LCT):
//!
//! - **Scalar map**: key → string value
//! - **Set map**: key → string set, with per-element versioning
//!
//! ## Why Logical Commit Times?
//!
//! Delta files are produced elsewhere and can replay out of order: a node
//! catching up may apply yesterday's file after today's, two files may
//! race during a parallel load, and a retried upload can deliver the same
//! mutation twice. The LCT makes all of that safe: every write carries the
//! writer's version, and the cache keeps whichever write has the highest
//! one. Applying the same set of mutations in any order converges to the
//! same state.
//!
//! ## How Writes Apply
//!
//! ```text
//! update(key, value, lct)
//!         ↓
//! lct <= cleanup watermark? ──YES──→ drop (already cleaned past it)
//!         ↓ NO
//! stored LCT >= lct? ──YES──→ drop (stale write)
//!         ↓ NO
//! replace entry, record lct
//! ```
//!
//! Deletes follow the same flow but leave a **tombstone**: the entry stays
//! resident with `value = None` and the delete's LCT, so a late-arriving
//! older update cannot resurrect the key. Tombstones are invisible to
//! reads. Set values apply the rule element-wise; each member tracks its
//! own `(last LCT, deleted)` pair, so deleting `"a"` at LCT 5 never blocks
//! adding `"b"` at LCT 4.
//!
//! ## Tombstone Cleanup
//!
//! Tombstones cost memory, so once the ingestion pipeline knows every file
//! up to some LCT has been fully replayed, `remove_deleted_keys(lct)`
//! physically drops tombstones at or below that watermark. Ordered
//! deleted-node indexes (LCT → keys) make the pass proportional to the
//! number of tombstones, not the cache size. The watermark is monotone,
//! and writes at or below it are rejected outright.
//!
//! ## Usage
//!
//! ```ignore
//! let cache = KeyValueCache::new();
//! cache.update_key_value("bid", "100", 1);
//! cache.delete_key("bid", 2);
//! cache.update_key_value("bid", "90", 1);   // stale, dropped
//!
//! let pairs = cache.get_key_value_pairs(&HashSet::from(["bid"]));
//! assert!(pairs.is_empty());                // tombstone wins
//!
//! cache.remove_deleted_keys(2);             // tombstone physically gone
//! ```
//!
//! ## Thread Safety
//!
//! Each map sits behind its own mutex and the cache is shared via
//! `Arc<KeyValueCache>`. Reads take the lock only long enough to copy the
//! requested entries out.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

/// Scalar entry. A `None` value is a deletion tombstone kept (with the
/// delete's LCT) until cleanup passes its commit time.
struct CacheEntry {
    value: Option<String>,
    last_logical_commit_time: i64,
}

/// Per-element state for set-valued keys. Deleted elements stay resident so
/// a late-arriving older update cannot re-add them.
#[derive(Clone, Copy)]
struct SetValueMeta {
    last_logical_commit_time: i64,
    is_deleted: bool,
}

#[derive(Default)]
struct ScalarMap {
    map: HashMap<String, CacheEntry>,
    // LCT → keys tombstoned at that time, ordered for cleanup.
    deleted_nodes: BTreeMap<i64, Vec<String>>,
    max_cleanup_lct: i64,
}

#[derive(Default)]
struct SetMap {
    map: HashMap<String, HashMap<String, SetValueMeta>>,
    // LCT → (key → elements) tombstoned at that time.
    deleted_nodes: BTreeMap<i64, HashMap<String, HashSet<String>>>,
    max_cleanup_lct: i64,
}

/// In-memory datastore for one key namespace.
#[derive(Default)]
pub struct KeyValueCache {
    scalars: Mutex<ScalarMap>,
    sets: Mutex<SetMap>,
}

impl KeyValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup. Tombstoned and absent keys are omitted.
    pub fn get_key_value_pairs(&self, keys: &HashSet<&str>) -> HashMap<String, String> {
        let scalars = self.scalars.lock().unwrap();
        let mut kv_pairs = HashMap::new();
        for &key in keys {
            if let Some(entry) = scalars.map.get(key) {
                if let Some(value) = &entry.value {
                    kv_pairs.insert(key.to_string(), value.clone());
                }
            }
        }
        kv_pairs
    }

    /// Set lookup: current (non-deleted) membership for each present key.
    /// Keys with no set entry at all are omitted.
    pub fn get_key_value_sets(&self, keys: &HashSet<&str>) -> HashMap<String, Vec<String>> {
        let sets = self.sets.lock().unwrap();
        let mut result = HashMap::new();
        for &key in keys {
            if let Some(members) = sets.map.get(key) {
                let mut values: Vec<String> = members
                    .iter()
                    .filter(|(_, meta)| !meta.is_deleted)
                    .map(|(value, _)| value.clone())
                    .collect();
                values.sort();
                result.insert(key.to_string(), values);
            }
        }
        result
    }

    /// Insert or replace the scalar value for `key` under max-LCT rules.
    pub fn update_key_value(&self, key: &str, value: &str, logical_commit_time: i64) {
        let mut guard = self.scalars.lock().unwrap();
        let scalars = &mut *guard;
        if logical_commit_time <= scalars.max_cleanup_lct {
            debug!(key, logical_commit_time, "update below cleanup watermark, dropped");
            return;
        }
        if let Some(entry) = scalars.map.get(key) {
            if entry.last_logical_commit_time >= logical_commit_time {
                debug!(key, logical_commit_time, "stale update dropped");
                return;
            }
            if entry.value.is_none() {
                // Overwriting a tombstone: drop its deleted-nodes entry.
                let stale_lct = entry.last_logical_commit_time;
                if let Some(keys) = scalars.deleted_nodes.get_mut(&stale_lct) {
                    keys.retain(|k| k != key);
                    if keys.is_empty() {
                        scalars.deleted_nodes.remove(&stale_lct);
                    }
                }
            }
        }
        scalars.map.insert(
            key.to_string(),
            CacheEntry {
                value: Some(value.to_string()),
                last_logical_commit_time: logical_commit_time,
            },
        );
    }

    /// Add `values` to the set for `key`, element-wise max-LCT. Deleted
    /// elements with older LCTs are revived.
    pub fn update_key_value_set(&self, key: &str, values: &[String], logical_commit_time: i64) {
        let mut guard = self.sets.lock().unwrap();
        let sets = &mut *guard;
        if logical_commit_time <= sets.max_cleanup_lct || values.is_empty() {
            return;
        }
        let members = sets.map.entry(key.to_string()).or_default();
        for value in values {
            let meta = members.entry(value.clone()).or_insert(SetValueMeta {
                last_logical_commit_time: 0,
                is_deleted: false,
            });
            if meta.last_logical_commit_time >= logical_commit_time {
                continue;
            }
            meta.last_logical_commit_time = logical_commit_time;
            meta.is_deleted = false;
        }
    }

    /// Delete the scalar entry for `key`. Even when the key is absent a
    /// tombstone is recorded so an older update cannot insert behind it.
    pub fn delete_key(&self, key: &str, logical_commit_time: i64) {
        let mut guard = self.scalars.lock().unwrap();
        let scalars = &mut *guard;
        if logical_commit_time <= scalars.max_cleanup_lct {
            return;
        }
        let newer_exists = scalars
            .map
            .get(key)
            .is_some_and(|entry| entry.last_logical_commit_time >= logical_commit_time);
        if newer_exists {
            return;
        }
        if let Some(entry) = scalars.map.get(key) {
            if entry.value.is_none() {
                let stale_lct = entry.last_logical_commit_time;
                if let Some(keys) = scalars.deleted_nodes.get_mut(&stale_lct) {
                    keys.retain(|k| k != key);
                    if keys.is_empty() {
                        scalars.deleted_nodes.remove(&stale_lct);
                    }
                }
            }
        }
        scalars.map.insert(
            key.to_string(),
            CacheEntry {
                value: None,
                last_logical_commit_time: logical_commit_time,
            },
        );
        scalars
            .deleted_nodes
            .entry(logical_commit_time)
            .or_default()
            .push(key.to_string());
    }

    /// Remove `values` from the set for `key`, element-wise max-LCT. The
    /// elements stay resident, marked deleted, until cleanup.
    pub fn delete_values_in_set(&self, key: &str, values: &[String], logical_commit_time: i64) {
        let mut guard = self.sets.lock().unwrap();
        let sets = &mut *guard;
        if logical_commit_time <= sets.max_cleanup_lct || values.is_empty() {
            return;
        }
        let members = sets.map.entry(key.to_string()).or_default();
        let mut deleted = Vec::new();
        for value in values {
            let meta = members.entry(value.clone()).or_insert(SetValueMeta {
                last_logical_commit_time: 0,
                is_deleted: false,
            });
            if meta.last_logical_commit_time >= logical_commit_time {
                continue;
            }
            meta.last_logical_commit_time = logical_commit_time;
            meta.is_deleted = true;
            deleted.push(value.clone());
        }
        if !deleted.is_empty() {
            let node = sets
                .deleted_nodes
                .entry(logical_commit_time)
                .or_default()
                .entry(key.to_string())
                .or_default();
            node.extend(deleted);
        }
    }

    /// Physically drop tombstones with LCT ≤ `logical_commit_time` from both
    /// maps and advance the cleanup watermark.
    pub fn remove_deleted_keys(&self, logical_commit_time: i64) {
        self.clean_up_scalar_map(logical_commit_time);
        self.clean_up_set_map(logical_commit_time);
    }

    fn clean_up_scalar_map(&self, logical_commit_time: i64) {
        let mut guard = self.scalars.lock().unwrap();
        let scalars = &mut *guard;
        let expired: Vec<i64> = scalars
            .deleted_nodes
            .range(..=logical_commit_time)
            .map(|(lct, _)| *lct)
            .collect();
        for lct in expired {
            if let Some(keys) = scalars.deleted_nodes.remove(&lct) {
                for key in keys {
                    let still_tombstone = scalars.map.get(&key).is_some_and(|entry| {
                        entry.value.is_none()
                            && entry.last_logical_commit_time <= logical_commit_time
                    });
                    if still_tombstone {
                        scalars.map.remove(&key);
                    }
                }
            }
        }
        scalars.max_cleanup_lct = scalars.max_cleanup_lct.max(logical_commit_time);
    }

    fn clean_up_set_map(&self, logical_commit_time: i64) {
        let mut guard = self.sets.lock().unwrap();
        let sets = &mut *guard;
        let expired: Vec<i64> = sets
            .deleted_nodes
            .range(..=logical_commit_time)
            .map(|(lct, _)| *lct)
            .collect();
        for lct in expired {
            if let Some(keys) = sets.deleted_nodes.remove(&lct) {
                for (key, values) in keys {
                    let Some(members) = sets.map.get_mut(&key) else {
                        continue;
                    };
                    for value in values {
                        let still_tombstone = members.get(&value).is_some_and(|meta| {
                            meta.is_deleted
                                && meta.last_logical_commit_time <= logical_commit_time
                        });
                        if still_tombstone {
                            members.remove(&value);
                        }
                    }
                    if members.is_empty() {
                        sets.map.remove(&key);
                    }
                }
            }
        }
        sets.max_cleanup_lct = sets.max_cleanup_lct.max(logical_commit_time);
    }
}
