//! Sharded Lookup
//!
//! The `Lookup` implementation for multi-shard deployments: one node owns
//! one slice of the key space and asks its peers for the rest.
//!
//! ## Fan-Out Flow
//!
//! ```text
//! get_key_values(["k1", "k2", "k3", "k4"])
//!         ↓ shard_id(key) = hash(key) % num_shards
//! shard 0 (local): ["k2"]        shard 1: ["k1", "k4"]     shard 2: ["k3"]
//!         ↓                              ↓                        ↓
//!   local cache               SecureLookup to one          SecureLookup to one
//!                             replica of shard 1           replica of shard 2
//!         └──────────────────────── join ─────────────────────────┘
//!                                    ↓
//!                 one response, per-key value or status
//! ```
//!
//! All calls run concurrently; the merge preserves per-key provenance:
//!
//! - keys a peer answered keep the peer's value or inline status;
//! - keys a peer left out come back as `NotFound`;
//! - keys owned by an unreachable shard come back as `Unavailable`.
//!
//! A failed replica therefore degrades only that shard's keys, never the
//! whole request.
//!
//! ## Why Pad the Requests?
//!
//! The peers are reached over HPKE, but ciphertext length still leaks how
//! many keys routed to each shard. Every remote request in one fan-out is
//! padded to the longest one before encryption, so an observer sees equal
//! sized blobs regardless of how the batch split.
//!
//! ## Queries
//!
//! `run_query` gathers every set the expression references through the
//! same fan-out, then evaluates the expression locally. Query semantics
//! never depend on a peer's parser version.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use keyhouse_core::{shard_id, Result};
use keyhouse_proto::internal::{InternalLookupRequest, InternalLookupResponse};
use keyhouse_store::lookup::{status_result, Lookup};
use prost::Message;
use tracing::{debug, warn};

use crate::shard_manager::ShardManager;

/// Inline status codes for keys the fan-out could not resolve.
const CODE_NOT_FOUND: i32 = 5;
const CODE_UNAVAILABLE: i32 = 14;

/// Hash-routes lookups across the local cache and remote shard replicas.
pub struct ShardedLookup {
    local_lookup: Arc<dyn Lookup>,
    num_shards: i32,
    current_shard_num: i32,
    shard_manager: Arc<ShardManager>,
}

impl ShardedLookup {
    pub fn new(
        local_lookup: Arc<dyn Lookup>,
        num_shards: i32,
        current_shard_num: i32,
        shard_manager: Arc<ShardManager>,
    ) -> Self {
        debug_assert!(num_shards > 1);
        debug_assert!((0..num_shards).contains(&current_shard_num));
        Self {
            local_lookup,
            num_shards,
            current_shard_num,
            shard_manager,
        }
    }

    /// Deduplicate and partition `keys` by owning shard. Slices are sorted
    /// so serialized peer requests are deterministic.
    fn partition_keys(&self, keys: &[String]) -> Vec<Vec<String>> {
        let mut shards = vec![Vec::new(); self.num_shards as usize];
        let unique: HashSet<&String> = keys.iter().collect();
        for key in unique {
            shards[shard_id(key, self.num_shards) as usize].push(key.clone());
        }
        for slice in &mut shards {
            slice.sort();
        }
        shards
    }

    async fn sharded_lookup(
        &self,
        keys: &[String],
        lookup_sets: bool,
    ) -> Result<InternalLookupResponse> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let shards = self.partition_keys(keys);

        // Serialize every remote request first so each can be padded to the
        // longest one in this fan-out.
        let mut remote_requests: Vec<Option<Bytes>> = vec![None; shards.len()];
        let mut max_len = 0usize;
        for (shard, slice) in shards.iter().enumerate() {
            if shard as i32 == self.current_shard_num || slice.is_empty() {
                continue;
            }
            let serialized = InternalLookupRequest {
                keys: slice.clone(),
                lookup_sets,
            }
            .encode_to_vec();
            max_len = max_len.max(serialized.len());
            remote_requests[shard] = Some(Bytes::from(serialized));
        }

        let calls = shards.iter().enumerate().map(|(shard, slice)| {
            let serialized = remote_requests[shard].clone();
            async move {
                if slice.is_empty() {
                    return (shard, Ok(InternalLookupResponse::default()));
                }
                if shard as i32 == self.current_shard_num {
                    let local = if lookup_sets {
                        self.local_lookup.get_key_value_set(slice).await
                    } else {
                        self.local_lookup.get_key_values(slice).await
                    };
                    return (shard, local);
                }
                let serialized = serialized.expect("remote slice is serialized above");
                let padding = max_len - serialized.len();
                match self.shard_manager.get_client(shard) {
                    Some(client) => (shard, client.get_values(serialized, padding).await),
                    None => (
                        shard,
                        Err(keyhouse_core::KvError::unavailable(format!(
                            "Shard {shard} has no reachable replicas"
                        ))),
                    ),
                }
            }
        });

        for (shard, result) in join_all(calls).await {
            match result {
                Ok(mut shard_response) => {
                    for key in &shards[shard] {
                        let entry = shard_response
                            .kv_pairs
                            .remove(key)
                            .unwrap_or_else(|| status_result(CODE_NOT_FOUND, ""));
                        response.kv_pairs.insert(key.clone(), entry);
                    }
                }
                Err(e) => {
                    warn!(shard, error = %e, "Shard lookup failed, degrading its keys");
                    for key in &shards[shard] {
                        response
                            .kv_pairs
                            .insert(key.clone(), status_result(CODE_UNAVAILABLE, ""));
                    }
                }
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl Lookup for ShardedLookup {
    async fn get_key_values(&self, keys: &[String]) -> Result<InternalLookupResponse> {
        self.sharded_lookup(keys, false).await
    }

    async fn get_key_value_set(&self, keys: &[String]) -> Result<InternalLookupResponse> {
        self.sharded_lookup(keys, true).await
    }

    async fn run_query(&self, query: &str) -> Result<Vec<String>> {
        let node = keyhouse_store::query::parse(query)?;
        let referenced: Vec<String> = node.keys().into_iter().map(String::from).collect();
        let response = self.get_key_value_set(&referenced).await?;

        let mut sets: HashMap<String, HashSet<String>> = HashMap::new();
        for (key, result) in response.kv_pairs {
            use keyhouse_proto::internal::single_lookup_result::SingleLookupResult;
            if let Some(SingleLookupResult::KeysetValues(keyset)) = result.single_lookup_result {
                sets.insert(key, keyset.values.into_iter().collect());
            }
        }
        debug!(keys = referenced.len(), resolved = sets.len(), "Evaluating sharded query");
        let mut result: Vec<String> = node
            .eval(&|key: &str| sets.get(key).cloned().unwrap_or_default())
            .into_iter()
            .collect();
        result.sort();
        Ok(result)
    }
}
