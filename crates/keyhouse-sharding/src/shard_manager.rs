//! Shard Manager
//!
//! Maps shard ids to replica sets and hands out lookup clients for remote
//! shards.
//!
//! ## Snapshot Swap
//!
//! The mapping is refreshed wholesale by the cluster mappings manager:
//!
//! ```text
//! refresher: build new snapshot (replica sets + clients) off to the side
//!                ↓
//!          *snapshot.write() = Arc::new(new)     one pointer swap
//!
//! reader:   snapshot.read().clone()              holds the old Arc
//! ```
//!
//! A fan-out that grabbed the snapshot before a refresh keeps a complete,
//! consistent view until it finishes; readers never observe a mapping
//! with half its shards updated.
//!
//! ## Replica Choice
//!
//! `get_client(shard)` picks uniformly at random among the shard's
//! replicas, spreading load without per-replica bookkeeping. Clients are
//! keyed by address and reused across refreshes, so a stable replica
//! keeps its warm connection through mapping churn.
//!
//! ## Startup vs. Refresh
//!
//! `create` refuses a mapping with an empty shard (a node that cannot
//! reach part of the key space must not serve; callers retry with
//! backoff until discovery converges). `insert_batch` tolerates one: the
//! replicas may genuinely be gone mid-flight, and the affected keys
//! degrade to per-key `Unavailable` until the next refresh.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use keyhouse_core::{KvError, Result};
use rand::Rng;
use tracing::info;

use crate::remote_client::RemoteLookupClient;

/// Builds a lookup client for a replica address. The seam exists so tests
/// can substitute scripted clients.
pub type RemoteClientFactory =
    Arc<dyn Fn(&str) -> Arc<dyn RemoteLookupClient> + Send + Sync>;

struct ShardSnapshot {
    /// Replica addresses per shard id.
    mappings: Vec<Vec<String>>,
    /// Address → client, shared across shards.
    clients: HashMap<String, Arc<dyn RemoteLookupClient>>,
}

/// Tracks which replicas serve each shard.
pub struct ShardManager {
    snapshot: RwLock<Arc<ShardSnapshot>>,
    client_factory: RemoteClientFactory,
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager").finish_non_exhaustive()
    }
}

impl ShardManager {
    /// Build a manager from the initial cluster mapping. Every shard must
    /// have at least one replica; otherwise the caller is expected to retry
    /// (with backoff) until discovery converges.
    pub fn create(
        cluster_mappings: Vec<HashSet<String>>,
        client_factory: RemoteClientFactory,
    ) -> Result<Self> {
        let snapshot = build_snapshot(&cluster_mappings, &client_factory, &HashMap::new())?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            client_factory,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.snapshot.read().unwrap().mappings.len()
    }

    /// Client for a randomly chosen replica of `shard`. `None` when the
    /// shard id is out of range or (transiently) has no replicas.
    pub fn get_client(&self, shard: usize) -> Option<Arc<dyn RemoteLookupClient>> {
        let snapshot = self.snapshot.read().unwrap().clone();
        let replicas = snapshot.mappings.get(shard)?;
        if replicas.is_empty() {
            return None;
        }
        let pick = rand::thread_rng().gen_range(0..replicas.len());
        snapshot.clients.get(&replicas[pick]).cloned()
    }

    /// Replace the full mapping atomically. Existing clients are reused for
    /// addresses that survive the update; empty shards are tolerated here
    /// (the previous replicas may already be gone) and simply yield no
    /// client until the next refresh.
    pub fn insert_batch(&self, cluster_mappings: Vec<HashSet<String>>) {
        let previous = self.snapshot.read().unwrap().clone();
        let snapshot = build_snapshot_lenient(&cluster_mappings, &self.client_factory, &previous.clients);
        info!(
            num_shards = cluster_mappings.len(),
            replicas = snapshot.clients.len(),
            "Cluster mapping updated"
        );
        *self.snapshot.write().unwrap() = Arc::new(snapshot);
    }
}

fn build_snapshot(
    cluster_mappings: &[HashSet<String>],
    client_factory: &RemoteClientFactory,
    reuse: &HashMap<String, Arc<dyn RemoteLookupClient>>,
) -> Result<ShardSnapshot> {
    if cluster_mappings.is_empty() {
        return Err(KvError::invalid_argument("Cluster mapping is empty"));
    }
    for (shard, replicas) in cluster_mappings.iter().enumerate() {
        if replicas.is_empty() {
            return Err(KvError::invalid_argument(format!(
                "Shard {shard} has no replicas"
            )));
        }
    }
    Ok(build_snapshot_lenient(cluster_mappings, client_factory, reuse))
}

fn build_snapshot_lenient(
    cluster_mappings: &[HashSet<String>],
    client_factory: &RemoteClientFactory,
    reuse: &HashMap<String, Arc<dyn RemoteLookupClient>>,
) -> ShardSnapshot {
    let mut clients: HashMap<String, Arc<dyn RemoteLookupClient>> = HashMap::new();
    let mut mappings = Vec::with_capacity(cluster_mappings.len());
    for replicas in cluster_mappings {
        let mut addresses: Vec<String> = replicas.iter().cloned().collect();
        addresses.sort();
        for address in &addresses {
            clients
                .entry(address.clone())
                .or_insert_with(|| match reuse.get(address) {
                    Some(client) => client.clone(),
                    None => client_factory(address),
                });
        }
        mappings.push(addresses);
    }
    ShardSnapshot { mappings, clients }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use keyhouse_proto::internal::InternalLookupResponse;

    struct NamedClient {
        name: String,
    }

    #[async_trait]
    impl RemoteLookupClient for NamedClient {
        async fn get_values(
            &self,
            _serialized_request: Bytes,
            _padding: usize,
        ) -> Result<InternalLookupResponse> {
            let _ = &self.name;
            Ok(InternalLookupResponse::default())
        }
    }

    fn factory() -> RemoteClientFactory {
        Arc::new(|address: &str| {
            Arc::new(NamedClient {
                name: address.to_string(),
            }) as Arc<dyn RemoteLookupClient>
        })
    }

    fn mappings(replicas: &[&[&str]]) -> Vec<HashSet<String>> {
        replicas
            .iter()
            .map(|addresses| addresses.iter().map(|a| a.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_create_requires_replicas_everywhere() {
        let err = ShardManager::create(mappings(&[&["10.0.0.1"], &[]]), factory()).unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_rejects_empty_mapping() {
        assert!(ShardManager::create(Vec::new(), factory()).is_err());
    }

    #[test]
    fn test_get_client_in_range() {
        let manager =
            ShardManager::create(mappings(&[&["10.0.0.1"], &["10.0.0.2"]]), factory()).unwrap();
        assert!(manager.get_client(0).is_some());
        assert!(manager.get_client(1).is_some());
        assert!(manager.get_client(2).is_none());
    }

    #[test]
    fn test_insert_batch_swaps_mapping() {
        let manager = ShardManager::create(mappings(&[&["a"], &["b"]]), factory()).unwrap();
        manager.insert_batch(mappings(&[&["a"], &[]]));
        assert!(manager.get_client(0).is_some());
        assert!(manager.get_client(1).is_none());
        manager.insert_batch(mappings(&[&["a"], &["c", "d"]]));
        assert!(manager.get_client(1).is_some());
    }

    #[test]
    fn test_num_shards() {
        let manager =
            ShardManager::create(mappings(&[&["a"], &["b"], &["c"]]), factory()).unwrap();
        assert_eq!(manager.num_shards(), 3);
    }
}
