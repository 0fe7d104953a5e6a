//! KeyHouse Sharding
//!
//! Everything a serving node needs to talk to its peers:
//!
//! - [`shard_manager`]: shard id → replica set, refreshed as an atomic
//!   snapshot swap so lookups never observe a half-applied mapping.
//! - [`cluster_mappings`]: the background task that rebuilds the mapping
//!   from the deployment's instance inventory on an interval.
//! - [`padding`]: power-of-two length padding for peer requests, so
//!   ciphertext sizes leak buckets rather than key counts.
//! - [`remote_client`]: HPKE-encrypted lookup client for one peer replica.
//! - [`lookup_server`]: the matching tonic service a node exposes to its
//!   peers (`InternalLookup` for loopback, `SecureLookup` in production).
//! - [`sharded`]: the [`Lookup`](keyhouse_store::Lookup) implementation
//!   that hash-routes a key batch across the local cache and remote
//!   shards, merging per-key results.

pub mod cluster_mappings;
pub mod lookup_server;
pub mod padding;
pub mod remote_client;
pub mod shard_manager;
pub mod sharded;

pub use cluster_mappings::{ClusterMappingsManager, InstanceClient, InstanceInfo};
pub use remote_client::{GrpcRemoteLookupClient, RemoteLookupClient};
pub use shard_manager::ShardManager;
pub use sharded::ShardedLookup;
