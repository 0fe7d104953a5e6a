//! Static Instance Discovery
//!
//! Cloud inventories implement [`InstanceClient`] against their provider
//! APIs; this is the local/single-cluster variant that reads the whole
//! map from `KEYHOUSE_CLUSTER_MAP`:
//!
//! ```text
//! KEYHOUSE_CLUSTER_MAP="0=http://10.0.0.1:50099,http://10.0.0.2:50099;1=http://10.0.1.1:50099"
//! ```
//!
//! Shard entries are `;`-separated, replicas `,`-separated. Every address
//! is reported under this node's environment tag.

use async_trait::async_trait;
use keyhouse_core::{KvError, Result};
use keyhouse_sharding::{InstanceClient, InstanceInfo};

pub struct EnvInstanceClient {
    instances: Vec<InstanceInfo>,
}

impl EnvInstanceClient {
    pub fn from_env(environment: &str) -> Result<Self> {
        let raw = std::env::var("KEYHOUSE_CLUSTER_MAP").unwrap_or_default();
        Self::parse(environment, &raw)
    }

    pub fn parse(environment: &str, raw: &str) -> Result<Self> {
        let mut instances = Vec::new();
        for entry in raw.split(';').filter(|s| !s.is_empty()) {
            let (shard, replicas) = entry.split_once('=').ok_or_else(|| {
                KvError::invalid_argument(format!("Malformed cluster map entry: {entry}"))
            })?;
            let shard_num: i32 = shard.trim().parse().map_err(|_| {
                KvError::invalid_argument(format!("Malformed shard number: {shard}"))
            })?;
            for address in replicas.split(',').filter(|s| !s.is_empty()) {
                instances.push(InstanceInfo {
                    address: address.trim().to_string(),
                    environment: environment.to_string(),
                    shard_num,
                });
            }
        }
        Ok(Self { instances })
    }
}

#[async_trait]
impl InstanceClient for EnvInstanceClient {
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
        Ok(self.instances.clone())
    }
}
