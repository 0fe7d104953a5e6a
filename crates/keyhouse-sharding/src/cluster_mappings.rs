//! Cluster Mappings Manager
//!
//! Periodically rebuilds the shard → replica mapping from the deployment's
//! instance inventory and pushes it into the [`ShardManager`]. Instance
//! discovery itself is an external collaborator behind the
//! [`InstanceClient`] trait (cloud APIs, service registries, a static file
//! in tests); this module only filters, groups, and refreshes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keyhouse_core::{KvError, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::shard_manager::ShardManager;

/// One serving instance as reported by the deployment inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Peer lookup endpoint, e.g. `http://10.0.1.7:50099`.
    pub address: String,
    /// Environment tag the instance is deployed under.
    pub environment: String,
    /// Shard the instance serves.
    pub shard_num: i32,
}

/// Deployment inventory collaborator.
#[async_trait]
pub trait InstanceClient: Send + Sync {
    /// All serving instances currently visible, across environments.
    async fn list_instances(&self) -> Result<Vec<InstanceInfo>>;
}

/// Periodic refresher for the shard manager's cluster mapping.
pub struct ClusterMappingsManager {
    environment: String,
    num_shards: i32,
    update_interval: Duration,
    instance_client: Arc<dyn InstanceClient>,
}

impl ClusterMappingsManager {
    pub fn new(
        environment: String,
        num_shards: i32,
        update_interval: Duration,
        instance_client: Arc<dyn InstanceClient>,
    ) -> Result<Self> {
        if num_shards <= 1 {
            return Err(KvError::invalid_argument(
                "num_shards for sharded lookup must be > 1",
            ));
        }
        Ok(Self {
            environment,
            num_shards,
            update_interval,
            instance_client,
        })
    }

    /// Query the inventory and group replicas by shard, filtered by this
    /// deployment's environment tag. Out-of-range shard numbers are
    /// dropped with a warning.
    pub async fn get_cluster_mappings(&self) -> Result<Vec<HashSet<String>>> {
        let instances = self.instance_client.list_instances().await?;
        let mut mappings = vec![HashSet::new(); self.num_shards as usize];
        for instance in instances {
            if instance.environment != self.environment {
                continue;
            }
            if instance.shard_num < 0 || instance.shard_num >= self.num_shards {
                warn!(
                    address = %instance.address,
                    shard_num = instance.shard_num,
                    "Instance reports an out-of-range shard, ignoring"
                );
                continue;
            }
            mappings[instance.shard_num as usize].insert(instance.address);
        }
        Ok(mappings)
    }

    /// Start the refresh loop. The returned handle aborts the loop when
    /// dropped by the caller via [`JoinHandle::abort`].
    pub fn start(self: Arc<Self>, shard_manager: Arc<ShardManager>) -> JoinHandle<()> {
        info!(
            environment = %self.environment,
            interval_ms = self.update_interval.as_millis() as u64,
            "Starting cluster mappings refresh"
        );
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.update_interval).await;
                match self.get_cluster_mappings().await {
                    Ok(mappings) => shard_manager.insert_batch(mappings),
                    Err(e) => warn!(error = %e, "Cluster mapping refresh failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticInstanceClient {
        instances: Vec<InstanceInfo>,
    }

    #[async_trait]
    impl InstanceClient for StaticInstanceClient {
        async fn list_instances(&self) -> Result<Vec<InstanceInfo>> {
            Ok(self.instances.clone())
        }
    }

    fn instance(address: &str, environment: &str, shard_num: i32) -> InstanceInfo {
        InstanceInfo {
            address: address.to_string(),
            environment: environment.to_string(),
            shard_num,
        }
    }

    fn manager(instances: Vec<InstanceInfo>) -> ClusterMappingsManager {
        ClusterMappingsManager::new(
            "prod".to_string(),
            2,
            Duration::from_millis(100),
            Arc::new(StaticInstanceClient { instances }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_groups_by_shard_and_filters_environment() {
        let mappings = manager(vec![
            instance("http://a:50099", "prod", 0),
            instance("http://b:50099", "prod", 1),
            instance("http://c:50099", "prod", 1),
            instance("http://staging:50099", "staging", 0),
        ])
        .get_cluster_mappings()
        .await
        .unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0], HashSet::from(["http://a:50099".to_string()]));
        assert_eq!(mappings[1].len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_shards_dropped() {
        let mappings = manager(vec![
            instance("http://a:50099", "prod", 0),
            instance("http://weird:50099", "prod", 9),
        ])
        .get_cluster_mappings()
        .await
        .unwrap();
        assert_eq!(mappings[0].len(), 1);
        assert_eq!(mappings[1].len(), 0);
    }

    #[test]
    fn test_rejects_single_shard() {
        let result = ClusterMappingsManager::new(
            "prod".to_string(),
            1,
            Duration::from_millis(100),
            Arc::new(StaticInstanceClient { instances: vec![] }),
        );
        assert!(result.is_err());
    }
}
