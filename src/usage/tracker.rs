//! Usage Tracker
//!
//! Derives per-datanode usage from the container and pipeline tables. Nothing
//! is stored: every query recomputes counts from a fresh snapshot.

use crate::container::ContainerManager;
use crate::error::Result;
use crate::node::{Node, NodeId, NodeRegistry};
use crate::pipeline::PipelineManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Derived usage of one datanode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub node: Node,
    pub container_count: u64,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
    pub utilization: f64,
}

/// Read-only usage queries
pub struct UsageTracker {
    registry: Arc<NodeRegistry>,
    pipelines: Arc<PipelineManager>,
    containers: Arc<ContainerManager>,
}

impl UsageTracker {
    pub fn new(
        registry: Arc<NodeRegistry>,
        pipelines: Arc<PipelineManager>,
        containers: Arc<ContainerManager>,
    ) -> Self {
        Self {
            registry,
            pipelines,
            containers,
        }
    }

    /// Containers per node, counting each container once on every member of
    /// its pipeline
    fn container_counts(&self) -> HashMap<NodeId, u64> {
        let mut counts = HashMap::new();
        for pipeline in self.pipelines.list_pipelines() {
            let hosted = self.containers.list_containers_on_pipeline(pipeline.id).len() as u64;
            if hosted == 0 {
                continue;
            }
            for node_id in &pipeline.nodes {
                *counts.entry(*node_id).or_insert(0) += hosted;
            }
        }
        counts
    }

    fn usage_with(node: Node, counts: &HashMap<NodeId, u64>) -> UsageInfo {
        UsageInfo {
            container_count: counts.get(&node.id).copied().unwrap_or(0),
            capacity_bytes: node.capacity_bytes,
            used_bytes: node.used_bytes,
            remaining_bytes: node.remaining_bytes(),
            utilization: node.utilization(),
            node,
        }
    }

    /// Usage of a single node
    pub fn usage_for(&self, node: &Node) -> UsageInfo {
        Self::usage_with(node.clone(), &self.container_counts())
    }

    /// Usage of the node matching `address` and `node_id`
    pub fn usage_for_address(&self, address: &str, node_id: NodeId) -> Result<UsageInfo> {
        let node = self.registry.get_node(address, node_id)?;
        Ok(self.usage_for(&node))
    }

    /// Up to `k` nodes ordered by container count, descending when
    /// `most_used`, ascending otherwise; ties by node id
    pub fn top_k(&self, most_used: bool, k: usize) -> Vec<UsageInfo> {
        let counts = self.container_counts();
        let mut usage: Vec<UsageInfo> = self
            .registry
            .list_nodes()
            .into_iter()
            .map(|node| Self::usage_with(node, &counts))
            .collect();

        usage.sort_by(|a, b| {
            let by_count = if most_used {
                b.container_count.cmp(&a.container_count)
            } else {
                a.container_count.cmp(&b.container_count)
            };
            by_count.then_with(|| a.node.id.cmp(&b.node.id))
        });
        usage.truncate(k);
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::replication::ReplicationConfig;
    use crate::node::descriptor::{test_report, CURRENT_VERSION};
    use crate::placement::CapacityPlacement;

    struct Fixture {
        registry: Arc<NodeRegistry>,
        containers: Arc<ContainerManager>,
        tracker: UsageTracker,
    }

    fn setup(nodes: usize) -> Fixture {
        let registry = NodeRegistry::new();
        for i in 0..nodes {
            registry.register(&test_report(&format!("10.0.0.{}", i + 1), CURRENT_VERSION, 1000, 100));
        }
        let pipelines = PipelineManager::new(registry.clone(), Arc::new(CapacityPlacement::new(0.95)), 3);
        let containers = ContainerManager::new(pipelines.clone());
        let tracker = UsageTracker::new(registry.clone(), pipelines, containers.clone());
        Fixture {
            registry,
            containers,
            tracker,
        }
    }

    #[test]
    fn test_fresh_cluster_has_no_containers() {
        let fixture = setup(3);
        for node in fixture.registry.list_nodes() {
            let usage = fixture.tracker.usage_for(&node);
            assert_eq!(usage.container_count, 0);
            assert_eq!(usage.remaining_bytes, 900);
        }
    }

    #[test]
    fn test_single_factor_one_container_touches_one_node() {
        let fixture = setup(3);
        fixture
            .containers
            .create_container(ReplicationConfig::stand_alone_one(), "ozone")
            .unwrap();

        let counts: Vec<u64> = fixture
            .registry
            .list_nodes()
            .iter()
            .map(|n| fixture.tracker.usage_for(n).container_count)
            .collect();
        assert_eq!(counts.iter().filter(|c| **c == 1).count(), 1);
        assert_eq!(counts.iter().filter(|c| **c == 0).count(), 2);
        assert_eq!(counts.iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_counts_sum_to_containers_times_factor() {
        let fixture = setup(4);
        for _ in 0..2 {
            fixture
                .containers
                .create_container(ReplicationConfig::ratis_three(), "ozone")
                .unwrap();
        }
        fixture
            .containers
            .create_container(ReplicationConfig::stand_alone_one(), "ozone")
            .unwrap();

        let total: u64 = fixture.tracker.top_k(true, 10).iter().map(|u| u.container_count).sum();
        assert_eq!(total, 2 * 3 + 1);
    }

    #[test]
    fn test_top_k_ordering_and_bounds() {
        let fixture = setup(3);
        fixture
            .containers
            .create_container(ReplicationConfig::stand_alone_one(), "ozone")
            .unwrap();

        let most = fixture.tracker.top_k(true, 3);
        let least = fixture.tracker.top_k(false, 3);
        assert_eq!(most.len(), 3);
        assert_eq!(least.len(), 3);
        assert_eq!(most[0].container_count, 1);
        assert_eq!(least[2].container_count, 1);
        assert!(least[0].node.id < least[1].node.id);

        assert_eq!(fixture.tracker.top_k(true, 1).len(), 1);
        assert_eq!(fixture.tracker.top_k(false, 10).len(), 3);
    }

    #[test]
    fn test_usage_for_unknown_address() {
        let fixture = setup(1);
        let node = fixture.registry.list_nodes().remove(0);
        assert!(fixture.tracker.usage_for_address(&node.ip_address, node.id).is_ok());
        assert!(fixture.tracker.usage_for_address("192.168.1.1", node.id).is_err());
    }
}
