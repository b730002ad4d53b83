//! Pipeline Manager
//!
//! Owns every pipeline. Selection of a reusable pipeline, creation of a new
//! one and binding a container to it all happen under the single pipeline
//! table write lock, so a created pipeline is always registered before any
//! other caller can look, and a container never lands on a closed pipeline.

use super::types::{Pipeline, PipelineId, PipelineState};
use crate::container::ContainerId;
use crate::domain::replication::ReplicationConfig;
use crate::error::{Error, Result};
use crate::node::{NodeId, NodeRegistry};
use crate::placement::PlacementPolicy;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type PipelineTable = IndexMap<PipelineId, Pipeline>;

/// Pipeline counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub open: usize,
    pub closed: usize,
    pub created_total: u64,
}

/// Lifecycle owner for pipelines
pub struct PipelineManager {
    registry: Arc<NodeRegistry>,
    policy: Arc<dyn PlacementPolicy>,
    /// Containers an open pipeline may host before a new one is formed
    container_limit: usize,
    /// Insertion-ordered so listings and reuse ties follow creation order
    pipelines: RwLock<PipelineTable>,
    created_total: AtomicU64,
}

impl PipelineManager {
    pub fn new(
        registry: Arc<NodeRegistry>,
        policy: Arc<dyn PlacementPolicy>,
        container_limit: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            policy,
            container_limit: container_limit.max(1),
            pipelines: RwLock::new(IndexMap::new()),
            created_total: AtomicU64::new(0),
        })
    }

    /// Name of the placement policy in use
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Return an open pipeline with room for `config`, creating one if none
    /// qualifies.
    pub fn get_or_create_pipeline(&self, config: ReplicationConfig) -> Result<Pipeline> {
        let mut table = self.pipelines.write();
        let id = self.select_or_create(&mut table, config)?;
        Ok(table[&id].clone())
    }

    /// Pick or create a pipeline for `config` and bind `container_id` to it
    /// in the same critical section.
    pub fn allocate_container(
        &self,
        config: ReplicationConfig,
        container_id: ContainerId,
    ) -> Result<Pipeline> {
        let mut table = self.pipelines.write();
        let id = self.select_or_create(&mut table, config)?;
        let pipeline = table
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("pipeline {} vanished during allocation", id)))?;
        pipeline.containers.insert(container_id);
        pipeline.open_containers.insert(container_id);
        debug!("Bound container {} to pipeline {}", container_id, id);
        Ok(pipeline.clone())
    }

    /// Always form a fresh pipeline for `config`
    pub fn create_pipeline(&self, config: ReplicationConfig) -> Result<Pipeline> {
        let mut table = self.pipelines.write();
        let id = self.create_locked(&mut table, config)?;
        Ok(table[&id].clone())
    }

    /// Least-loaded open pipeline for `config`, ties by creation order
    fn least_loaded(table: &PipelineTable, config: ReplicationConfig, limit: Option<usize>) -> Option<PipelineId> {
        table
            .values()
            .enumerate()
            .filter(|(_, p)| p.replication == config && p.is_open())
            .filter(|(_, p)| limit.map_or(true, |limit| p.has_room(limit)))
            .min_by_key(|(idx, p)| (p.open_containers.len(), *idx))
            .map(|(_, p)| p.id)
    }

    fn select_or_create(&self, table: &mut PipelineTable, config: ReplicationConfig) -> Result<PipelineId> {
        if let Some(id) = Self::least_loaded(table, config, Some(self.container_limit)) {
            debug!("Reusing pipeline {} for {}", id, config);
            return Ok(id);
        }

        let err = match self.create_locked(table, config) {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };

        // Every eligible node already serves an open pipeline for this
        // config; the container limit becomes soft.
        if matches!(err, Error::InsufficientNodes { .. }) {
            if let Some(id) = Self::least_loaded(table, config, None) {
                debug!("All {} pipelines are full, overfilling {}", config, id);
                return Ok(id);
            }
        }

        warn!("Cannot form {} pipeline: {}", config, err);
        Err(err)
    }

    fn create_locked(&self, table: &mut PipelineTable, config: ReplicationConfig) -> Result<PipelineId> {
        // A node serves at most one open pipeline per replication config
        let exclude: HashSet<NodeId> = table
            .values()
            .filter(|p| p.is_open() && p.replication == config)
            .flat_map(|p| p.nodes.iter().copied())
            .collect();

        let candidates = self.registry.online_nodes();
        let selected = self
            .policy
            .select_nodes(&candidates, config.factor.node_count(), &exclude)?;

        let pipeline = Pipeline::new(config, selected.iter().map(|n| n.id).collect());
        let id = pipeline.id;
        info!(
            "Created pipeline {} ({}) on [{}] via {} placement",
            id,
            config,
            selected
                .iter()
                .map(|n| n.ip_address.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.policy.name()
        );

        table.insert(id, pipeline);
        self.created_total.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Exact lookup
    pub fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        self.pipelines
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::PipelineNotFound {
                pipeline_id: id.to_string(),
            })
    }

    /// Every pipeline regardless of state, in creation order
    pub fn list_pipelines(&self) -> Vec<Pipeline> {
        self.pipelines.read().values().cloned().collect()
    }

    /// OPEN -> CLOSED; closing a closed pipeline is a no-op
    pub fn close_pipeline(&self, id: PipelineId) -> Result<Pipeline> {
        let mut table = self.pipelines.write();
        let pipeline = table.get_mut(&id).ok_or_else(|| Error::PipelineNotFound {
            pipeline_id: id.to_string(),
        })?;

        if pipeline.is_open() {
            pipeline.state = PipelineState::Closed;
            info!("Closed pipeline {} ({})", id, pipeline.replication);
        }
        Ok(pipeline.clone())
    }

    /// Close every open pipeline that has `node_id` as a member
    pub fn close_pipelines_with_node(&self, node_id: NodeId) -> Vec<PipelineId> {
        let mut table = self.pipelines.write();
        Self::close_with_node_locked(&mut table, node_id)
    }

    /// Run `remove` and close the node's pipelines under one table lock, so
    /// no allocation sees the node removed but its pipelines still open.
    /// Nothing is closed if `remove` fails.
    pub fn retire_node<F>(&self, node_id: NodeId, remove: F) -> Result<Vec<PipelineId>>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut table = self.pipelines.write();
        remove()?;
        Ok(Self::close_with_node_locked(&mut table, node_id))
    }

    fn close_with_node_locked(table: &mut PipelineTable, node_id: NodeId) -> Vec<PipelineId> {
        let mut closed = Vec::new();

        for pipeline in table.values_mut() {
            if pipeline.is_open() && pipeline.contains_node(&node_id) {
                pipeline.state = PipelineState::Closed;
                closed.push(pipeline.id);
            }
        }

        if !closed.is_empty() {
            info!("Closed {} pipeline(s) hosted on datanode {}", closed.len(), node_id);
        }
        closed
    }

    /// Free the slot of a container that no longer takes writes. The
    /// container stays bound to the pipeline.
    pub fn release_container(&self, id: PipelineId, container_id: ContainerId) -> Result<()> {
        let mut table = self.pipelines.write();
        let pipeline = table.get_mut(&id).ok_or_else(|| Error::PipelineNotFound {
            pipeline_id: id.to_string(),
        })?;

        if pipeline.open_containers.remove(&container_id) {
            debug!("Released slot of container {} on pipeline {}", container_id, id);
        }
        Ok(())
    }

    /// Unbind a container. A closed pipeline left without containers is
    /// destroyed.
    pub fn remove_container(&self, id: PipelineId, container_id: ContainerId) -> Result<()> {
        let mut table = self.pipelines.write();
        let pipeline = table.get_mut(&id).ok_or_else(|| Error::PipelineNotFound {
            pipeline_id: id.to_string(),
        })?;

        pipeline.containers.remove(&container_id);
        pipeline.open_containers.remove(&container_id);
        if !pipeline.is_open() && pipeline.containers.is_empty() {
            table.shift_remove(&id);
            info!("Destroyed empty closed pipeline {}", id);
        }
        Ok(())
    }

    /// Remove a closed pipeline that no longer hosts containers
    pub fn destroy_pipeline(&self, id: PipelineId) -> Result<()> {
        let mut table = self.pipelines.write();
        let pipeline = table.get(&id).ok_or_else(|| Error::PipelineNotFound {
            pipeline_id: id.to_string(),
        })?;

        if pipeline.is_open() {
            return Err(Error::InvalidState {
                entity: format!("pipeline {}", id),
                reason: "must be closed before it is destroyed".into(),
            });
        }
        if !pipeline.containers.is_empty() {
            return Err(Error::InvalidState {
                entity: format!("pipeline {}", id),
                reason: format!("still hosts {} container(s)", pipeline.containers.len()),
            });
        }

        table.shift_remove(&id);
        info!("Destroyed pipeline {}", id);
        Ok(())
    }

    /// Form pipelines for each config until placement runs out of eligible
    /// nodes. Returns how many were created.
    pub fn create_baseline_pipelines(&self, configs: &[ReplicationConfig]) -> usize {
        let mut created = 0;
        for config in configs {
            loop {
                match self.create_pipeline(*config) {
                    Ok(_) => created += 1,
                    Err(Error::InsufficientNodes { .. }) => break,
                    Err(e) => {
                        warn!("Baseline {} pipeline creation failed: {}", config, e);
                        break;
                    }
                }
            }
        }
        if created > 0 {
            info!("Created {} baseline pipeline(s)", created);
        }
        created
    }

    /// Pipeline counts by state
    pub fn stats(&self) -> PipelineStats {
        let table = self.pipelines.read();
        let open = table.values().filter(|p| p.is_open()).count();
        PipelineStats {
            open,
            closed: table.len() - open,
            created_total: self.created_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::replication::{ReplicationFactor, ReplicationType};
    use crate::node::descriptor::{test_report, CURRENT_VERSION};
    use crate::placement::CapacityPlacement;
    use assert_matches::assert_matches;

    fn setup(nodes: usize, container_limit: usize) -> (Arc<NodeRegistry>, Arc<PipelineManager>) {
        let registry = NodeRegistry::new();
        for i in 0..nodes {
            registry.register(&test_report(&format!("10.0.0.{}", i + 1), CURRENT_VERSION, 1000, 0));
        }
        let policy = Arc::new(CapacityPlacement::new(0.95));
        let manager = PipelineManager::new(registry.clone(), policy, container_limit);
        (registry, manager)
    }

    #[test]
    fn test_create_pipeline_has_factor_members() {
        let (_, manager) = setup(3, 3);

        let pipeline = manager.get_or_create_pipeline(ReplicationConfig::ratis_three()).unwrap();
        assert_eq!(pipeline.nodes.len(), 3);
        assert!(pipeline.is_open());
        assert_eq!(manager.get_pipeline(pipeline.id).unwrap(), pipeline);
    }

    #[test]
    fn test_open_pipeline_is_reused_until_full() {
        let (_, manager) = setup(3, 2);
        let config = ReplicationConfig::stand_alone_one();

        let first = manager.allocate_container(config, ContainerId(1)).unwrap();
        let second = manager.allocate_container(config, ContainerId(2)).unwrap();
        // Reused while below the container limit
        assert_eq!(first.id, second.id);

        let third = manager.allocate_container(config, ContainerId(3)).unwrap();
        assert_ne!(third.id, first.id);
        assert_ne!(third.nodes, first.nodes);
        assert_eq!(manager.list_pipelines().len(), 2);
    }

    #[test]
    fn test_reuse_prefers_least_loaded() {
        let (_, manager) = setup(3, 5);
        let config = ReplicationConfig::stand_alone_one();
        assert_eq!(manager.create_baseline_pipelines(&[config]), 3);

        let mut bound = HashSet::new();
        for i in 1..=3 {
            bound.insert(manager.allocate_container(config, ContainerId(i)).unwrap().id);
        }
        assert_eq!(bound.len(), 3);
    }

    #[test]
    fn test_factor_one_nodes_are_not_shared_between_open_pipelines() {
        let (_, manager) = setup(2, 1);
        let config = ReplicationConfig::stand_alone_one();

        let a = manager.allocate_container(config, ContainerId(1)).unwrap();
        let b = manager.allocate_container(config, ContainerId(2)).unwrap();
        assert_ne!(a.nodes, b.nodes);

        // Both nodes serve a full pipeline: the least loaded one is overfilled
        let c = manager.allocate_container(config, ContainerId(3)).unwrap();
        assert_eq!(c.id, a.id);
        assert_eq!(manager.list_pipelines().len(), 2);
    }

    #[test]
    fn test_sustained_allocation_on_small_cluster() {
        let (_, manager) = setup(3, 3);
        let config = ReplicationConfig::stand_alone_one();

        for i in 1..=50 {
            manager.allocate_container(config, ContainerId(i)).unwrap();
        }

        let pipelines = manager.list_pipelines();
        assert_eq!(pipelines.len(), 3);
        let loads: Vec<usize> = pipelines.iter().map(|p| p.open_containers.len()).collect();
        assert_eq!(loads.iter().sum::<usize>(), 50);
        assert!(loads.iter().max().unwrap() - loads.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_released_slot_is_reused() {
        let (_, manager) = setup(2, 1);
        let config = ReplicationConfig::stand_alone_one();

        let a = manager.allocate_container(config, ContainerId(1)).unwrap();
        let b = manager.allocate_container(config, ContainerId(2)).unwrap();
        manager.release_container(b.id, ContainerId(2)).unwrap();

        let next = manager.allocate_container(config, ContainerId(3)).unwrap();
        assert_eq!(next.id, b.id);
        assert_ne!(next.id, a.id);
        // Released containers stay bound
        assert!(next.containers.contains(&ContainerId(2)));
        assert!(!next.open_containers.contains(&ContainerId(2)));
    }

    #[test]
    fn test_insufficient_nodes_for_factor() {
        let (_, manager) = setup(2, 3);
        assert_matches!(
            manager.get_or_create_pipeline(ReplicationConfig::ratis_three()),
            Err(Error::InsufficientNodes { requested: 3, available: 2 })
        );
        assert!(manager.list_pipelines().is_empty());
    }

    #[test]
    fn test_unknown_pipeline() {
        let (_, manager) = setup(1, 3);
        assert_matches!(
            manager.get_pipeline(PipelineId::random()),
            Err(Error::PipelineNotFound { .. })
        );
        assert_matches!(
            manager.close_pipeline(PipelineId::random()),
            Err(Error::PipelineNotFound { .. })
        );
    }

    #[test]
    fn test_closed_pipeline_is_never_reused() {
        let (_, manager) = setup(2, 10);
        let config = ReplicationConfig::stand_alone_one();

        let first = manager.allocate_container(config, ContainerId(1)).unwrap();
        manager.close_pipeline(first.id).unwrap();
        // Idempotent
        let closed = manager.close_pipeline(first.id).unwrap();
        assert_eq!(closed.state, PipelineState::Closed);

        let next = manager.allocate_container(config, ContainerId(2)).unwrap();
        assert_ne!(next.id, first.id);
        assert!(next.is_open());
    }

    #[test]
    fn test_close_pipelines_with_node() {
        let (registry, manager) = setup(3, 3);
        let pipeline = manager.get_or_create_pipeline(ReplicationConfig::ratis_three()).unwrap();
        let member = pipeline.nodes[0];

        let closed = manager.close_pipelines_with_node(member);
        assert_eq!(closed, vec![pipeline.id]);
        assert!(manager.close_pipelines_with_node(member).is_empty());

        registry.deregister(member).unwrap();
        assert_matches!(
            manager.get_or_create_pipeline(ReplicationConfig::ratis_three()),
            Err(Error::InsufficientNodes { .. })
        );
    }

    #[test]
    fn test_retire_node_closes_and_removes_together() {
        let (registry, manager) = setup(3, 3);
        let pipeline = manager.get_or_create_pipeline(ReplicationConfig::ratis_three()).unwrap();
        let member = pipeline.nodes[0];

        assert_matches!(
            manager.retire_node(member, || Err(Error::NodeNotFound { node_id: member.to_string() })),
            Err(Error::NodeNotFound { .. })
        );
        assert!(manager.get_pipeline(pipeline.id).unwrap().is_open());

        let closed = manager.retire_node(member, || registry.deregister(member)).unwrap();
        assert_eq!(closed, vec![pipeline.id]);
        assert!(!registry.contains(member));
        assert!(!manager.get_pipeline(pipeline.id).unwrap().is_open());
    }

    #[test]
    fn test_destroy_requires_closed_and_empty() {
        let (_, manager) = setup(1, 3);
        let config = ReplicationConfig::new(ReplicationType::StandAlone, ReplicationFactor::ONE);
        let pipeline = manager.allocate_container(config, ContainerId(1)).unwrap();

        assert_matches!(manager.destroy_pipeline(pipeline.id), Err(Error::InvalidState { .. }));
        manager.close_pipeline(pipeline.id).unwrap();
        assert_matches!(manager.destroy_pipeline(pipeline.id), Err(Error::InvalidState { .. }));

        // Removing the last container of a closed pipeline destroys it
        manager.remove_container(pipeline.id, ContainerId(1)).unwrap();
        assert_matches!(manager.get_pipeline(pipeline.id), Err(Error::PipelineNotFound { .. }));
    }

    #[test]
    fn test_concurrent_allocation_never_loses_pipelines() {
        let (_, manager) = setup(8, 2);
        let config = ReplicationConfig::stand_alone_one();

        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let manager = &manager;
                scope.spawn(move || {
                    for i in 0..4u64 {
                        manager
                            .allocate_container(config, ContainerId(t * 100 + i + 1))
                            .unwrap();
                    }
                });
            }
        });

        let pipelines = manager.list_pipelines();
        let bound: usize = pipelines.iter().map(|p| p.containers.len()).sum();
        assert_eq!(bound, 16);
        assert_eq!(pipelines.len(), 8);
        assert!(pipelines.iter().all(|p| p.containers.len() <= 2));
        assert_eq!(manager.stats().created_total, 8);
    }
}
