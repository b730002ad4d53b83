//! Container Manager
//!
//! Allocates container ids and records each container's pipeline binding.
//! A container is in the table before `create_container` returns, so its id
//! resolves immediately.

use super::types::{Container, ContainerId, ContainerState};
use crate::domain::replication::ReplicationConfig;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineId, PipelineManager};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle owner for containers
pub struct ContainerManager {
    pipelines: Arc<PipelineManager>,
    containers: RwLock<BTreeMap<ContainerId, Container>>,
    next_id: AtomicU64,
}

impl ContainerManager {
    pub fn new(pipelines: Arc<PipelineManager>) -> Arc<Self> {
        Arc::new(Self {
            pipelines,
            containers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Allocate a container on an eligible open pipeline
    pub fn create_container(&self, config: ReplicationConfig, owner: &str) -> Result<Container> {
        let id = ContainerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let pipeline = self.pipelines.allocate_container(config, id)?;

        let container = Container {
            id,
            replication: config,
            owner: owner.to_string(),
            pipeline_id: pipeline.id,
            state: ContainerState::Open,
            created_at: Utc::now(),
        };

        self.containers.write().insert(id, container.clone());
        info!(
            "Created container {} ({}) for {} on pipeline {}",
            id, config, owner, pipeline.id
        );
        Ok(container)
    }

    /// Exact lookup
    pub fn get_container(&self, id: ContainerId) -> Result<Container> {
        self.containers
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::ContainerNotFound { container_id: id.0 })
    }

    pub fn list_containers(&self) -> Vec<Container> {
        self.containers.read().values().cloned().collect()
    }

    pub fn list_containers_on_pipeline(&self, pipeline_id: PipelineId) -> Vec<Container> {
        self.containers
            .read()
            .values()
            .filter(|c| c.pipeline_id == pipeline_id)
            .cloned()
            .collect()
    }

    /// OPEN -> CLOSED, freeing the container's pipeline slot; closing a
    /// closed container is a no-op
    pub fn close_container(&self, id: ContainerId) -> Result<Container> {
        let (container, was_open) = {
            let mut containers = self.containers.write();
            let container = containers
                .get_mut(&id)
                .ok_or(Error::ContainerNotFound { container_id: id.0 })?;

            let was_open = container.state == ContainerState::Open;
            container.state = ContainerState::Closed;
            (container.clone(), was_open)
        };

        if was_open {
            if let Err(e) = self.pipelines.release_container(container.pipeline_id, id) {
                warn!("Container {} had no live pipeline to release: {}", id, e);
            }
            info!("Closed container {}", id);
        }
        Ok(container)
    }

    /// Remove a container and release its pipeline binding
    pub fn delete_container(&self, id: ContainerId) -> Result<Container> {
        let container = self
            .containers
            .write()
            .remove(&id)
            .ok_or(Error::ContainerNotFound { container_id: id.0 })?;

        if let Err(e) = self.pipelines.remove_container(container.pipeline_id, id) {
            warn!("Container {} had no live pipeline to release: {}", id, e);
        }
        info!("Deleted container {}", id);
        Ok(container)
    }

    pub fn container_count(&self) -> usize {
        self.containers.read().len()
    }
}
