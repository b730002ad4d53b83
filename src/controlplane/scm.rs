//! Storage Container Manager - The control plane facade
//!
//! Wires the node registry, placement policy, pipeline and container
//! managers and the usage tracker together, and serves them to transports
//! through [`ContainerLocationProtocol`]. Registry events drive pipeline
//! teardown when datanodes leave and baseline formation when they arrive.

use super::metrics::ScmMetrics;
use crate::config::ScmConfig;
use crate::container::{ContainerId, ContainerManager};
use crate::domain::ports::{
    ContainerDescriptor, ContainerLocationProtocol, NodeDescriptor, PipelineDescriptor,
    UsageDescriptor,
};
use crate::domain::replication::{ReplicationConfig, ReplicationFactor, ReplicationType};
use crate::error::{Error, Result};
use crate::node::{NodeId, NodeRegistry, NodeReport, RegistryEvent};
use crate::pipeline::{Pipeline, PipelineId, PipelineManager};
use crate::usage::UsageTracker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// =============================================================================
// Control Plane
// =============================================================================

/// Facade over every control plane component
pub struct ControlPlane {
    config: ScmConfig,
    registry: Arc<NodeRegistry>,
    pipelines: Arc<PipelineManager>,
    containers: Arc<ContainerManager>,
    usage: UsageTracker,
    metrics: ScmMetrics,
}

impl ControlPlane {
    /// Build the control plane over an existing registry
    pub fn new(config: ScmConfig, registry: Arc<NodeRegistry>) -> Result<Arc<Self>> {
        config.validate()?;

        let policy = config.placement.build(config.max_utilization);
        let pipelines = PipelineManager::new(
            registry.clone(),
            policy,
            config.container_limit_per_pipeline,
        );
        let containers = ContainerManager::new(pipelines.clone());
        let usage = UsageTracker::new(registry.clone(), pipelines.clone(), containers.clone());

        info!(
            "Control plane configured: placement={}, containerLimitPerPipeline={}",
            config.placement, config.container_limit_per_pipeline
        );

        Ok(Arc::new(Self {
            config,
            registry,
            pipelines,
            containers,
            usage,
            metrics: ScmMetrics::new()?,
        }))
    }

    pub fn config(&self) -> &ScmConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn pipelines(&self) -> &Arc<PipelineManager> {
        &self.pipelines
    }

    pub fn containers(&self) -> &Arc<ContainerManager> {
        &self.containers
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn metrics(&self) -> &ScmMetrics {
        &self.metrics
    }

    /// Form baseline pipelines if configured. Returns how many were formed.
    pub fn start(&self) -> usize {
        info!("Starting storage container manager");
        self.ensure_baseline_pipelines()
    }

    fn ensure_baseline_pipelines(&self) -> usize {
        if !self.config.create_pipelines_on_startup {
            return 0;
        }
        self.pipelines
            .create_baseline_pipelines(&self.config.baseline_replication)
    }

    /// Remove a datanode and close every pipeline it belongs to
    pub fn decommission_node(&self, node_id: NodeId) -> Result<Vec<PipelineId>> {
        let closed = self
            .pipelines
            .retire_node(node_id, || self.registry.deregister(node_id))?;
        self.metrics.pipelines_closed.inc_by(closed.len() as u64);
        info!(
            "Decommissioned datanode {} ({} pipeline(s) closed)",
            node_id,
            closed.len()
        );
        Ok(closed)
    }

    /// React to a registry change
    pub fn handle_registry_event(&self, event: &RegistryEvent) {
        debug!("Registry event: {:?}", event);

        if event.is_node_loss() {
            let closed = self.pipelines.close_pipelines_with_node(event.node_id());
            self.metrics.pipelines_closed.inc_by(closed.len() as u64);
            return;
        }

        if let RegistryEvent::NodeRegistered { .. } | RegistryEvent::NodeCameOnline { .. } = event {
            self.ensure_baseline_pipelines();
        }
    }

    /// Consume registry events on a background task until the registry
    /// channel closes
    pub fn spawn_event_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let mut events = self.registry.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_registry_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Registry event handler lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Registry event channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Mark datanodes with an expired heartbeat offline and close their
    /// pipelines
    pub fn sweep_stale_nodes(&self) -> Vec<NodeId> {
        let max_age = chrono::Duration::seconds(self.config.stale_node_interval_secs as i64);
        let stale = self.registry.mark_stale_offline(max_age);
        for node_id in &stale {
            let closed = self.pipelines.close_pipelines_with_node(*node_id);
            self.metrics.pipelines_closed.inc_by(closed.len() as u64);
        }
        stale
    }

    /// Run [`Self::sweep_stale_nodes`] every `sweep_interval_secs`
    pub fn spawn_stale_node_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let period = Duration::from_secs(self.config.sweep_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let stale = this.sweep_stale_nodes();
                if !stale.is_empty() {
                    warn!("Stale node sweep marked {} datanode(s) offline", stale.len());
                }
            }
        })
    }

    /// Whether the control plane can place anything
    pub fn is_ready(&self) -> bool {
        self.registry.stats().online_nodes > 0
    }

    /// Summary for the readiness endpoint and logs
    pub fn status(&self) -> ControlPlaneStatus {
        let nodes = self.registry.stats();
        let pipelines = self.pipelines.stats();

        ControlPlaneStatus {
            ready: nodes.online_nodes > 0,
            placement: self.pipelines.policy_name().to_string(),
            total_nodes: nodes.total_nodes,
            online_nodes: nodes.online_nodes,
            open_pipelines: pipelines.open,
            closed_pipelines: pipelines.closed,
            containers: self.containers.container_count(),
        }
    }

    /// Refresh gauges and render the metrics registry
    pub fn encode_metrics(&self) -> Result<(String, Vec<u8>)> {
        self.metrics.refresh(
            &self.registry.stats(),
            &self.pipelines.stats(),
            self.containers.container_count(),
        );
        self.metrics.encode()
    }

    fn describe_pipeline(&self, pipeline: &Pipeline) -> PipelineDescriptor {
        PipelineDescriptor::resolve(pipeline, |id| self.registry.get(id).map(|entry| entry.node))
    }
}

/// Control plane status summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    pub ready: bool,
    pub placement: String,
    pub total_nodes: u64,
    pub online_nodes: u64,
    pub open_pipelines: usize,
    pub closed_pipelines: usize,
    pub containers: usize,
}

// =============================================================================
// Container Location Protocol
// =============================================================================

#[async_trait]
impl ContainerLocationProtocol for ControlPlane {
    async fn create_container(
        &self,
        replication_type: ReplicationType,
        replication_factor: u32,
        owner: &str,
    ) -> Result<ContainerDescriptor> {
        let factor = ReplicationFactor::new(replication_factor)?;
        let config = ReplicationConfig::new(replication_type, factor);

        match self.containers.create_container(config, owner) {
            Ok(container) => {
                self.metrics.containers_created.inc();
                Ok(ContainerDescriptor::from(&container))
            }
            Err(e) => {
                if let Error::InsufficientNodes { .. } = e {
                    self.metrics.placement_failures.inc();
                } else {
                    error!("Container allocation for {} failed: {}", owner, e);
                }
                Err(e)
            }
        }
    }

    async fn get_container(&self, container_id: u64) -> Result<ContainerDescriptor> {
        let container = self.containers.get_container(ContainerId(container_id))?;
        Ok(ContainerDescriptor::from(&container))
    }

    async fn close_container(&self, container_id: u64) -> Result<ContainerDescriptor> {
        let container = self.containers.close_container(ContainerId(container_id))?;
        Ok(ContainerDescriptor::from(&container))
    }

    async fn delete_container(&self, container_id: u64) -> Result<ContainerDescriptor> {
        let container = self.containers.delete_container(ContainerId(container_id))?;
        Ok(ContainerDescriptor::from(&container))
    }

    async fn get_pipeline(&self, pipeline_id: PipelineId) -> Result<PipelineDescriptor> {
        let pipeline = self.pipelines.get_pipeline(pipeline_id)?;
        Ok(self.describe_pipeline(&pipeline))
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineDescriptor>> {
        Ok(self
            .pipelines
            .list_pipelines()
            .iter()
            .map(|p| self.describe_pipeline(p))
            .collect())
    }

    async fn close_pipeline(&self, pipeline_id: PipelineId) -> Result<PipelineDescriptor> {
        let was_open = self.pipelines.get_pipeline(pipeline_id)?.is_open();
        let pipeline = self.pipelines.close_pipeline(pipeline_id)?;
        if was_open {
            self.metrics.pipelines_closed.inc();
        }
        Ok(self.describe_pipeline(&pipeline))
    }

    async fn get_datanode_usage_info(
        &self,
        address: &str,
        uuid: NodeId,
    ) -> Result<Vec<UsageDescriptor>> {
        let usage = self.usage.usage_for_address(address, uuid)?;
        Ok(vec![UsageDescriptor::from(&usage)])
    }

    async fn get_datanode_usage_info_top(
        &self,
        most_used: bool,
        count: usize,
    ) -> Result<Vec<UsageDescriptor>> {
        Ok(self
            .usage
            .top_k(most_used, count)
            .iter()
            .map(UsageDescriptor::from)
            .collect())
    }

    async fn register_node(&self, report: NodeReport) -> Result<NodeDescriptor> {
        let node = self.registry.heartbeat(&report);
        Ok(NodeDescriptor::from(&node))
    }
}
