//! Domain Ports - Request/response boundary of the control plane
//!
//! Transports (REST, RPC, CLI) talk to the control plane only through
//! [`ContainerLocationProtocol`] and the descriptor types defined here.
//! Descriptors are plain values; nothing crosses the boundary by reference.

use super::replication::{ReplicationFactor, ReplicationType};
use crate::container::{Container, ContainerState};
use crate::error::Result;
use crate::node::{Node, NodeId, NodeReport, Port};
use crate::pipeline::{Pipeline, PipelineId, PipelineState};
use crate::usage::UsageInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Descriptors
// =============================================================================

/// Datanode as seen by clients; ports are always the normalized set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub uuid: NodeId,
    pub ip_address: String,
    pub hostname: String,
    pub network_location: Option<String>,
    pub version: u32,
    pub ports: Vec<Port>,
}

impl From<&Node> for NodeDescriptor {
    fn from(node: &Node) -> Self {
        Self {
            uuid: node.id,
            ip_address: node.ip_address.clone(),
            hostname: node.hostname.clone(),
            network_location: node.network_location.clone(),
            version: node.version,
            ports: node.port_list(),
        }
    }
}

/// Container with its pipeline binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDescriptor {
    pub container_id: u64,
    pub pipeline_id: PipelineId,
    pub replication_type: ReplicationType,
    pub replication_factor: ReplicationFactor,
    pub owner: String,
    pub state: ContainerState,
}

impl From<&Container> for ContainerDescriptor {
    fn from(container: &Container) -> Self {
        Self {
            container_id: container.id.0,
            pipeline_id: container.pipeline_id,
            replication_type: container.replication.replication_type,
            replication_factor: container.replication.factor,
            owner: container.owner.clone(),
            state: container.state,
        }
    }
}

/// Pipeline with resolved member descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptor {
    pub id: PipelineId,
    pub replication_type: ReplicationType,
    pub replication_factor: ReplicationFactor,
    pub state: PipelineState,
    /// Every member id, in placement order
    pub member_ids: Vec<NodeId>,
    /// Members still known to the registry
    pub nodes: Vec<NodeDescriptor>,
    pub container_count: usize,
}

impl PipelineDescriptor {
    /// Build from a pipeline, resolving members through `lookup`
    pub fn resolve(pipeline: &Pipeline, lookup: impl Fn(NodeId) -> Option<Node>) -> Self {
        Self {
            id: pipeline.id,
            replication_type: pipeline.replication.replication_type,
            replication_factor: pipeline.replication.factor,
            state: pipeline.state,
            member_ids: pipeline.nodes.clone(),
            nodes: pipeline
                .nodes
                .iter()
                .filter_map(|id| lookup(*id))
                .map(|node| NodeDescriptor::from(&node))
                .collect(),
            container_count: pipeline.containers.len(),
        }
    }
}

/// Derived usage of one datanode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDescriptor {
    pub node: NodeDescriptor,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
    pub container_count: u64,
}

impl From<&UsageInfo> for UsageDescriptor {
    fn from(usage: &UsageInfo) -> Self {
        Self {
            node: NodeDescriptor::from(&usage.node),
            capacity_bytes: usage.capacity_bytes,
            used_bytes: usage.used_bytes,
            remaining_bytes: usage.remaining_bytes,
            container_count: usage.container_count,
        }
    }
}

// =============================================================================
// Container Location Protocol
// =============================================================================

/// Operations the control plane offers to clients and datanodes
#[async_trait]
pub trait ContainerLocationProtocol: Send + Sync {
    /// Allocate a container on an eligible pipeline
    async fn create_container(
        &self,
        replication_type: ReplicationType,
        replication_factor: u32,
        owner: &str,
    ) -> Result<ContainerDescriptor>;

    /// Look up a container; unknown ids fail with `ContainerNotFound`
    async fn get_container(&self, container_id: u64) -> Result<ContainerDescriptor>;

    /// Stop writes to a container and free its pipeline slot
    async fn close_container(&self, container_id: u64) -> Result<ContainerDescriptor>;

    /// Forget a container; a closed pipeline left empty is destroyed
    async fn delete_container(&self, container_id: u64) -> Result<ContainerDescriptor>;

    /// Look up a pipeline; unknown ids fail with `PipelineNotFound`
    async fn get_pipeline(&self, pipeline_id: PipelineId) -> Result<PipelineDescriptor>;

    /// All pipelines regardless of state
    async fn list_pipelines(&self) -> Result<Vec<PipelineDescriptor>>;

    /// Close a pipeline so it takes no new containers
    async fn close_pipeline(&self, pipeline_id: PipelineId) -> Result<PipelineDescriptor>;

    /// Usage of one datanode (a single-entry list when it is known)
    async fn get_datanode_usage_info(
        &self,
        address: &str,
        uuid: NodeId,
    ) -> Result<Vec<UsageDescriptor>>;

    /// Most or least used datanodes, at most `count` entries
    async fn get_datanode_usage_info_top(
        &self,
        most_used: bool,
        count: usize,
    ) -> Result<Vec<UsageDescriptor>>;

    /// Registration / heartbeat from a datanode
    async fn register_node(&self, report: NodeReport) -> Result<NodeDescriptor>;
}
