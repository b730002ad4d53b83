//! Pipeline Types

use crate::container::ContainerId;
use crate::domain::replication::ReplicationConfig;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline identifier; random, so unissued ids never collide with live ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub Uuid);

impl PipelineId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PipelineId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        Uuid::parse_str(s)
            .map(PipelineId)
            .map_err(|_| crate::error::Error::PipelineNotFound {
                pipeline_id: s.to_string(),
            })
    }
}

/// Pipeline lifecycle state. CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Open,
    Closed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Open => write!(f, "OPEN"),
            PipelineState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A fixed group of datanodes serving one replication config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub replication: ReplicationConfig,
    /// Members in placement order; `len() == replication.factor`
    pub nodes: Vec<NodeId>,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
    /// Containers currently bound to this pipeline
    pub containers: BTreeSet<ContainerId>,
    /// Bound containers still accepting writes; only these use up slots
    pub open_containers: BTreeSet<ContainerId>,
}

impl Pipeline {
    pub fn new(replication: ReplicationConfig, nodes: Vec<NodeId>) -> Self {
        Self {
            id: PipelineId::random(),
            replication,
            nodes,
            state: PipelineState::Open,
            created_at: Utc::now(),
            containers: BTreeSet::new(),
            open_containers: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == PipelineState::Open
    }

    pub fn contains_node(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }

    /// True when the pipeline can take another container
    pub fn has_room(&self, container_limit: usize) -> bool {
        self.is_open() && self.open_containers.len() < container_limit
    }
}
