//! Container Types

use crate::domain::replication::ReplicationConfig;
use crate::pipeline::PipelineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container identifier, assigned monotonically from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub u64);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContainerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Container lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    Open,
    Closed,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Open => write!(f, "OPEN"),
            ContainerState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A replicated storage unit bound to exactly one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub replication: ReplicationConfig,
    /// Opaque owner tag supplied by the client
    pub owner: String,
    pub pipeline_id: PipelineId,
    pub state: ContainerState,
    pub created_at: DateTime<Utc>,
}
