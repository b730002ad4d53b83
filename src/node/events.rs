//! Registry Events
//!
//! Events emitted by the node registry so the control plane can react to
//! datanode lifecycle changes.

use super::descriptor::NodeId;
use serde::{Deserialize, Serialize};

/// Events emitted by the node registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A datanode registered for the first time
    NodeRegistered { node_id: NodeId, version: u32 },

    /// A known datanode sent a heartbeat with fresh state
    NodeUpdated { node_id: NodeId },

    /// A datanode was decommissioned
    NodeDeregistered { node_id: NodeId },

    /// A datanode missed its heartbeat deadline
    NodeWentOffline { node_id: NodeId },

    /// A stale datanode reported again
    NodeCameOnline { node_id: NodeId },
}

impl RegistryEvent {
    /// Get the node ID associated with this event
    pub fn node_id(&self) -> NodeId {
        match self {
            RegistryEvent::NodeRegistered { node_id, .. }
            | RegistryEvent::NodeUpdated { node_id }
            | RegistryEvent::NodeDeregistered { node_id }
            | RegistryEvent::NodeWentOffline { node_id }
            | RegistryEvent::NodeCameOnline { node_id } => *node_id,
        }
    }

    /// True when the node can no longer serve pipelines
    pub fn is_node_loss(&self) -> bool {
        matches!(
            self,
            RegistryEvent::NodeDeregistered { .. } | RegistryEvent::NodeWentOffline { .. }
        )
    }
}
