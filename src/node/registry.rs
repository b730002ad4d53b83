//! Sharded Node Registry
//!
//! Tracks known datanodes, their reported space and their health. Heartbeats
//! from different nodes land on different shards, so concurrent reporters
//! rarely contend on the same lock.

use super::descriptor::{Node, NodeId, NodeReport};
use super::events::RegistryEvent;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Number of shards in the registry
pub const REGISTRY_SHARD_COUNT: usize = 64;

/// Capacity of the registry event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Node Entry
// =============================================================================

/// Entry for a single datanode in the registry
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Normalized descriptor from the latest report
    pub node: Node,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat timestamp
    pub last_heartbeat: DateTime<Utc>,
    /// Is node online
    pub online: bool,
}

impl NodeEntry {
    fn new(node: Node, now: DateTime<Utc>) -> Self {
        Self {
            node,
            registered_at: now,
            last_heartbeat: now,
            online: true,
        }
    }

    /// Replace the descriptor with a fresher report. Returns true when the
    /// node was offline before this heartbeat.
    fn heartbeat(&mut self, node: Node, now: DateTime<Utc>) -> bool {
        let was_offline = !self.online;
        self.node = node;
        self.last_heartbeat = now;
        self.online = true;
        was_offline
    }
}

// =============================================================================
// Registry Shard
// =============================================================================

/// Outcome of an upsert on a shard
enum Upsert {
    Registered,
    Updated,
    Revived,
}

/// A single shard of the registry
struct RegistryShard {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    update_count: AtomicU64,
}

impl RegistryShard {
    fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            update_count: AtomicU64::new(0),
        }
    }

    fn upsert(&self, node: Node, now: DateTime<Utc>) -> Upsert {
        let mut nodes = self.nodes.write();
        self.update_count.fetch_add(1, Ordering::Relaxed);
        match nodes.get_mut(&node.id) {
            Some(entry) => {
                if entry.heartbeat(node, now) {
                    Upsert::Revived
                } else {
                    Upsert::Updated
                }
            }
            None => {
                nodes.insert(node.id, NodeEntry::new(node, now));
                Upsert::Registered
            }
        }
    }

    fn get(&self, node_id: &NodeId) -> Option<NodeEntry> {
        self.nodes.read().get(node_id).cloned()
    }

    fn remove(&self, node_id: &NodeId) -> Option<NodeEntry> {
        self.nodes.write().remove(node_id)
    }

    fn entries(&self) -> Vec<NodeEntry> {
        self.nodes.read().values().cloned().collect()
    }

    fn mark_stale_offline(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<NodeId> {
        let mut nodes = self.nodes.write();
        let mut stale = Vec::new();

        for entry in nodes.values_mut() {
            if entry.online && now.signed_duration_since(entry.last_heartbeat) > max_age {
                entry.online = false;
                stale.push(entry.node.id);
            }
        }

        stale
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Snapshot of registry-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_nodes: u64,
    pub online_nodes: u64,
    pub total_capacity_bytes: u64,
    pub used_bytes: u64,
    pub registrations: u64,
    pub deregistrations: u64,
    pub heartbeats: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    deregistrations: AtomicU64,
    heartbeats: AtomicU64,
}

// =============================================================================
// Node Registry
// =============================================================================

/// Sharded table of known datanodes
pub struct NodeRegistry {
    shards: Box<[RegistryShard]>,
    counters: Counters,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl NodeRegistry {
    /// Create a new node registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn shard(&self, node_id: &NodeId) -> &RegistryShard {
        &self.shards[node_id.shard_index(self.shards.len())]
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Register a datanode or refresh it from a heartbeat. Idempotent per
    /// node id; the latest report wins.
    pub fn heartbeat(&self, report: &NodeReport) -> Node {
        let node = Node::normalize(report);
        let node_id = node.id;
        self.counters.heartbeats.fetch_add(1, Ordering::Relaxed);

        let event = match self.shard(&node_id).upsert(node.clone(), Utc::now()) {
            Upsert::Registered => {
                self.counters.registrations.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Registered datanode {} ({}) protocol version {}",
                    node_id, node.ip_address, node.version
                );
                RegistryEvent::NodeRegistered {
                    node_id,
                    version: node.version,
                }
            }
            Upsert::Updated => {
                debug!("Heartbeat from datanode {}", node_id);
                RegistryEvent::NodeUpdated { node_id }
            }
            Upsert::Revived => {
                info!("Datanode {} is back online", node_id);
                RegistryEvent::NodeCameOnline { node_id }
            }
        };

        let _ = self.event_sender.send(event);
        node
    }

    /// Alias of [`NodeRegistry::heartbeat`] for first contact
    pub fn register(&self, report: &NodeReport) -> Node {
        self.heartbeat(report)
    }

    /// Remove a decommissioned datanode
    pub fn deregister(&self, node_id: NodeId) -> Result<()> {
        match self.shard(&node_id).remove(&node_id) {
            Some(_) => {
                self.counters.deregistrations.fetch_add(1, Ordering::Relaxed);
                info!("Deregistered datanode {}", node_id);
                let _ = self
                    .event_sender
                    .send(RegistryEvent::NodeDeregistered { node_id });
                Ok(())
            }
            None => Err(Error::NodeNotFound {
                node_id: node_id.to_string(),
            }),
        }
    }

    /// Get a node entry by ID
    pub fn get(&self, node_id: NodeId) -> Option<NodeEntry> {
        self.shard(&node_id).get(&node_id)
    }

    /// Check if a node exists
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.get(node_id).is_some()
    }

    /// Exact lookup by identity plus address (IP or hostname)
    pub fn get_node(&self, address: &str, node_id: NodeId) -> Result<Node> {
        self.get(node_id)
            .map(|entry| entry.node)
            .filter(|node| node.matches_address(address))
            .ok_or_else(|| Error::NodeNotFound {
                node_id: format!("{}@{}", node_id, address),
            })
    }

    /// Snapshot of every known node, online or not
    pub fn list_nodes(&self) -> Vec<Node> {
        self.shards
            .iter()
            .flat_map(|shard| shard.entries())
            .map(|entry| entry.node)
            .collect()
    }

    /// Snapshot of nodes currently eligible to host pipelines
    pub fn online_nodes(&self) -> Vec<Node> {
        self.shards
            .iter()
            .flat_map(|shard| shard.entries())
            .filter(|entry| entry.online)
            .map(|entry| entry.node)
            .collect()
    }

    /// Mark nodes without a heartbeat for longer than `max_age` offline
    pub fn mark_stale_offline(&self, max_age: Duration) -> Vec<NodeId> {
        self.mark_stale_offline_at(Utc::now(), max_age)
    }

    pub(crate) fn mark_stale_offline_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .shards
            .iter()
            .flat_map(|shard| shard.mark_stale_offline(now, max_age))
            .collect();

        for node_id in &stale {
            warn!("Datanode {} missed its heartbeat deadline", node_id);
            let _ = self
                .event_sender
                .send(RegistryEvent::NodeWentOffline { node_id: *node_id });
        }

        stale
    }

    /// Get registry-wide statistics
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            deregistrations: self.counters.deregistrations.load(Ordering::Relaxed),
            heartbeats: self.counters.heartbeats.load(Ordering::Relaxed),
            ..Default::default()
        };

        for entry in self.shards.iter().flat_map(|shard| shard.entries()) {
            stats.total_nodes += 1;
            if entry.online {
                stats.online_nodes += 1;
            }
            stats.total_capacity_bytes += entry.node.capacity_bytes;
            stats.used_bytes += entry.node.used_bytes;
        }

        stats
    }

    /// Per-shard (index, node count, update count) for debugging
    pub fn shard_stats(&self) -> Vec<(usize, usize, u64)> {
        self.shards
            .iter()
            .enumerate()
            .map(|(idx, shard)| {
                (
                    idx,
                    shard.nodes.read().len(),
                    shard.update_count.load(Ordering::Relaxed),
                )
            })
            .filter(|(_, count, _)| *count > 0)
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        let shards: Vec<RegistryShard> = (0..REGISTRY_SHARD_COUNT)
            .map(|_| RegistryShard::new())
            .collect();
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shards: shards.into_boxed_slice(),
            counters: Counters::default(),
            event_sender,
        }
    }
}
