//! Datanode Descriptors
//!
//! Raw reports as sent by datanodes, and the normalized [`Node`] every other
//! component consumes. Normalization is where protocol-version differences
//! end: a normalized node always carries every mandatory port.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// Protocol Versions
// =============================================================================

/// First protocol version; reporters may omit ports added later
pub const INITIAL_VERSION: u32 = 0;

/// Version that reports separate ratis admin/server ports
pub const SEPARATE_RATIS_PORTS_VERSION: u32 = 1;

/// Version spoken by this control plane
pub const CURRENT_VERSION: u32 = SEPARATE_RATIS_PORTS_VERSION;

// =============================================================================
// Node ID
// =============================================================================

/// Stable datanode identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the registry shard index for this node ID
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        (hasher.finish() as usize) % shard_count
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        Uuid::parse_str(s)
            .map(NodeId)
            .map_err(|_| crate::error::Error::NodeNotFound {
                node_id: s.to_string(),
            })
    }
}

impl From<Uuid> for NodeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Logical port names a datanode may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortName {
    Standalone,
    Ratis,
    Rest,
    Replication,
    RatisAdmin,
    RatisServer,
    Http,
    Https,
    ClientRpc,
}

impl PortName {
    /// Ports every normalized node must expose
    pub const MANDATORY: [PortName; 3] = [PortName::Standalone, PortName::Ratis, PortName::Replication];

    /// Fixed default assignment used when a report omits a mandatory port
    pub fn default_port(&self) -> u16 {
        match self {
            PortName::Standalone => 9859,
            PortName::Ratis => 9858,
            PortName::Rest => 9880,
            PortName::Replication => 9886,
            PortName::RatisAdmin => 9857,
            PortName::RatisServer => 9856,
            PortName::Http => 9882,
            PortName::Https => 9883,
            PortName::ClientRpc => 19864,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        Self::MANDATORY.contains(self)
    }
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PortName::Standalone => "STANDALONE",
            PortName::Ratis => "RATIS",
            PortName::Rest => "REST",
            PortName::Replication => "REPLICATION",
            PortName::RatisAdmin => "RATIS_ADMIN",
            PortName::RatisServer => "RATIS_SERVER",
            PortName::Http => "HTTP",
            PortName::Https => "HTTPS",
            PortName::ClientRpc => "CLIENT_RPC",
        };
        write!(f, "{}", name)
    }
}

/// A named port as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: PortName,
    pub value: u16,
}

// =============================================================================
// Node Report
// =============================================================================

/// Registration/heartbeat payload exactly as a datanode sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub uuid: NodeId,
    pub ip_address: String,
    pub hostname: String,
    /// Rack or other topology path
    #[serde(default)]
    pub network_location: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub capacity_bytes: u64,
    #[serde(default)]
    pub used_bytes: u64,
}

// =============================================================================
// Normalized Node
// =============================================================================

/// Normalized datanode view shared by placement and usage reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub ip_address: String,
    pub hostname: String,
    pub network_location: Option<String>,
    pub version: u32,
    pub ports: BTreeMap<PortName, u16>,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

impl Node {
    /// Normalize a raw report. Pure: equal reports give equal nodes.
    pub fn normalize(report: &NodeReport) -> Node {
        let mut ports: BTreeMap<PortName, u16> = report
            .ports
            .iter()
            .map(|port| (port.name, port.value))
            .collect();

        for name in PortName::MANDATORY {
            ports.entry(name).or_insert_with(|| name.default_port());
        }

        Node {
            id: report.uuid,
            ip_address: report.ip_address.clone(),
            hostname: report.hostname.clone(),
            network_location: report.network_location.clone(),
            version: report.version,
            ports,
            capacity_bytes: report.capacity_bytes,
            used_bytes: report.used_bytes,
        }
    }

    /// Used/capacity ratio; a node reporting no capacity counts as full
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.capacity_bytes as f64
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    pub fn port(&self, name: PortName) -> Option<u16> {
        self.ports.get(&name).copied()
    }

    /// Ports in wire form, ordered by name
    pub fn port_list(&self) -> Vec<Port> {
        self.ports
            .iter()
            .map(|(name, value)| Port {
                name: *name,
                value: *value,
            })
            .collect()
    }

    /// True when `address` names this node by IP or hostname
    pub fn matches_address(&self, address: &str) -> bool {
        self.ip_address == address || self.hostname == address
    }

    /// Topology key used for rack spreading
    pub fn rack(&self) -> String {
        self.network_location
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_report(ip: &str, version: u32, capacity: u64, used: u64) -> NodeReport {
    NodeReport {
        uuid: NodeId::random(),
        ip_address: ip.to_string(),
        hostname: format!("dn-{}.local", ip.replace('.', "-")),
        network_location: None,
        version,
        ports: vec![
            Port {
                name: PortName::Standalone,
                value: 9859,
            },
            Port {
                name: PortName::Ratis,
                value: 9858,
            },
        ],
        capacity_bytes: capacity,
        used_bytes: used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_report_gets_replication_port() {
        let report = test_report("10.0.0.1", INITIAL_VERSION, 100, 0);
        assert!(!report.ports.iter().any(|p| p.name == PortName::Replication));

        let node = Node::normalize(&report);
        assert_eq!(node.port(PortName::Replication), Some(9886));
        assert!(node.port_list().iter().any(|p| p.name == PortName::Replication));
    }

    #[test]
    fn test_reported_ports_win_over_defaults() {
        let mut report = test_report("10.0.0.2", CURRENT_VERSION, 100, 0);
        report.ports.push(Port {
            name: PortName::Replication,
            value: 20000,
        });

        let node = Node::normalize(&report);
        assert_eq!(node.port(PortName::Replication), Some(20000));
        // Optional ports are never invented
        assert_eq!(node.port(PortName::Http), None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let report = test_report("10.0.0.3", INITIAL_VERSION, 500, 100);
        assert_eq!(Node::normalize(&report), Node::normalize(&report));
    }

    #[test]
    fn test_utilization() {
        let node = Node::normalize(&test_report("10.0.0.4", CURRENT_VERSION, 200, 50));
        assert!((node.utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(node.remaining_bytes(), 150);

        let empty = Node::normalize(&test_report("10.0.0.5", CURRENT_VERSION, 0, 0));
        assert_eq!(empty.utilization(), 1.0);
    }

    #[test]
    fn test_matches_address() {
        let node = Node::normalize(&test_report("10.0.0.6", CURRENT_VERSION, 1, 0));
        assert!(node.matches_address("10.0.0.6"));
        assert!(node.matches_address("dn-10-0-0-6.local"));
        assert!(!node.matches_address("10.0.0.7"));
    }
}
