//! Placement Policies
//!
//! A placement policy picks the member nodes of a new pipeline. Policies are
//! swappable behind [`PlacementPolicy`]; the configured kind decides which
//! one the pipeline manager receives.

use super::capacity::CapacityPlacement;
use super::rack_aware::RackAwarePlacement;
use crate::error::{Error, Result};
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

// =============================================================================
// Placement Policy Trait
// =============================================================================

/// Node selection strategy for new pipelines
pub trait PlacementPolicy: Send + Sync {
    /// Short name for logs and metrics
    fn name(&self) -> &'static str;

    /// Pick exactly `factor` distinct nodes from `candidates`, skipping
    /// everything in `exclude`. Fails with `InsufficientNodes` when fewer
    /// than `factor` nodes are eligible.
    fn select_nodes(
        &self,
        candidates: &[Node],
        factor: usize,
        exclude: &HashSet<NodeId>,
    ) -> Result<Vec<Node>>;
}

// =============================================================================
// Placement Policy Kind
// =============================================================================

/// Configurable choice of placement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicyKind {
    /// Least utilized nodes first
    #[default]
    Capacity,
    /// Spread across racks, least utilized first within the spread
    RackAware,
}

impl PlacementPolicyKind {
    /// Build the policy with the given utilization ceiling
    pub fn build(self, max_utilization: f64) -> Arc<dyn PlacementPolicy> {
        match self {
            PlacementPolicyKind::Capacity => Arc::new(CapacityPlacement::new(max_utilization)),
            PlacementPolicyKind::RackAware => Arc::new(RackAwarePlacement::new(max_utilization)),
        }
    }
}

impl std::fmt::Display for PlacementPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementPolicyKind::Capacity => write!(f, "capacity"),
            PlacementPolicyKind::RackAware => write!(f, "rack_aware"),
        }
    }
}

impl std::str::FromStr for PlacementPolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "capacity" => Ok(PlacementPolicyKind::Capacity),
            "rack_aware" => Ok(PlacementPolicyKind::RackAware),
            other => Err(Error::Configuration(format!(
                "unknown placement policy: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Shared Ranking
// =============================================================================

/// Eligible candidates ranked by ascending utilization, ties by node id.
/// Nodes listed twice in `candidates` are kept once.
pub(crate) fn rank_eligible<'a>(
    candidates: &'a [Node],
    exclude: &HashSet<NodeId>,
    max_utilization: f64,
) -> Vec<&'a Node> {
    let mut seen = HashSet::new();
    let mut eligible: Vec<&Node> = candidates
        .iter()
        .filter(|node| !exclude.contains(&node.id))
        .filter(|node| node.utilization() <= max_utilization)
        .filter(|node| seen.insert(node.id))
        .collect();

    eligible.sort_by(|a, b| {
        a.utilization()
            .partial_cmp(&b.utilization())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    eligible
}

/// Fail fast when the eligible set cannot satisfy `factor`
pub(crate) fn ensure_enough(eligible: usize, factor: usize) -> Result<()> {
    if eligible < factor {
        return Err(Error::InsufficientNodes {
            requested: factor,
            available: eligible,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_node(ip: &str, capacity: u64, used: u64, rack: Option<&str>) -> Node {
    let mut report = crate::node::descriptor::test_report(ip, crate::node::CURRENT_VERSION, capacity, used);
    report.network_location = rack.map(|r| r.to_string());
    Node::normalize(&report)
}
