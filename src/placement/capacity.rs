//! Capacity-based placement
//!
//! Picks the least utilized eligible nodes. Ranking is total (utilization,
//! then node id), so the same registry snapshot always yields the same
//! selection.

use super::policy::{ensure_enough, rank_eligible, PlacementPolicy};
use crate::error::Result;
use crate::node::{Node, NodeId};
use std::collections::HashSet;
use tracing::debug;

/// Least-utilized-first placement
#[derive(Debug, Clone)]
pub struct CapacityPlacement {
    max_utilization: f64,
}

impl CapacityPlacement {
    pub fn new(max_utilization: f64) -> Self {
        Self { max_utilization }
    }
}

impl PlacementPolicy for CapacityPlacement {
    fn name(&self) -> &'static str {
        "capacity"
    }

    fn select_nodes(
        &self,
        candidates: &[Node],
        factor: usize,
        exclude: &HashSet<NodeId>,
    ) -> Result<Vec<Node>> {
        let eligible = rank_eligible(candidates, exclude, self.max_utilization);
        ensure_enough(eligible.len(), factor)?;

        let selected: Vec<Node> = eligible.into_iter().take(factor).cloned().collect();
        debug!(
            "Capacity placement selected {:?}",
            selected.iter().map(|n| n.id.to_string()).collect::<Vec<_>>()
        );
        Ok(selected)
    }
}
