//! Rack-aware placement
//!
//! Spreads pipeline members across racks before doubling up. Within each
//! pass nodes are taken in capacity-ranking order.

use super::policy::{ensure_enough, rank_eligible, PlacementPolicy};
use crate::error::Result;
use crate::node::{Node, NodeId};
use std::collections::HashSet;
use tracing::debug;

/// Fault-domain spreading placement
#[derive(Debug, Clone)]
pub struct RackAwarePlacement {
    max_utilization: f64,
}

impl RackAwarePlacement {
    pub fn new(max_utilization: f64) -> Self {
        Self { max_utilization }
    }
}

impl PlacementPolicy for RackAwarePlacement {
    fn name(&self) -> &'static str {
        "rack_aware"
    }

    fn select_nodes(
        &self,
        candidates: &[Node],
        factor: usize,
        exclude: &HashSet<NodeId>,
    ) -> Result<Vec<Node>> {
        let eligible = rank_eligible(candidates, exclude, self.max_utilization);
        ensure_enough(eligible.len(), factor)?;

        let mut selected: Vec<&Node> = Vec::with_capacity(factor);
        let mut racks_used = HashSet::new();

        // First pass: best node of each rack
        for node in &eligible {
            if selected.len() == factor {
                break;
            }
            if racks_used.insert(node.rack()) {
                selected.push(node);
            }
        }

        // Second pass: fill from already used racks
        for node in &eligible {
            if selected.len() == factor {
                break;
            }
            if !selected.iter().any(|s| s.id == node.id) {
                selected.push(node);
            }
        }

        debug!(
            "Rack-aware placement selected {} nodes across {} racks",
            selected.len(),
            racks_used.len().min(selected.len())
        );
        Ok(selected.into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::policy::test_node;

    #[test]
    fn test_spreads_across_racks() {
        let nodes = vec![
            test_node("10.0.0.1", 1000, 0, Some("/rack-1")),
            test_node("10.0.0.2", 1000, 10, Some("/rack-1")),
            test_node("10.0.0.3", 1000, 500, Some("/rack-2")),
            test_node("10.0.0.4", 1000, 600, Some("/rack-3")),
        ];
        let policy = RackAwarePlacement::new(0.95);

        let selected = policy.select_nodes(&nodes, 3, &HashSet::new()).unwrap();
        let racks: HashSet<_> = selected.iter().map(|n| n.rack()).collect();
        assert_eq!(selected.len(), 3);
        assert_eq!(racks.len(), 3);
    }

    #[test]
    fn test_fills_from_used_racks_when_short() {
        let nodes = vec![
            test_node("10.0.0.1", 1000, 0, Some("/rack-1")),
            test_node("10.0.0.2", 1000, 10, Some("/rack-1")),
            test_node("10.0.0.3", 1000, 20, Some("/rack-2")),
        ];
        let policy = RackAwarePlacement::new(0.95);

        let selected = policy.select_nodes(&nodes, 3, &HashSet::new()).unwrap();
        let ids: HashSet<_> = selected.iter().map(|n| n.id).collect();
        assert_eq!(ids.len(), 3);
        // rack-2 is taken in the first pass despite ranking last
        assert_eq!(selected[1].ip_address, "10.0.0.3");
    }

    #[test]
    fn test_unknown_rack_counts_as_own_domain() {
        let nodes = vec![
            test_node("10.0.0.1", 1000, 0, None),
            test_node("10.0.0.2", 1000, 0, None),
        ];
        let policy = RackAwarePlacement::new(0.95);

        let selected = policy.select_nodes(&nodes, 2, &HashSet::new()).unwrap();
        assert_ne!(selected[0].rack(), selected[1].rack());
    }
}
