//! Routing algorithm contract and the pieces algorithms share.
//!
//! An algorithm receives a payment, adds candidate paths to it and finally
//! calls `pcn_payment::select_routes`, either right away or from a later
//! event once distributed path discovery has finished.

use crate::pcn_config::RoutingConfig;
use crate::pcn_engine::Context;
use crate::pcn_error::SimResult;
use crate::pcn_events::RoutingEvent;
use crate::pcn_graph::{Channel, Graph};
use crate::pcn_interface::{Amount, BuilderId, ChannelId, NodeId, PaymentId, Role};
use crate::pcn_routing_flare::FlareRouting;
use crate::pcn_routing_hierarchy::LandmarkHierarchyRouting;
use crate::pcn_routing_landmark::{LandmarkCentricRouting, LandmarkUniverseRouting};
use crate::pcn_routing_optimal::OptimalRouting;
use crate::pcn_routing_source_graph::SourceGraphRouting;
use hashbrown::HashSet;
use rand::rngs::StdRng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub trait RoutingAlgorithm {
    fn name(&self) -> &'static str;

    /// Called once per run after the fee policy set the initial fees.
    fn prepare(&mut self, ctx: &mut Context, rng: StdRng) -> SimResult<()>;

    /// Step 1 of a payment.
    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId);

    fn handle_event(&mut self, _ctx: &mut Context, _event: RoutingEvent) {}

    /// A forest started by this algorithm passed its settling delay.
    fn on_forest_settled(&mut self, _ctx: &mut Context, _builder: BuilderId) {}

    /// The balance of a channel moved.
    fn on_channel_update(&mut self, _ctx: &mut Context, _channel: ChannelId) {}

    /// The fee policy changed the fees of a channel.
    fn on_fee_update(&mut self, _ctx: &mut Context, _channel: ChannelId) {}

    /// Rough memory footprint of the routing state of all nodes, in bytes.
    fn estimate_storage(&self, _ctx: &Context) -> u64 {
        0
    }
}

pub fn from_config(config: &RoutingConfig) -> Box<dyn RoutingAlgorithm> {
    match *config {
        RoutingConfig::Optimal => Box::new(OptimalRouting::new()),
        RoutingConfig::SourceGraph { broadcast_interval, path_count } => {
            Box::new(SourceGraphRouting::new(broadcast_interval, path_count))
        }
        RoutingConfig::LandmarkCentric { interval, landmarks } => {
            Box::new(LandmarkCentricRouting::new(interval, landmarks))
        }
        RoutingConfig::LandmarkUniverse { interval, universes, levels } => {
            Box::new(LandmarkUniverseRouting::new(interval, universes, levels))
        }
        RoutingConfig::LandmarkHierarchy { interval } => Box::new(LandmarkHierarchyRouting::new(interval)),
        RoutingConfig::Flare => Box::new(FlareRouting::new()),
    }
}

// ============================================================================
// Shortest path by fees
// ============================================================================

/// Channel state an algorithm believes in, which may lag behind the graph.
pub trait ChannelView {
    fn view(&self, id: ChannelId) -> &Channel;
}

impl ChannelView for Graph {
    fn view(&self, id: ChannelId) -> &Channel {
        self.channel(id)
    }
}

/// Cheapest path for a payment, searched backward from the target.
///
/// Every node on the way must be able to forward the amount its successor
/// needs plus the fee. Consumers are only used as endpoints, edges that push
/// the total over the fee limit are dropped, and among equally cheap
/// candidates the one found first wins.
#[derive(Debug, Clone, Default)]
pub struct PathSearch {
    visited: Vec<bool>,
    distance: Vec<u64>,
    amount: Vec<Amount>,
    prev: Vec<Option<NodeId>>,
}

impl PathSearch {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, size: usize) {
        self.visited.clear();
        self.visited.resize(size, false);
        self.distance.clear();
        self.distance.resize(size, u64::MAX);
        self.amount.clear();
        self.amount.resize(size, 0);
        self.prev.clear();
        self.prev.resize(size, None);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find(
        &mut self,
        graph: &Graph,
        view: &impl ChannelView,
        source: NodeId,
        target: NodeId,
        amount: Amount,
        max_fee_percent: f64,
        excluded: &HashSet<ChannelId>,
    ) -> Option<Vec<NodeId>> {
        if source == target {
            return None;
        }
        self.reset(graph.size());
        let limit = (1.0 + max_fee_percent * 0.01) * amount as f64;
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;

        self.distance[target] = 0;
        self.amount[target] = amount;
        heap.push(Reverse((0u64, seq, target)));

        while let Some(Reverse((_, _, n1))) = heap.pop() {
            if self.visited[n1] {
                continue;
            }
            self.visited[n1] = true;
            if n1 == source {
                break;
            }
            if n1 != target && graph.node(n1).has_role(Role::Consumer) {
                continue;
            }
            let n1_amount = self.amount[n1];
            for &id in graph.node(n1).channels() {
                if excluded.contains(&id) {
                    continue;
                }
                let ch = view.view(id);
                let n2 = ch.other_node(n1);
                if self.visited[n2] || !ch.can_pay(n2, n1_amount) {
                    continue;
                }
                let fee = ch.fee(n2, n1_amount);
                let n2_amount = n1_amount + fee;
                if n2_amount as f64 > limit || ch.min_timelock_delta() == 0 {
                    continue;
                }
                let n2_dist = self.distance[n1] + fee;
                if n2_dist >= self.distance[n2] {
                    continue;
                }
                self.distance[n2] = n2_dist;
                self.amount[n2] = n2_amount;
                self.prev[n2] = Some(n1);
                seq += 1;
                heap.push(Reverse((n2_dist, seq, n2)));
            }
        }

        self.prev[source]?;
        let mut path = vec![source];
        let mut node = source;
        while node != target {
            node = self.prev[node]?;
            path.push(node);
        }
        Some(path)
    }
}

/// Channels along a path, `None` if two consecutive nodes are not adjacent.
pub fn path_channels(graph: &Graph, path: &[NodeId]) -> Option<Vec<ChannelId>> {
    path.windows(2).map(|w| graph.channel_between(w[0], w[1])).collect()
}

// ============================================================================
// Path helpers
// ============================================================================

/// Removes the first loop found: cuts from the first node that shows up
/// again to its last occurrence.
///
/// This yields a loop-free path when both halves of a concatenation were
/// loop-free, but not necessarily the shortest one.
pub fn shorten_path(path: &[NodeId]) -> Vec<NodeId> {
    for a in 0..path.len() {
        for b in (a + 1..path.len()).rev() {
            if path[a] == path[b] {
                let mut shortened = path[..a].to_vec();
                shortened.extend_from_slice(&path[b..]);
                return shortened;
            }
        }
    }
    path.to_vec()
}

pub fn concat(first: &[NodeId], second: &[NodeId]) -> Vec<NodeId> {
    let mut path = Vec::with_capacity(first.len() + second.len());
    path.extend_from_slice(first);
    path.extend_from_slice(second);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize, cap: Amount) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n {
            g.add_channel(i, (i + 1) % n, cap, cap).unwrap();
        }
        for ch in g.channels_mut() {
            ch.set_fees(0, 0, 0, 0);
        }
        g
    }

    #[test]
    fn test_zero_fee_ties_follow_discovery_order() {
        let g = ring(6, 1000);
        let path = PathSearch::new().find(&g, &g, 0, 3, 100, 5.0, &HashSet::new());
        assert_eq!(path, Some(vec![0, 1, 2, 3]));
    }

    #[test]
    fn test_prefers_cheaper_side() {
        let mut g = ring(6, 1000);
        // make 1 -> 2 expensive
        g.channel_mut(1).set_fees(1000, 0, 0, 0);
        let path = PathSearch::new().find(&g, &g, 0, 3, 100, 5.0, &HashSet::new());
        assert_eq!(path, Some(vec![0, 5, 4, 3]));
    }

    #[test]
    fn test_consumers_never_transit() {
        let mut g = ring(6, 1000);
        g.set_role(1, Role::Consumer);
        g.set_role(0, Role::Consumer);
        let path = PathSearch::new().find(&g, &g, 0, 3, 100, 5.0, &HashSet::new());
        assert_eq!(path, Some(vec![0, 5, 4, 3]));
    }

    #[test]
    fn test_capacity_fee_limit_and_exclusions() {
        let g = ring(6, 1000);
        let mut search = PathSearch::new();
        assert_eq!(search.find(&g, &g, 0, 3, 1001, 5.0, &HashSet::new()), None);

        let excluded: HashSet<ChannelId> = [0].into_iter().collect();
        assert_eq!(search.find(&g, &g, 0, 3, 100, 5.0, &excluded), Some(vec![0, 5, 4, 3]));

        let mut pricey = ring(4, 1000);
        for ch in pricey.channels_mut() {
            ch.set_fees(10_000, 10_000, 0, 0);
        }
        // a single intermediate hop costs 10 on 100
        assert_eq!(search.find(&pricey, &pricey, 0, 2, 100, 5.0, &HashSet::new()), None);
        assert_eq!(
            search.find(&pricey, &pricey, 0, 2, 100, 25.0, &HashSet::new()),
            Some(vec![0, 1, 2])
        );
        assert_eq!(search.find(&pricey, &pricey, 0, 1, 100, 0.0, &HashSet::new()), None);
    }

    #[test]
    fn test_shorten_path_cuts_first_repeat() {
        assert_eq!(shorten_path(&[1, 2, 3, 4]), vec![1, 2, 3, 4]);
        assert_eq!(shorten_path(&[1, 2, 3, 2, 5]), vec![1, 2, 5]);
        // landmark 9 is revisited on the way back
        assert_eq!(shorten_path(&[1, 4, 9, 4, 2]), vec![1, 4, 2]);
        // first repeat wins even if a later cut would have been longer
        assert_eq!(shorten_path(&[1, 2, 3, 1, 3, 4]), vec![1, 3, 4]);
        assert_eq!(concat(&[1, 2], &[3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_path_channels() {
        let g = ring(4, 10);
        assert_eq!(path_channels(&g, &[0, 1, 2]), Some(vec![0, 1]));
        assert_eq!(path_channels(&g, &[0, 2]), None);
    }
}
