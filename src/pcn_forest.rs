//! Shortest-path spanning forests.
//!
//! A forest stores, for every node, the next hop towards the closest of a set
//! of roots. It is built by flooding: every root announces distance zero, and
//! a node that learns a shorter distance adopts the announcing neighbor as its
//! parent and announces its own distance in turn. Consumers accept a parent
//! but never forward. The owner of the builder is told after a fixed settling
//! delay; messages still in flight at that point keep refining the forest.

use crate::pcn_costs::RoutingCosts;
use crate::pcn_engine::Context;
use crate::pcn_events::{Event, TreeUpdate};
use crate::pcn_graph::Graph;
use crate::pcn_interface::{BuilderId, NodeId, Role, TREE_SETTLING_DELAY};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

// ============================================================================
// Forest
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SpanningForest {
    parent: Vec<Option<NodeId>>,
    /// Root of the tree a node belongs to, `None` while unreached.
    partition: Vec<Option<NodeId>>,
    distance: Vec<u64>,
}

impl SpanningForest {
    pub fn new(size: usize) -> Self {
        Self {
            parent: vec![None; size],
            partition: vec![None; size],
            distance: vec![u64::MAX; size],
        }
    }

    /// Forest from parent pointers alone. Roots are the nodes without a parent.
    pub fn from_parents(parent: Vec<Option<NodeId>>) -> Self {
        let size = parent.len();
        let mut forest = Self {
            parent,
            partition: vec![None; size],
            distance: vec![u64::MAX; size],
        };
        for node in 0..size {
            if let Some(path) = forest.path_from(node, true) {
                forest.partition[node] = path.last().copied();
                forest.distance[node] = (path.len() - 1) as u64;
            }
        }
        forest
    }

    /// Builds the forest centrally, with the same relaxation the flood applies.
    pub fn compute(graph: &Graph, costs: &RoutingCosts, roots: &[NodeId]) -> Self {
        let mut forest = Self::new(graph.size());
        let mut visited = vec![false; graph.size()];
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;
        for &root in roots {
            forest.distance[root] = 0;
            forest.partition[root] = Some(root);
            heap.push(Reverse((0, seq, root)));
            seq += 1;
        }
        while let Some(Reverse((_, _, n1))) = heap.pop() {
            if visited[n1] {
                continue;
            }
            visited[n1] = true;
            if graph.node(n1).has_role(Role::Consumer) {
                continue;
            }
            for &ch in graph.node(n1).channels() {
                let ch = graph.channel(ch);
                let n2 = ch.other_node(n1);
                if visited[n2] {
                    continue;
                }
                // n2 pays towards its parent n1
                let dist = forest.distance[n1].saturating_add(costs.cost(ch, n2));
                if dist < forest.distance[n2] {
                    forest.parent[n2] = Some(n1);
                    forest.distance[n2] = dist;
                    forest.partition[n2] = forest.partition[n1];
                    heap.push(Reverse((dist, seq, n2)));
                    seq += 1;
                }
            }
        }
        forest
    }

    pub fn size(&self) -> usize {
        self.parent.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.partition[node].is_some()
    }

    pub fn root_of(&self, node: NodeId) -> Option<NodeId> {
        self.partition[node]
    }

    pub fn next_hop(&self, node: NodeId) -> Option<NodeId> {
        self.parent[node]
    }

    pub fn distance(&self, node: NodeId) -> Option<u64> {
        self.contains(node).then(|| self.distance[node])
    }

    pub fn parents(&self) -> &[Option<NodeId>] {
        &self.parent
    }

    /// Path from `node` up to its root. `None` if the parent chain loops.
    pub fn path_from(&self, node: NodeId, include_root: bool) -> Option<Vec<NodeId>> {
        let mut path = vec![node];
        let mut n = node;
        while let Some(p) = self.parent[n] {
            if path.len() > self.size() {
                return None;
            }
            path.push(p);
            n = p;
        }
        if !include_root {
            path.pop();
        }
        Some(path)
    }

    /// Path from the root down to `node`.
    pub fn path_to(&self, node: NodeId, include_root: bool) -> Option<Vec<NodeId>> {
        let mut path = self.path_from(node, include_root)?;
        path.reverse();
        Some(path)
    }
}

// ============================================================================
// Flooding builder
// ============================================================================

#[derive(Debug, Clone)]
pub struct ForestBuilder {
    roots: Vec<NodeId>,
    costs: RoutingCosts,
    forest: SpanningForest,
    settled: bool,
}

impl ForestBuilder {
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn forest(&self) -> &SpanningForest {
        &self.forest
    }

    /// Whether the settling delay has passed.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub(crate) fn mark_settled(&mut self) {
        self.settled = true;
    }
}

/// Starts flooding a forest rooted at `roots` and returns its handle.
///
/// `Event::TreeSettled` fires after the settling delay.
pub fn build(ctx: &mut Context, roots: &[NodeId], costs: RoutingCosts) -> BuilderId {
    let id = ctx.add_forest(ForestBuilder {
        roots: roots.to_vec(),
        costs,
        forest: SpanningForest::new(ctx.graph().size()),
        settled: false,
    });
    for &root in roots {
        ctx.send(Event::TreeUpdate(TreeUpdate {
            builder: id,
            from: None,
            to: root,
            distance: 0,
            root,
        }));
    }
    ctx.schedule_after(TREE_SETTLING_DELAY, Event::TreeSettled(id));
    id
}

pub(crate) fn handle_update(ctx: &mut Context, update: TreeUpdate) {
    let Some(costs) = ctx.forest(update.builder).map(|b| b.costs) else {
        // builder was dropped
        return;
    };
    let node = update.to;
    let edge_cost = match update.from {
        None => Some(0),
        Some(sender) => ctx
            .graph()
            .channel_between(node, sender)
            .map(|ch| costs.cost(ctx.graph().channel(ch), node)),
    };
    let Some(edge_cost) = edge_cost else {
        return;
    };

    let Some(builder) = ctx.forest_mut(update.builder) else {
        return;
    };
    let forest = &mut builder.forest;
    let dist = update.distance.saturating_add(edge_cost);
    if dist >= forest.distance[node] {
        return;
    }
    forest.parent[node] = update.from;
    forest.distance[node] = dist;
    forest.partition[node] = Some(update.root);

    if ctx.graph().node(node).has_role(Role::Consumer) {
        return;
    }
    let neighbors: Vec<NodeId> = ctx
        .graph()
        .neighbors(node)
        .filter(|&n| Some(n) != update.from)
        .collect();
    for n in neighbors {
        ctx.send(Event::TreeUpdate(TreeUpdate {
            builder: update.builder,
            from: Some(node),
            to: n,
            distance: dist,
            root: update.root,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::SimConfig;
    use crate::pcn_engine::Simulation;

    /// 0 - 1 - 2 - 3 - 4 with a shortcut 0 - 4.
    fn ring5() -> Graph {
        let mut g = Graph::with_nodes(5);
        for i in 0..5 {
            g.add_channel(i, (i + 1) % 5, 100, 100).unwrap();
        }
        g
    }

    #[test]
    fn test_compute_single_root() {
        let g = ring5();
        let forest = SpanningForest::compute(&g, &RoutingCosts::hop(), &[0]);
        assert_eq!(forest.next_hop(0), None);
        assert_eq!(forest.next_hop(1), Some(0));
        assert_eq!(forest.next_hop(4), Some(0));
        assert_eq!(forest.distance(2), Some(2));
        assert_eq!(forest.path_from(2, true), Some(vec![2, 1, 0]));
        assert_eq!(forest.path_from(2, false), Some(vec![2, 1]));
        assert_eq!(forest.path_to(3, true), Some(vec![0, 4, 3]));
        assert_eq!(forest.path_to(0, false), Some(vec![]));
    }

    #[test]
    fn test_compute_forest_partitions() {
        let g = ring5();
        let forest = SpanningForest::compute(&g, &RoutingCosts::hop(), &[0, 2]);
        assert_eq!(forest.root_of(1), Some(0));
        assert_eq!(forest.root_of(3), Some(2));
        assert_eq!(forest.root_of(4), Some(0));
        for node in 0..5 {
            let path = forest.path_from(node, true).unwrap();
            assert_eq!(path.last().copied(), forest.root_of(node));
        }
    }

    #[test]
    fn test_consumers_are_leaves() {
        let mut g = Graph::with_nodes(3);
        g.add_channel(0, 1, 10, 10).unwrap();
        g.add_channel(1, 2, 10, 10).unwrap();
        g.set_role(1, Role::Consumer);
        let forest = SpanningForest::compute(&g, &RoutingCosts::hop(), &[0]);
        assert!(forest.contains(1));
        assert!(!forest.contains(2));
        assert_eq!(forest.distance(2), None);
    }

    #[test]
    fn test_flooding_skips_consumer_shortcut() {
        // 0 - 1 - 2 - 3, plus 0 - 4 - 3 through a consumer
        let mut g = Graph::with_nodes(5);
        g.add_channel(0, 1, 10, 10).unwrap();
        g.add_channel(1, 2, 10, 10).unwrap();
        g.add_channel(2, 3, 10, 10).unwrap();
        g.add_channel(0, 4, 10, 10).unwrap();
        g.add_channel(4, 3, 10, 10).unwrap();
        g.set_role(4, Role::Consumer);

        let mut sim = Simulation::new(SimConfig::default(), g);
        let id = sim.build_forest(&[0], RoutingCosts::hop());
        sim.run();

        let ctx = sim.context();
        let builder = ctx.forest(id).unwrap();
        assert!(builder.is_settled());
        assert!(ctx.now() >= TREE_SETTLING_DELAY);
        let forest = builder.forest();
        assert_eq!(forest.next_hop(4), Some(0));
        assert_eq!(forest.next_hop(3), Some(2));
        assert_eq!(forest.distance(3), Some(3));
        for node in 0..5 {
            assert_ne!(forest.next_hop(node), Some(4));
            let path = forest.path_from(node, true).unwrap();
            assert_eq!(path.last(), Some(&0));
            for hop in path.windows(2) {
                assert!(ctx.graph().channel_between(hop[0], hop[1]).is_some());
            }
        }
        assert_eq!(forest, &SpanningForest::compute(ctx.graph(), &RoutingCosts::hop(), &[0]));
    }

    #[test]
    fn test_from_parents_detects_loops() {
        let forest = SpanningForest::from_parents(vec![None, Some(0), Some(1)]);
        assert_eq!(forest.root_of(2), Some(0));
        assert_eq!(forest.distance(2), Some(2));

        let looped = SpanningForest::from_parents(vec![Some(1), Some(0), None]);
        assert_eq!(looped.path_from(0, true), None);
        assert!(!looped.contains(0));
        assert!(looped.contains(2));
    }
}
