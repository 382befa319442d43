//! Distributed minimum spanning tree (Gallager, Humblet and Spira).
//!
//! Fragments grow by repeatedly finding their minimum-weight outgoing edge
//! and joining the fragment on the other side. Edge weights are made unique
//! by pairing the channel cost with the channel id. Messages a node cannot
//! handle yet are queued and retried, in arrival order, after every state
//! change of that node.
//!
//! When the core learns that no outgoing edge is left, the core node with
//! the smaller id becomes the root and floods a termination message down the
//! tree. Every node then points at its parent and the finished listeners run
//! once. The graph has to be connected.

use crate::pcn_costs::RoutingCosts;
use crate::pcn_engine::Context;
use crate::pcn_events::Event;
use crate::pcn_forest::SpanningForest;
use crate::pcn_graph::Graph;
use crate::pcn_interface::{ChannelId, NodeId};
use log::{debug, info};
use std::collections::VecDeque;

/// Unique edge weight. `Infinite` stands for "no outgoing edge".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weight {
    Finite(u64, ChannelId),
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Sleeping,
    Find,
    Found,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Basic,
    Branch,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhsBody {
    Connect { level: u32 },
    Initiate { level: u32, fragment: Weight, state: NodeState },
    Test { level: u32, fragment: Weight },
    Accept,
    Reject,
    Report { weight: Weight },
    ChangeRoot,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GhsMessage {
    pub from: NodeId,
    pub to: NodeId,
    pub channel: ChannelId,
    pub body: GhsBody,
}

#[derive(Debug, Clone)]
struct GhsNode {
    state: NodeState,
    level: u32,
    fragment: Weight,
    in_branch: Option<ChannelId>,
    test_edge: Option<ChannelId>,
    best_edge: Option<ChannelId>,
    best_weight: Weight,
    find_count: usize,
    deferred: VecDeque<GhsMessage>,
    terminated: bool,
}

impl GhsNode {
    fn new() -> Self {
        Self {
            state: NodeState::Sleeping,
            level: 0,
            fragment: Weight::Infinite,
            in_branch: None,
            test_edge: None,
            best_edge: None,
            best_weight: Weight::Infinite,
            find_count: 0,
            deferred: VecDeque::new(),
            terminated: false,
        }
    }
}

pub type FinishedListener = Box<dyn FnMut(&SpanningForest)>;

pub struct Ghs {
    nodes: Vec<GhsNode>,
    adjacency: Vec<Vec<ChannelId>>,
    endpoints: Vec<(NodeId, NodeId)>,
    weights: Vec<Weight>,
    /// Edge state as seen from node1 and node2.
    edges: Vec<[EdgeState; 2]>,
    terminated: usize,
    forest: Option<SpanningForest>,
    listeners: Vec<FinishedListener>,
    messages: u64,
}

impl std::fmt::Debug for Ghs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ghs")
            .field("nodes", &self.nodes.len())
            .field("terminated", &self.terminated)
            .field("messages", &self.messages)
            .finish()
    }
}

impl Ghs {
    pub fn new(graph: &Graph, costs: &RoutingCosts) -> Self {
        let weights = graph
            .channels()
            .iter()
            .map(|ch| Weight::Finite(costs.cost(ch, ch.node1()), ch.id()))
            .collect();
        Self {
            nodes: vec![GhsNode::new(); graph.size()],
            adjacency: graph.nodes().iter().map(|n| n.channels().to_vec()).collect(),
            endpoints: graph.channels().iter().map(|ch| (ch.node1(), ch.node2())).collect(),
            weights,
            edges: vec![[EdgeState::Basic; 2]; graph.channel_count()],
            terminated: 0,
            forest: None,
            listeners: Vec::new(),
            messages: 0,
        }
    }

    /// Registers a callback that receives the finished tree. It runs at once
    /// if the tree is already there.
    pub fn on_finished(&mut self, mut listener: FinishedListener) {
        if let Some(forest) = &self.forest {
            listener(forest);
        }
        self.listeners.push(listener);
    }

    pub fn is_finished(&self) -> bool {
        self.forest.is_some()
    }

    pub fn forest(&self) -> Option<&SpanningForest> {
        self.forest.as_ref()
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn weight(&self, channel: ChannelId) -> Weight {
        self.weights[channel]
    }

    /// Sum of the costs of all tree edges.
    pub fn total_weight(&self) -> u64 {
        self.nodes
            .iter()
            .filter_map(|n| n.in_branch)
            .map(|ch| match self.weights[ch] {
                Weight::Finite(cost, _) => cost,
                Weight::Infinite => 0,
            })
            .sum()
    }

    /// Wakes node 0; every other node wakes when it first hears from a neighbor.
    pub fn start(&mut self, ctx: &mut Context) {
        match self.nodes.len() {
            0 => {}
            1 => self.terminate(ctx, 0, None),
            _ => self.wakeup(ctx, 0),
        }
    }

    pub(crate) fn handle(&mut self, ctx: &mut Context, message: GhsMessage) {
        let node = message.to;
        if !self.process(ctx, message) {
            self.nodes[node].deferred.push_back(message);
            return;
        }
        self.replay(ctx, node);
    }

    fn replay(&mut self, ctx: &mut Context, node: NodeId) {
        loop {
            let pending = std::mem::take(&mut self.nodes[node].deferred);
            if pending.is_empty() {
                return;
            }
            let mut progressed = false;
            for message in pending {
                if self.process(ctx, message) {
                    progressed = true;
                } else {
                    self.nodes[node].deferred.push_back(message);
                }
            }
            if !progressed {
                return;
            }
        }
    }

    // ===== Helpers =====

    fn other(&self, channel: ChannelId, node: NodeId) -> NodeId {
        let (a, b) = self.endpoints[channel];
        if node == a {
            b
        } else {
            a
        }
    }

    fn edge(&self, node: NodeId, channel: ChannelId) -> EdgeState {
        let side = usize::from(self.endpoints[channel].0 != node);
        self.edges[channel][side]
    }

    fn set_edge(&mut self, node: NodeId, channel: ChannelId, state: EdgeState) {
        let side = usize::from(self.endpoints[channel].0 != node);
        self.edges[channel][side] = state;
    }

    fn send(&mut self, ctx: &mut Context, from: NodeId, channel: ChannelId, body: GhsBody) {
        self.messages += 1;
        let to = self.other(channel, from);
        ctx.send(Event::Ghs(GhsMessage { from, to, channel, body }));
    }

    // ===== Protocol =====

    /// Returns `false` if the message has to wait.
    fn process(&mut self, ctx: &mut Context, message: GhsMessage) -> bool {
        let n = message.to;
        let j = message.channel;
        match message.body {
            GhsBody::Connect { level } => {
                if self.nodes[n].state == NodeState::Sleeping {
                    self.wakeup(ctx, n);
                }
                let node = &self.nodes[n];
                if level < node.level {
                    let (my_level, fragment, state) = (node.level, node.fragment, node.state);
                    self.set_edge(n, j, EdgeState::Branch);
                    self.send(ctx, n, j, GhsBody::Initiate { level: my_level, fragment, state });
                    if state == NodeState::Find {
                        self.nodes[n].find_count += 1;
                    }
                } else if self.edge(n, j) == EdgeState::Basic {
                    return false;
                } else {
                    let level = node.level + 1;
                    let fragment = self.weights[j];
                    self.send(ctx, n, j, GhsBody::Initiate { level, fragment, state: NodeState::Find });
                }
            }
            GhsBody::Initiate { level, fragment, state } => {
                let node = &mut self.nodes[n];
                node.level = level;
                node.fragment = fragment;
                node.state = state;
                node.in_branch = Some(j);
                node.best_edge = None;
                node.best_weight = Weight::Infinite;
                let branches: Vec<ChannelId> = self.adjacency[n]
                    .iter()
                    .copied()
                    .filter(|&i| i != j && self.edge(n, i) == EdgeState::Branch)
                    .collect();
                for i in branches {
                    self.send(ctx, n, i, GhsBody::Initiate { level, fragment, state });
                    if state == NodeState::Find {
                        self.nodes[n].find_count += 1;
                    }
                }
                if state == NodeState::Find {
                    self.test(ctx, n);
                }
            }
            GhsBody::Test { level, fragment } => {
                if self.nodes[n].state == NodeState::Sleeping {
                    self.wakeup(ctx, n);
                }
                if level > self.nodes[n].level {
                    return false;
                }
                if fragment != self.nodes[n].fragment {
                    self.send(ctx, n, j, GhsBody::Accept);
                } else {
                    if self.edge(n, j) == EdgeState::Basic {
                        self.set_edge(n, j, EdgeState::Rejected);
                    }
                    if self.nodes[n].test_edge != Some(j) {
                        self.send(ctx, n, j, GhsBody::Reject);
                    } else {
                        self.test(ctx, n);
                    }
                }
            }
            GhsBody::Accept => {
                let weight = self.weights[j];
                let node = &mut self.nodes[n];
                node.test_edge = None;
                if weight < node.best_weight {
                    node.best_edge = Some(j);
                    node.best_weight = weight;
                }
                self.report(ctx, n);
            }
            GhsBody::Reject => {
                if self.edge(n, j) == EdgeState::Basic {
                    self.set_edge(n, j, EdgeState::Rejected);
                }
                self.test(ctx, n);
            }
            GhsBody::Report { weight } => {
                let node = &mut self.nodes[n];
                if node.in_branch != Some(j) {
                    node.find_count -= 1;
                    if weight < node.best_weight {
                        node.best_weight = weight;
                        node.best_edge = Some(j);
                    }
                    self.report(ctx, n);
                } else if node.state == NodeState::Find {
                    return false;
                } else if weight > node.best_weight {
                    self.change_root(ctx, n);
                } else if weight == Weight::Infinite && node.best_weight == Weight::Infinite {
                    // both core nodes get here; the smaller one takes over
                    if n < self.other(j, n) {
                        self.terminate(ctx, n, None);
                    }
                }
            }
            GhsBody::ChangeRoot => self.change_root(ctx, n),
            GhsBody::Terminate => self.terminate(ctx, n, Some(j)),
        }
        true
    }

    fn wakeup(&mut self, ctx: &mut Context, n: NodeId) {
        let min_edge = self.adjacency[n].iter().copied().min_by_key(|&ch| self.weights[ch]);
        let node = &mut self.nodes[n];
        node.level = 0;
        node.state = NodeState::Found;
        node.find_count = 0;
        if let Some(m) = min_edge {
            self.set_edge(n, m, EdgeState::Branch);
            self.send(ctx, n, m, GhsBody::Connect { level: 0 });
        }
    }

    fn test(&mut self, ctx: &mut Context, n: NodeId) {
        let candidate = self.adjacency[n]
            .iter()
            .copied()
            .filter(|&ch| self.edge(n, ch) == EdgeState::Basic)
            .min_by_key(|&ch| self.weights[ch]);
        self.nodes[n].test_edge = candidate;
        match candidate {
            Some(ch) => {
                let (level, fragment) = (self.nodes[n].level, self.nodes[n].fragment);
                self.send(ctx, n, ch, GhsBody::Test { level, fragment });
            }
            None => self.report(ctx, n),
        }
    }

    fn report(&mut self, ctx: &mut Context, n: NodeId) {
        let node = &mut self.nodes[n];
        if node.find_count != 0 || node.test_edge.is_some() {
            return;
        }
        node.state = NodeState::Found;
        let weight = node.best_weight;
        if let Some(in_branch) = node.in_branch {
            self.send(ctx, n, in_branch, GhsBody::Report { weight });
        }
    }

    fn change_root(&mut self, ctx: &mut Context, n: NodeId) {
        let Some(best) = self.nodes[n].best_edge else {
            return;
        };
        if self.edge(n, best) == EdgeState::Branch {
            self.send(ctx, n, best, GhsBody::ChangeRoot);
        } else {
            let level = self.nodes[n].level;
            self.send(ctx, n, best, GhsBody::Connect { level });
            self.set_edge(n, best, EdgeState::Branch);
        }
    }

    fn terminate(&mut self, ctx: &mut Context, n: NodeId, from: Option<ChannelId>) {
        if self.nodes[n].terminated {
            return;
        }
        self.nodes[n].terminated = true;
        self.nodes[n].in_branch = from;
        if from.is_none() {
            debug!("GHS root is node {} at {:.2}", n, ctx.now());
        }
        let branches: Vec<ChannelId> = self.adjacency[n]
            .iter()
            .copied()
            .filter(|&i| Some(i) != from && self.edge(n, i) == EdgeState::Branch)
            .collect();
        for i in branches {
            self.send(ctx, n, i, GhsBody::Terminate);
        }
        self.terminated += 1;
        if self.terminated == self.nodes.len() {
            self.finish(ctx);
        }
    }

    fn finish(&mut self, ctx: &Context) {
        let parents = (0..self.nodes.len())
            .map(|n| self.nodes[n].in_branch.map(|ch| self.other(ch, n)))
            .collect();
        let forest = SpanningForest::from_parents(parents);
        info!(
            "GHS finished at {:.2} after {} messages, weight {}",
            ctx.now(),
            self.messages,
            self.total_weight()
        );
        for listener in self.listeners.iter_mut() {
            listener(&forest);
        }
        self.forest = Some(forest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::{CostConfig, SimConfig};
    use crate::pcn_engine::Simulation;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Connected graph: a random spanning path plus random extra channels,
    /// with random fee rates so costs differ.
    fn random_graph(n: usize, extra: usize, seed: u64) -> Graph {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut g = Graph::with_nodes(n);
        for i in 1..n {
            let j = rng.gen_range(0..i);
            g.add_channel(i, j, 100, 100).unwrap();
        }
        let mut added = 0;
        while added < extra {
            let a = rng.gen_range(0..n);
            let b = rng.gen_range(0..n);
            if a != b && g.channel_between(a, b).is_none() {
                g.add_channel(a, b, 100, 100).unwrap();
                added += 1;
            }
        }
        for ch in g.channels_mut() {
            let r1 = rng.gen_range(0..5);
            let r2 = rng.gen_range(0..5);
            ch.set_fees(0, 0, r1, r2);
        }
        g
    }

    fn kruskal(g: &Graph, costs: &RoutingCosts) -> u64 {
        let mut edges: Vec<(Weight, NodeId, NodeId)> = g
            .channels()
            .iter()
            .map(|ch| (Weight::Finite(costs.cost(ch, ch.node1()), ch.id()), ch.node1(), ch.node2()))
            .collect();
        edges.sort();
        let mut parent: Vec<usize> = (0..g.size()).collect();
        fn find(p: &mut Vec<usize>, x: usize) -> usize {
            if p[x] != x {
                let r = find(p, p[x]);
                p[x] = r;
            }
            p[x]
        }
        let mut total = 0;
        for (w, a, b) in edges {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra] = rb;
                if let Weight::Finite(c, _) = w {
                    total += c;
                }
            }
        }
        total
    }

    fn config() -> SimConfig {
        SimConfig {
            max_run_time: 1.0e9,
            costs: CostConfig::Advanced { base_factor: 0.0, rate_factor: 10.0, capacity_factor: 0.0 },
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_matches_kruskal() {
        for seed in 0..5 {
            let g = random_graph(30, 40, seed);
            let costs = RoutingCosts::new(config().costs);
            let expected = kruskal(&g, &costs);

            let mut sim = Simulation::new(config(), g);
            let calls = Rc::new(RefCell::new(0));
            let c = calls.clone();
            sim.start_ghs().on_finished(Box::new(move |_| *c.borrow_mut() += 1));
            sim.run();

            let ghs = sim.context().ghs().unwrap();
            assert!(ghs.is_finished(), "seed {}", seed);
            assert_eq!(ghs.total_weight(), expected, "seed {}", seed);
            assert_eq!(*calls.borrow(), 1);
        }
    }

    #[test]
    fn test_tree_spans_all_nodes() {
        let g = random_graph(20, 25, 99);
        let mut sim = Simulation::new(config(), g);
        sim.start_ghs();
        sim.run();

        let forest = sim.context().ghs().unwrap().forest().unwrap().clone();
        let roots: Vec<NodeId> = (0..20).filter(|&n| forest.next_hop(n).is_none()).collect();
        assert_eq!(roots.len(), 1);
        for n in 0..20 {
            assert_eq!(forest.root_of(n), Some(roots[0]));
            // every tree edge is a real channel
            if let Some(p) = forest.next_hop(n) {
                assert!(sim.context().graph().channel_between(n, p).is_some());
            }
        }
    }

    #[test]
    fn test_single_node_finishes_immediately() {
        let mut sim = Simulation::new(config(), Graph::with_nodes(1));
        sim.start_ghs();
        assert!(sim.context().ghs().unwrap().is_finished());
    }

    #[test]
    fn test_listener_added_after_finish_is_called() {
        let mut sim = Simulation::new(config(), Graph::with_nodes(1));
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let s = sizes.clone();
        sim.start_ghs().on_finished(Box::new(move |f| s.borrow_mut().push(f.size())));
        sim.run();
        assert_eq!(*sizes.borrow(), vec![1]);
    }
}
