//! Flare-style gossip routing.
//!
//! Every node learns the channels within a small radius from its neighbors
//! and picks a few beacons: nodes whose random address is close to its own.
//! A node subscribes to the dynamic updates of its beacons and of the nodes
//! on the way there. To route, the sender searches its own and the target's
//! channels, then asks all beacons of both for their channels and searches
//! again with every answer.

use crate::pcn_engine::Context;
use crate::pcn_error::SimResult;
use crate::pcn_events::{Event, RoutingEvent};
use crate::pcn_graph::{Channel, Graph};
use crate::pcn_interface::{ChannelId, NodeId, PaymentId, SimTime};
use crate::pcn_payment;
use crate::pcn_routing::RoutingAlgorithm;
use hashbrown::HashSet;
use indexmap::{IndexMap, IndexSet};
use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::rc::Rc;

const BEACON_INTERVAL: SimTime = 10.0;
const SUBSCRIBE_INTERVAL: SimTime = 60.0;
/// Delay between a local balance change and its first announcement.
const CHANNEL_CHANGE_DELAY: SimTime = 1.0;
/// Delay before a node passes on what its neighbors told it.
const FORWARD_DELAY: SimTime = 3.0;
/// Hops a channel state travels from its endpoints.
const PROPAGATION_RADIUS: u32 = 2;
pub const MAX_BEACONS: usize = 5;
const MAX_BEACON_DISTANCE: usize = 100;
/// Beacon requests per node and round.
const BEACON_REACTIVATE_COUNT: usize = 5;

/// A channel snapshot and how much further it may travel.
#[derive(Debug, Clone)]
pub struct ChannelStateUpdate {
    pub channel: Rc<Channel>,
    pub ttl: u32,
}

#[derive(Debug, Clone)]
pub enum FlareMessage {
    /// Local: forward pending channel updates.
    TickUpdates { node: NodeId },
    NeighborUpdate {
        from: NodeId,
        to: NodeId,
        updates: Rc<Vec<ChannelStateUpdate>>,
    },
    /// Global: every node asks some known nodes to become its beacon.
    TickBeacons,
    /// Global: every node refreshes its subscriptions.
    TickSubscribe,
    BeaconRequest {
        from: NodeId,
        to: NodeId,
        hops: usize,
        excluded: Vec<NodeId>,
    },
    /// Acceptance, or a closer candidate with the channels leading to it.
    BeaconAck {
        from: NodeId,
        to: NodeId,
        alternative: Option<(NodeId, Vec<Rc<Channel>>)>,
    },
    Subscribe { from: NodeId, to: NodeId },
    Unsubscribe { from: NodeId, to: NodeId },
    DynamicInfo {
        from: NodeId,
        to: NodeId,
        channel: Rc<Channel>,
    },
    ChannelStatesRequest {
        from: NodeId,
        to: NodeId,
        payment: PaymentId,
    },
    ChannelStatesResponse {
        from: NodeId,
        to: NodeId,
        payment: PaymentId,
        channels: Rc<Vec<ChannelId>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub id: NodeId,
    /// Address distance to the owner.
    pub distance: u64,
}

// ============================================================================
// Node state
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FlareNode {
    id: NodeId,
    /// Endpoints of every known channel.
    nodes: IndexSet<NodeId>,
    channels: IndexMap<ChannelId, Rc<Channel>>,
    beacons: Vec<Beacon>,
    subscribers: Vec<NodeId>,
    subscribed: Vec<NodeId>,
    pending: Vec<ChannelStateUpdate>,
}

impl FlareNode {
    fn new(id: NodeId) -> Self {
        Self { id, ..Self::default() }
    }

    pub fn known_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn knows_channel(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn beacons(&self) -> &[Beacon] {
        &self.beacons
    }

    pub fn subscribers(&self) -> &[NodeId] {
        &self.subscribers
    }

    /// Keeps `ch` if it is unknown or newer than the known copy.
    fn set_channel(&mut self, ch: Rc<Channel>) -> bool {
        if let Some(known) = self.channels.get(&ch.id()) {
            if !ch.is_newer_than(known) {
                return false;
            }
        }
        self.nodes.insert(ch.node1());
        self.nodes.insert(ch.node2());
        self.channels.insert(ch.id(), ch);
        true
    }

    fn add_update(&mut self, update: &ChannelStateUpdate) {
        if self.set_channel(update.channel.clone()) && update.ttl > 1 {
            self.pending.push(ChannelStateUpdate {
                channel: update.channel.clone(),
                ttl: update.ttl - 1,
            });
        }
    }

    fn path_to(&self, graph: &Graph, target: NodeId) -> Option<Vec<NodeId>> {
        hop_path(graph, self.id, target, |ch| self.channels.contains_key(&ch))
    }

    /// Known channel snapshots along the local path to `target`.
    fn channels_to(&self, graph: &Graph, target: NodeId) -> Option<Vec<Rc<Channel>>> {
        let path = self.path_to(graph, target)?;
        path.windows(2)
            .map(|w| {
                let id = graph.channel_between(w[0], w[1])?;
                self.channels.get(&id).cloned()
            })
            .collect()
    }

    /// Adds a beacon, replacing one further away once all places are taken.
    fn adopt_beacon(&mut self, id: NodeId, distance: u64) -> bool {
        if self.beacons.iter().any(|b| b.id == id) {
            return false;
        }
        let beacon = Beacon { id, distance };
        if self.beacons.len() < MAX_BEACONS {
            self.beacons.push(beacon);
            return true;
        }
        match self.beacons.iter().position(|b| b.distance > distance) {
            Some(i) => {
                self.beacons[i] = beacon;
                true
            }
            None => false,
        }
    }
}

/// Fewest-hop path from `source` to `target` over the real graph, using only
/// channels `allowed` accepts. Searched backward from the target.
pub fn hop_path(
    graph: &Graph,
    source: NodeId,
    target: NodeId,
    allowed: impl Fn(ChannelId) -> bool,
) -> Option<Vec<NodeId>> {
    let mut prev: Vec<Option<NodeId>> = vec![None; graph.size()];
    let mut visited = vec![false; graph.size()];
    let mut queue = VecDeque::new();
    visited[target] = true;
    queue.push_back(target);
    while let Some(n1) = queue.pop_front() {
        if n1 == source {
            break;
        }
        for &ch in graph.node(n1).channels() {
            if !allowed(ch) {
                continue;
            }
            let n2 = graph.channel(ch).other_node(n1);
            if visited[n2] {
                continue;
            }
            visited[n2] = true;
            prev[n2] = Some(n1);
            queue.push_back(n2);
        }
    }
    if !visited[source] {
        return None;
    }
    let mut path = vec![source];
    let mut node = source;
    while node != target {
        node = prev[node]?;
        path.push(node);
    }
    Some(path)
}

/// Beacon answers still expected for a payment.
#[derive(Debug, Clone)]
struct Query {
    channels: HashSet<ChannelId>,
    outstanding: usize,
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug)]
pub struct FlareRouting {
    nodes: Vec<FlareNode>,
    addresses: Vec<u32>,
    queries: IndexMap<PaymentId, Query>,
    rng: StdRng,
}

impl FlareRouting {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            addresses: Vec::new(),
            queries: IndexMap::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn node(&self, id: NodeId) -> &FlareNode {
        &self.nodes[id]
    }

    fn distance(&self, a: NodeId, b: NodeId) -> u64 {
        self.addresses[a].abs_diff(self.addresses[b]) as u64
    }

    fn send(ctx: &mut Context, message: FlareMessage) {
        ctx.send(Event::Routing(RoutingEvent::Flare(message)));
    }

    fn schedule_tick_updates(ctx: &mut Context, node: NodeId, delay: SimTime) {
        ctx.schedule_after(delay, Event::Routing(RoutingEvent::Flare(FlareMessage::TickUpdates { node })));
    }

    /// Both endpoints learn the channel's state and pass it on shortly.
    fn digest_channel(&mut self, ctx: &mut Context, channel: ChannelId) {
        let ch = Rc::new(ctx.graph().channel(channel).clone().with_timestamp(ctx.now()));
        let update = ChannelStateUpdate {
            channel: ch.clone(),
            ttl: PROPAGATION_RADIUS,
        };
        for node in [ch.node1(), ch.node2()] {
            self.nodes[node].add_update(&update);
            Self::schedule_tick_updates(ctx, node, CHANNEL_CHANGE_DELAY);
        }
    }

    fn tick_updates(&mut self, ctx: &mut Context, node: NodeId) {
        if self.nodes[node].pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.nodes[node].pending);
        for update in &pending {
            for &s in &self.nodes[node].subscribers {
                Self::send(ctx, FlareMessage::DynamicInfo { from: node, to: s, channel: update.channel.clone() });
            }
        }
        let updates = Rc::new(pending);
        ctx.flood(node, None, |to| {
            Event::Routing(RoutingEvent::Flare(FlareMessage::NeighborUpdate {
                from: node,
                to,
                updates: updates.clone(),
            }))
        });
    }

    fn tick_beacons(&mut self, ctx: &mut Context) {
        for node in 0..self.nodes.len() {
            for _ in 0..BEACON_REACTIVATE_COUNT {
                let known = self.nodes[node].nodes.len();
                if known == 0 {
                    break;
                }
                let i = self.rng.gen_range(0..known);
                let Some(&beacon) = self.nodes[node].nodes.get_index(i) else {
                    continue;
                };
                if beacon == node {
                    continue;
                }
                let Some(path) = self.nodes[node].path_to(ctx.graph(), beacon) else {
                    continue;
                };
                let excluded = self.nodes[node].beacons.iter().map(|b| b.id).collect();
                Self::send(ctx, FlareMessage::BeaconRequest { from: node, to: beacon, hops: path.len(), excluded });
            }
        }
        ctx.schedule_after(BEACON_INTERVAL, Event::Routing(RoutingEvent::Flare(FlareMessage::TickBeacons)));
    }

    /// Accepts, or points the requester to a known node with a closer address.
    fn beacon_request(&mut self, ctx: &mut Context, from: NodeId, node: NodeId, hops: usize, excluded: &[NodeId]) {
        let to_me = self.distance(from, node);
        let alternative = self.nodes[node]
            .nodes
            .iter()
            .copied()
            .filter(|&id| id != from && !excluded.contains(&id) && self.distance(from, id) < to_me)
            .min_by_key(|&id| (self.distance(from, id), id))
            .and_then(|alt| {
                let channels = self.nodes[node].channels_to(ctx.graph(), alt)?;
                (hops + channels.len() <= MAX_BEACON_DISTANCE).then_some((alt, channels))
            });
        Self::send(ctx, FlareMessage::BeaconAck { from: node, to: from, alternative });
    }

    fn beacon_ack(
        &mut self,
        ctx: &mut Context,
        from: NodeId,
        node: NodeId,
        alternative: Option<(NodeId, Vec<Rc<Channel>>)>,
    ) {
        if let Some((alt, channels)) = alternative {
            for ch in channels {
                self.nodes[node].set_channel(ch);
            }
            if let Some(path) = self.nodes[node].path_to(ctx.graph(), alt) {
                let excluded = self.nodes[node].beacons.iter().map(|b| b.id).collect();
                Self::send(ctx, FlareMessage::BeaconRequest { from: node, to: alt, hops: path.len(), excluded });
            }
            return;
        }
        // only nodes within the known neighborhood become beacons
        if !self.nodes[node].nodes.contains(&from) {
            return;
        }
        let distance = self.distance(from, node);
        if self.nodes[node].adopt_beacon(from, distance) {
            trace!("node {} adopts beacon {}", node, from);
        }
    }

    /// Subscribes every node to its beacons and the nodes on the way there.
    fn tick_subscribe(&mut self, ctx: &mut Context) {
        for node in 0..self.nodes.len() {
            let lg = &self.nodes[node];
            let wanted: IndexSet<NodeId> = lg
                .beacons
                .iter()
                .filter_map(|b| lg.path_to(ctx.graph(), b.id))
                .flatten()
                .filter(|&n| n != node)
                .collect();
            for &old in lg.subscribed.iter().filter(|n| !wanted.contains(*n)) {
                Self::send(ctx, FlareMessage::Unsubscribe { from: node, to: old });
            }
            for &new in wanted.iter().filter(|n| !lg.subscribed.contains(*n)) {
                Self::send(ctx, FlareMessage::Subscribe { from: node, to: new });
            }
            self.nodes[node].subscribed = wanted.into_iter().collect();
        }
        ctx.schedule_after(SUBSCRIBE_INTERVAL, Event::Routing(RoutingEvent::Flare(FlareMessage::TickSubscribe)));
    }

    fn subscribe(&mut self, ctx: &mut Context, from: NodeId, node: NodeId) {
        let lg = &mut self.nodes[node];
        if !lg.subscribers.contains(&from) {
            lg.subscribers.push(from);
        }
        // the subscriber learns our own channels right away
        let own: Vec<Rc<Channel>> = lg.channels.values().filter(|ch| ch.connects(node)).cloned().collect();
        for channel in own {
            Self::send(ctx, FlareMessage::DynamicInfo { from: node, to: from, channel });
        }
    }

    /// Searches once more with the beacon's channels; selects after the last answer.
    fn channel_states(&mut self, ctx: &mut Context, node: NodeId, payment: PaymentId, channels: &[ChannelId]) {
        let target = ctx.payment(payment).target();
        let Some(query) = self.queries.get_mut(&payment) else {
            return;
        };
        query.channels.extend(channels.iter().copied());
        if let Some(path) = hop_path(ctx.graph(), node, target, |ch| query.channels.contains(&ch)) {
            ctx.payment_mut(payment).add_path(path);
        }
        query.outstanding -= 1;
        if query.outstanding == 0 {
            self.queries.shift_remove(&payment);
            pcn_payment::select_routes(ctx, payment);
        }
    }

    fn handle(&mut self, ctx: &mut Context, message: FlareMessage) {
        match message {
            FlareMessage::TickUpdates { node } => self.tick_updates(ctx, node),
            FlareMessage::NeighborUpdate { to, updates, .. } => {
                for update in updates.iter() {
                    self.nodes[to].add_update(update);
                }
                Self::schedule_tick_updates(ctx, to, FORWARD_DELAY);
            }
            FlareMessage::TickBeacons => self.tick_beacons(ctx),
            FlareMessage::TickSubscribe => self.tick_subscribe(ctx),
            FlareMessage::BeaconRequest { from, to, hops, excluded } => {
                self.beacon_request(ctx, from, to, hops, &excluded)
            }
            FlareMessage::BeaconAck { from, to, alternative } => self.beacon_ack(ctx, from, to, alternative),
            FlareMessage::Subscribe { from, to } => self.subscribe(ctx, from, to),
            FlareMessage::Unsubscribe { from, to } => self.nodes[to].subscribers.retain(|&s| s != from),
            FlareMessage::DynamicInfo { to, channel, .. } => {
                self.nodes[to].set_channel(channel);
            }
            FlareMessage::ChannelStatesRequest { from, to, payment } => {
                let channels = Rc::new(self.nodes[to].channels.keys().copied().collect());
                Self::send(ctx, FlareMessage::ChannelStatesResponse { from: to, to: from, payment, channels });
            }
            FlareMessage::ChannelStatesResponse { to, payment, channels, .. } => {
                self.channel_states(ctx, to, payment, &channels)
            }
        }
    }
}

impl Default for FlareRouting {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingAlgorithm for FlareRouting {
    fn name(&self) -> &'static str {
        "flare"
    }

    fn prepare(&mut self, ctx: &mut Context, mut rng: StdRng) -> SimResult<()> {
        let size = ctx.graph().size();
        self.nodes = (0..size).map(FlareNode::new).collect();
        self.addresses = (0..size).map(|_| rng.gen()).collect();
        self.rng = rng;
        self.queries.clear();
        for channel in 0..ctx.graph().channel_count() {
            self.digest_channel(ctx, channel);
        }
        ctx.schedule_now(Event::Routing(RoutingEvent::Flare(FlareMessage::TickBeacons)));
        ctx.schedule_now(Event::Routing(RoutingEvent::Flare(FlareMessage::TickSubscribe)));
        Ok(())
    }

    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target) = {
            let p = ctx.payment(payment);
            (p.source(), p.target())
        };
        let channels: HashSet<ChannelId> = self.nodes[source]
            .channels
            .keys()
            .chain(self.nodes[target].channels.keys())
            .copied()
            .collect();
        if let Some(path) = hop_path(ctx.graph(), source, target, |ch| channels.contains(&ch)) {
            ctx.payment_mut(payment).add_path(path);
        }

        let beacons: IndexSet<NodeId> = self.nodes[source]
            .beacons
            .iter()
            .chain(self.nodes[target].beacons.iter())
            .map(|b| b.id)
            .collect();
        if beacons.is_empty() {
            pcn_payment::select_routes(ctx, payment);
            return;
        }
        self.queries.insert(payment, Query { channels, outstanding: beacons.len() });
        for beacon in beacons {
            Self::send(ctx, FlareMessage::ChannelStatesRequest { from: source, to: beacon, payment });
        }
    }

    fn handle_event(&mut self, ctx: &mut Context, event: RoutingEvent) {
        if let RoutingEvent::Flare(message) = event {
            self.handle(ctx, message);
        }
    }

    fn on_channel_update(&mut self, ctx: &mut Context, channel: ChannelId) {
        self.digest_channel(ctx, channel);
    }

    /// Channel snapshots are shared, so each node pays for references only.
    fn estimate_storage(&self, _ctx: &Context) -> u64 {
        const REF_SIZE: u64 = 32;
        self.nodes
            .iter()
            .map(|n| {
                let channels = n.channels.len() as u64 * (8 + REF_SIZE);
                let nodes = n.nodes.len() as u64 * 8;
                let peers = (n.beacons.len() + n.subscribers.len() + n.subscribed.len()) as u64 * 16;
                channels + nodes + peers
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::{FeeConfig, RoutingConfig, SimConfig};
    use crate::pcn_engine::Simulation;
    use crate::pcn_interface::PaymentResult;

    fn ring(n: usize) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n {
            g.add_channel(i, (i + 1) % n, 1000, 1000).unwrap();
        }
        g
    }

    fn snapshot(g: &Graph, id: ChannelId, time: SimTime) -> Rc<Channel> {
        Rc::new(g.channel(id).clone().with_timestamp(time))
    }

    #[test]
    fn test_hop_path_respects_allowed_channels() {
        let g = ring(6);
        assert_eq!(hop_path(&g, 0, 2, |_| true), Some(vec![0, 1, 2]));
        assert_eq!(hop_path(&g, 0, 2, |ch| ch != 1), Some(vec![0, 5, 4, 3, 2]));
        assert_eq!(hop_path(&g, 0, 2, |ch| ch == 0), None);
    }

    #[test]
    fn test_updates_travel_within_radius() {
        let g = ring(6);
        let mut node = FlareNode::new(0);
        node.add_update(&ChannelStateUpdate { channel: snapshot(&g, 0, 1.0), ttl: 2 });
        assert!(node.knows_channel(0));
        assert_eq!(node.pending.len(), 1);
        assert_eq!(node.pending[0].ttl, 1);

        // last hop: stored, not passed on
        node.add_update(&ChannelStateUpdate { channel: snapshot(&g, 1, 1.0), ttl: 1 });
        assert!(node.knows_channel(1));
        assert_eq!(node.pending.len(), 1);

        // older copies are dropped
        node.add_update(&ChannelStateUpdate { channel: snapshot(&g, 0, 0.5), ttl: 2 });
        assert_eq!(node.pending.len(), 1);
        assert_eq!(node.channels[&0].timestamp(), 1.0);
        assert_eq!(node.nodes.len(), 3);
    }

    #[test]
    fn test_beacon_places_are_bounded() {
        let mut node = FlareNode::new(0);
        for (id, distance) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
            assert!(node.adopt_beacon(id, distance));
        }
        assert!(!node.adopt_beacon(3, 1));
        assert!(!node.adopt_beacon(6, 60));
        assert!(node.adopt_beacon(7, 15));
        let ids: Vec<NodeId> = node.beacons().iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 7, 3, 4, 5]);
    }

    #[test]
    fn test_payment_over_gossiped_neighborhood() {
        let config = SimConfig {
            routing: RoutingConfig::Flare,
            fees: FeeConfig::Constant { base: 0, rate: 0 },
            max_run_time: 30.0,
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(config, ring(8));
        // source and target together know every channel of the ring
        let p = sim.schedule_payment(20.0, 0, 4, 100);
        sim.start(5).unwrap();

        let ctx = sim.context();
        assert_eq!(ctx.payment(p).result(), PaymentResult::Success);
        assert_eq!(ctx.route(ctx.payment(p).routes().unwrap()[0]).len(), 5);
        assert!(sim.routing().estimate_storage(ctx) > 0);
    }

    #[test]
    fn test_far_payment_resolves() {
        let config = SimConfig {
            routing: RoutingConfig::Flare,
            fees: FeeConfig::Constant { base: 0, rate: 0 },
            max_run_time: 90.0,
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(config, ring(16));
        let p = sim.schedule_payment(70.0, 0, 8, 100);
        sim.start(5).unwrap();
        assert!(sim.context().payment(p).result().is_final());
    }
}
