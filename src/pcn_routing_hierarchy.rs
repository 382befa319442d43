//! Self-organizing landmark hierarchy.
//!
//! Every node is a landmark of some level. A node looks for a parent one
//! level up within `2^level` hops and takes the address of its parent plus
//! the child slot it was given. Landmarks announce themselves to everything
//! within `2^(level+1)` hops; receivers keep one entry per landmark with the
//! neighbor the freshest announcement came from. A payment walks from the
//! source towards the longest known prefix of the target's address.
//!
//! Periodic management at each node forwards what changed, promotes a
//! parentless node if it is the smallest unsatisfied candidate of its level,
//! and demotes a childless one into a peer's subtree.

use crate::pcn_engine::Context;
use crate::pcn_error::SimResult;
use crate::pcn_events::{Event, RoutingEvent};
use crate::pcn_interface::{NodeId, PaymentId, SimTime};
use crate::pcn_payment;
use crate::pcn_routing::RoutingAlgorithm;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

/// A closer parent must beat the current one by more than this many hops.
const HYSTERESIS: u32 = 1;
const ADOPTION_COOLDOWN: SimTime = 5.0;
pub const MAX_CHILDREN: usize = 5;
/// Announcements are repeated at least this often, and entries older than this are dropped.
const HEARTBEAT: SimTime = 100.0;
/// Management of all nodes starts within this window.
const START_JITTER: SimTime = 0.1;

// ============================================================================
// Addresses and announcements
// ============================================================================

/// Root of the tree followed by the child slots leading down to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub root: NodeId,
    pub path: Vec<u8>,
}

impl Address {
    pub fn root(root: NodeId) -> Self {
        Self { root, path: Vec::new() }
    }

    pub fn child(&self, slot: u8) -> Self {
        let mut path = self.path.clone();
        path.push(slot);
        Self { root: self.root, path }
    }

    pub fn prefix(&self, len: usize) -> Self {
        Self {
            root: self.root,
            path: self.path[..len.min(self.path.len())].to_vec(),
        }
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.root)?;
        for slot in &self.path {
            write!(f, "{:x}", slot)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkUpdate {
    pub source: NodeId,
    pub address: Address,
    pub level: usize,
    /// Remaining forwards.
    pub ttl: u32,
    /// Whether the source has a parent.
    pub satisfied: bool,
    /// Hops travelled.
    pub distance: u32,
    pub free_places: usize,
    /// Increases with every announcement of the source.
    pub version: u64,
    pub timestamp: SimTime,
}

/// What a node knows about another landmark.
#[derive(Debug, Clone)]
struct Entry {
    address: Address,
    level: usize,
    ttl: u32,
    satisfied: bool,
    distance: u32,
    free_places: usize,
    version: u64,
    timestamp: SimTime,
    /// `None` for the node's own entry.
    next_hop: Option<NodeId>,
    /// Neighbors that sent the current version; not flooded back to.
    senders: Vec<NodeId>,
}

// ============================================================================
// Landmark state
// ============================================================================

#[derive(Debug, Clone)]
pub struct Landmark {
    id: NodeId,
    level: usize,
    radius: u32,
    parent: Option<NodeId>,
    slot: Option<u8>,
    address: Address,
    children: [Option<NodeId>; MAX_CHILDREN],
    entries: IndexMap<NodeId, Entry>,
    /// Known addresses and the landmark holding each.
    routes: IndexMap<Address, NodeId>,
    changed_entries: IndexSet<NodeId>,
    last_parent_change: SimTime,
    last_heartbeat: SimTime,
    changed: bool,
    version: u64,
}

impl Landmark {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            level: 0,
            radius: initial_radius(0),
            parent: None,
            slot: None,
            address: Address::root(id),
            children: [None; MAX_CHILDREN],
            entries: IndexMap::new(),
            routes: IndexMap::new(),
            changed_entries: IndexSet::new(),
            last_parent_change: 0.0,
            last_heartbeat: 0.0,
            changed: true,
            version: 0,
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn child_count(&self) -> usize {
        self.children().count()
    }

    pub fn known_landmarks(&self) -> usize {
        self.entries.len()
    }

    /// Neighbor towards the longest known prefix of `address`.
    /// `None` if nothing matches or the match is this node itself.
    pub fn next_hop(&self, address: &Address) -> Option<NodeId> {
        (0..=address.depth()).rev().find_map(|len| {
            let source = self.routes.get(&address.prefix(len))?;
            Some(self.entries.get(source).and_then(|e| e.next_hop))
        })?
    }

    fn max_distance(&self) -> u32 {
        1 << self.level
    }

    fn parent_change_allowed(&self, now: SimTime) -> bool {
        self.last_parent_change + ADOPTION_COOLDOWN < now
    }

    /// Known landmarks of `level` within `2^my_level` hops.
    fn electable(&self, my_level: usize, level: usize) -> impl Iterator<Item = (NodeId, &Entry)> + '_ {
        let max = 1u32 << my_level;
        self.entries
            .iter()
            .filter(move |(_, e)| e.distance <= max && e.level == level)
            .map(|(&id, e)| (id, e))
    }

    fn is_acceptable_parent(&self, source: NodeId, now: SimTime) -> bool {
        let Some(entry) = self.entries.get(&source) else {
            return false;
        };
        if entry.distance > self.max_distance() || entry.level != self.level + 1 || entry.free_places == 0 {
            return false;
        }
        match self.parent.and_then(|p| self.entries.get(&p)) {
            None => self.parent.is_none(),
            Some(current) => {
                entry.distance + HYSTERESIS < current.distance && self.parent_change_allowed(now)
            }
        }
    }

    /// Takes a child into the first free slot and returns the child's address.
    fn add_child(&mut self, child: NodeId) -> Option<(u8, Address)> {
        let slot = self.children.iter().position(Option::is_none)?;
        self.children[slot] = Some(child);
        self.changed = true;
        Some((slot as u8, self.address.child(slot as u8)))
    }

    fn remove_child(&mut self, child: NodeId) {
        for c in self.children.iter_mut() {
            if *c == Some(child) {
                *c = None;
            }
        }
        self.changed = true;
    }

    /// Folds an announcement into the entry of its source.
    /// Returns `false` for versions already seen.
    fn digest(&mut self, msg: &LandmarkUpdate, sender: Option<NodeId>) -> bool {
        let entry = self.entries.entry(msg.source).or_insert_with(|| Entry {
            address: msg.address.clone(),
            level: msg.level,
            ttl: 0,
            satisfied: false,
            distance: u32::MAX,
            free_places: 0,
            version: 0,
            timestamp: msg.timestamp,
            next_hop: None,
            senders: Vec::new(),
        });
        if msg.version == entry.version {
            if let Some(s) = sender {
                if !entry.senders.contains(&s) {
                    entry.senders.push(s);
                }
            }
            return false;
        }
        if msg.version < entry.version {
            return false;
        }

        entry.senders.clear();
        entry.senders.extend(sender);
        entry.level = msg.level;
        entry.free_places = msg.free_places;
        entry.satisfied = msg.satisfied;
        if msg.distance <= entry.distance || sender == entry.next_hop {
            entry.distance = msg.distance;
            entry.next_hop = sender;
            entry.ttl = msg.ttl;
        }
        entry.version = msg.version;
        entry.timestamp = msg.timestamp;

        let old_address = std::mem::replace(&mut entry.address, msg.address.clone());
        if self.routes.get(&old_address) == Some(&msg.source) {
            self.routes.shift_remove(&old_address);
        }
        self.routes.insert(msg.address.clone(), msg.source);
        true
    }

    fn expire(&mut self, before: SimTime) {
        let stale: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|&(&id, e)| id != self.id && e.timestamp < before)
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            if let Some(entry) = self.entries.shift_remove(&id) {
                if self.routes.get(&entry.address) == Some(&id) {
                    self.routes.shift_remove(&entry.address);
                }
            }
            self.changed_entries.shift_remove(&id);
        }
    }
}

fn initial_radius(level: usize) -> u32 {
    1 << (level + 1)
}

/// Consistency of the parent pointers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyReport {
    /// Nodes every parent chain ends at.
    pub roots: Vec<NodeId>,
    /// Parent chains that run into themselves.
    pub cycles: Vec<Vec<NodeId>>,
    pub per_level: BTreeMap<usize, usize>,
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug)]
pub struct LandmarkHierarchyRouting {
    interval: SimTime,
    landmarks: Vec<Landmark>,
}

impl LandmarkHierarchyRouting {
    pub fn new(interval: SimTime) -> Self {
        Self {
            interval,
            landmarks: Vec::new(),
        }
    }

    pub fn landmark(&self, node: NodeId) -> &Landmark {
        &self.landmarks[node]
    }

    /// Follows every parent chain. Problems are reported, never repaired.
    pub fn validate(&self) -> HierarchyReport {
        let mut report = HierarchyReport::default();
        let mut roots = IndexSet::new();
        for subject in 0..self.landmarks.len() {
            let mut path = vec![subject];
            let mut node = subject;
            while let Some(parent) = self.landmarks[node].parent {
                if path.contains(&parent) {
                    report.cycles.push(path.clone());
                    break;
                }
                path.push(parent);
                node = parent;
            }
            roots.insert(node);
            *report.per_level.entry(self.landmarks[subject].level).or_default() += 1;
        }
        report.roots = roots.into_iter().collect();
        report.roots.sort_unstable();
        report
    }

    fn send_update(&mut self, ctx: &mut Context, node: NodeId) {
        let now = ctx.now();
        let lm = &mut self.landmarks[node];
        lm.version += 1;
        let update = LandmarkUpdate {
            source: node,
            address: lm.address.clone(),
            level: lm.level,
            ttl: lm.radius,
            satisfied: lm.parent.is_some(),
            distance: 0,
            free_places: MAX_CHILDREN - lm.child_count(),
            version: lm.version,
            timestamp: now,
        };
        lm.digest(&update, None);
        lm.changed = false;
        lm.last_heartbeat = now;

        let forwarded = LandmarkUpdate { distance: 1, ..update };
        ctx.flood(node, None, |to| {
            Event::Routing(RoutingEvent::LandmarkUpdate {
                from: node,
                to,
                update: Box::new(forwarded.clone()),
            })
        });
    }

    /// Adopts `parent` if it has room. The slot is granted on the spot.
    fn set_parent(&mut self, ctx: &Context, node: NodeId, parent: NodeId) -> bool {
        if parent == node || self.landmarks[node].parent == Some(parent) {
            return false;
        }
        let Some((slot, address)) = self.landmarks[parent].add_child(node) else {
            return false;
        };
        if let Some(old) = self.landmarks[node].parent {
            self.landmarks[old].remove_child(node);
        }
        let lm = &mut self.landmarks[node];
        lm.parent = Some(parent);
        lm.slot = Some(slot);
        lm.address = address;
        lm.last_parent_change = ctx.now();
        lm.changed = true;
        true
    }

    fn clear_parent(&mut self, ctx: &Context, node: NodeId) {
        let lm = &mut self.landmarks[node];
        lm.parent = None;
        lm.slot = None;
        lm.address = Address::root(node);
        lm.last_parent_change = ctx.now();
        lm.radius = initial_radius(lm.level);
        lm.changed = true;
    }

    /// Adopts the closest electable landmark one level up.
    fn find_parent(&mut self, ctx: &Context, node: NodeId) {
        let lm = &self.landmarks[node];
        let candidate = lm
            .electable(lm.level, lm.level + 1)
            .filter(|(_, e)| e.free_places > 0)
            .min_by_key(|&(id, e)| (e.distance, id))
            .map(|(id, _)| id);
        if let Some(parent) = candidate {
            self.set_parent(ctx, node, parent);
        }
    }

    fn promote(&mut self, ctx: &mut Context, node: NodeId) {
        let lm = &mut self.landmarks[node];
        lm.level += 1;
        lm.radius = initial_radius(lm.level);
        lm.children = [None; MAX_CHILDREN];
        debug!("{:.2} landmark {} promoted to level {}", ctx.now(), node, lm.level);
        self.find_parent(ctx, node);
        self.send_update(ctx, node);
    }

    /// Moves under a peer of the same level, if one has room.
    fn demote(&mut self, ctx: &mut Context, node: NodeId) {
        let lm = &self.landmarks[node];
        let candidate = lm
            .electable(lm.level - 1, lm.level)
            .filter(|&(id, e)| id != node && e.free_places > 0)
            .map(|(id, _)| id)
            .min();
        let Some(parent) = candidate else {
            return;
        };
        if self.set_parent(ctx, node, parent) {
            let lm = &mut self.landmarks[node];
            lm.level -= 1;
            lm.radius = initial_radius(lm.level);
            lm.children = [None; MAX_CHILDREN];
            debug!("{:.2} landmark {} demoted to level {}", ctx.now(), node, lm.level);
            self.send_update(ctx, node);
        }
    }

    fn manage(&mut self, ctx: &mut Context, node: NodeId) {
        let now = ctx.now();

        // forward what changed since the last round
        let changed = std::mem::take(&mut self.landmarks[node].changed_entries);
        for source in changed {
            let Some(e) = self.landmarks[node].entries.get(&source) else {
                continue;
            };
            if e.ttl == 0 {
                continue;
            }
            let forwarded = LandmarkUpdate {
                source,
                address: e.address.clone(),
                level: e.level,
                ttl: e.ttl - 1,
                satisfied: e.satisfied,
                distance: e.distance + 1,
                free_places: e.free_places,
                version: e.version,
                timestamp: e.timestamp,
            };
            let senders = e.senders.clone();
            let neighbors: Vec<NodeId> = ctx.graph().neighbors(node).filter(|n| !senders.contains(n)).collect();
            for to in neighbors {
                ctx.send(Event::Routing(RoutingEvent::LandmarkUpdate {
                    from: node,
                    to,
                    update: Box::new(forwarded.clone()),
                }));
            }
        }

        let lm = &self.landmarks[node];
        if lm.parent_change_allowed(now) && lm.level > 0 && lm.child_count() == 0 {
            self.demote(ctx, node);
        }

        let lm = &self.landmarks[node];
        if lm.parent_change_allowed(now) && lm.parent.is_none() {
            let level = lm.level;
            let peers = lm.electable(level, level).count();
            let higher = lm.entries.values().any(|e| e.level > level);
            if peers < 2 && !higher {
                // top of the hierarchy
                self.send_update(ctx, node);
            } else {
                let smallest = lm
                    .electable(level, level)
                    .filter(|(_, e)| !e.satisfied)
                    .map(|(id, _)| id)
                    .min()
                    .unwrap_or(node);
                if smallest == node {
                    self.promote(ctx, node);
                }
            }
        }

        let lm = &self.landmarks[node];
        if lm.changed || now - lm.last_heartbeat > HEARTBEAT {
            self.send_update(ctx, node);
            self.landmarks[node].expire(now - HEARTBEAT);
        }
    }

    fn receive(&mut self, ctx: &mut Context, node: NodeId, from: NodeId, msg: LandmarkUpdate) {
        if msg.source == node {
            return;
        }
        let lm = &mut self.landmarks[node];
        if !lm.digest(&msg, Some(from)) {
            return;
        }
        lm.changed_entries.insert(msg.source);

        if lm.parent == Some(msg.source) {
            if msg.level != lm.level + 1 {
                // the parent moved to another level
                self.clear_parent(ctx, node);
                self.find_parent(ctx, node);
                self.send_update(ctx, node);
            } else if let Some(slot) = lm.slot {
                let address = msg.address.child(slot);
                if lm.address != address {
                    lm.address = address;
                    lm.changed = true;
                }
            }
        }

        let now = ctx.now();
        let lm = &self.landmarks[node];
        if lm.parent != Some(msg.source)
            && lm.is_acceptable_parent(msg.source, now)
            && self.set_parent(ctx, node, msg.source)
        {
            self.send_update(ctx, node);
        }
    }
}

impl RoutingAlgorithm for LandmarkHierarchyRouting {
    fn name(&self) -> &'static str {
        "landmark hierarchy"
    }

    fn prepare(&mut self, ctx: &mut Context, mut rng: StdRng) -> SimResult<()> {
        self.landmarks = (0..ctx.graph().size()).map(Landmark::new).collect();
        for node in 0..self.landmarks.len() {
            let offset = START_JITTER * rng.gen::<f64>();
            ctx.schedule_after(offset, Event::Routing(RoutingEvent::HierarchyManage { node }));
        }
        Ok(())
    }

    /// Walks hop by hop towards the target's address.
    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target) = {
            let p = ctx.payment(payment);
            (p.source(), p.target())
        };
        let address = self.landmarks[target].address.clone();
        let mut path = vec![source];
        let mut node = source;
        while node != target {
            let Some(next) = self.landmarks[node].next_hop(&address) else {
                break;
            };
            if path.contains(&next) || ctx.graph().channel_between(node, next).is_none() {
                break;
            }
            path.push(next);
            node = next;
        }
        if node == target {
            ctx.payment_mut(payment).add_path(path);
        }
        pcn_payment::select_routes(ctx, payment);
    }

    fn handle_event(&mut self, ctx: &mut Context, event: RoutingEvent) {
        match event {
            RoutingEvent::HierarchyManage { node } => {
                self.manage(ctx, node);
                ctx.complete(Event::Routing(RoutingEvent::HierarchyManage { node }));
                ctx.schedule_after(self.interval, Event::Routing(RoutingEvent::HierarchyManage { node }));
            }
            RoutingEvent::LandmarkUpdate { from, to, update } => self.receive(ctx, to, from, *update),
            _ => {}
        }
    }

    /// Management and routing tables of all nodes.
    fn estimate_storage(&self, _ctx: &Context) -> u64 {
        self.landmarks
            .iter()
            .map(|lm| {
                let entries = lm.entries.len() * std::mem::size_of::<Entry>();
                let routes = lm.routes.len() * (std::mem::size_of::<Address>() + 8);
                (entries + routes + std::mem::size_of::<Landmark>()) as u64
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::{FeeConfig, RoutingConfig, SimConfig};
    use crate::pcn_engine::Simulation;
    use crate::pcn_graph::Graph;
    use rand::SeedableRng;

    fn line(n: usize) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n - 1 {
            g.add_channel(i, i + 1, 1000, 1000).unwrap();
        }
        g
    }

    fn announcement(source: NodeId, level: usize, version: u64) -> LandmarkUpdate {
        LandmarkUpdate {
            source,
            address: Address::root(source),
            level,
            ttl: 4,
            satisfied: false,
            distance: 1,
            free_places: MAX_CHILDREN,
            version,
            timestamp: 0.0,
        }
    }

    fn deliver(routing: &mut LandmarkHierarchyRouting, ctx: &mut Context, from: NodeId, to: NodeId, update: LandmarkUpdate) {
        routing.handle_event(ctx, RoutingEvent::LandmarkUpdate { from, to, update: Box::new(update) });
    }

    fn prepared(n: usize) -> (LandmarkHierarchyRouting, Context) {
        let mut ctx = Context::new(SimConfig::default(), line(n));
        let mut routing = LandmarkHierarchyRouting::new(1.0);
        routing.prepare(&mut ctx, StdRng::seed_from_u64(3)).unwrap();
        (routing, ctx)
    }

    #[test]
    fn test_address_prefixes() {
        let a = Address::root(7).child(2).child(11);
        assert_eq!(a.to_string(), "7:2b");
        assert_eq!(a.prefix(1), Address::root(7).child(2));
        assert_eq!(a.prefix(0), Address::root(7));
        assert_eq!(a.prefix(9), a);
    }

    #[test]
    fn test_adopts_parent_one_level_up() {
        let (mut routing, mut ctx) = prepared(3);
        let before = ctx.pending_events();
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 1, 1));

        let lm = routing.landmark(0);
        assert_eq!(lm.parent(), Some(1));
        assert_eq!(lm.address(), &Address::root(1).child(0));
        assert_eq!(routing.landmark(1).children().collect::<Vec<_>>(), vec![0]);
        assert_eq!(lm.next_hop(&Address::root(1)), Some(1));
        assert_eq!(lm.next_hop(&Address::root(1).child(3)), Some(1));
        assert_eq!(lm.next_hop(&Address::root(2)), None);
        // the new child announces itself to its only neighbor
        assert_eq!(ctx.pending_events(), before + 1);
    }

    #[test]
    fn test_same_level_is_no_parent() {
        let (mut routing, mut ctx) = prepared(3);
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 0, 1));
        assert_eq!(routing.landmark(0).parent(), None);
        assert_eq!(routing.landmark(0).known_landmarks(), 1);
    }

    #[test]
    fn test_stale_and_duplicate_versions_ignored() {
        let (mut routing, mut ctx) = prepared(3);
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 1, 2));
        assert_eq!(routing.landmark(0).parent(), Some(1));

        // an older announcement claiming another level changes nothing
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 4, 1));
        assert_eq!(routing.landmark(0).parent(), Some(1));
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 4, 2));
        assert_eq!(routing.landmark(0).parent(), Some(1));
    }

    #[test]
    fn test_parent_changing_level_is_dropped() {
        let (mut routing, mut ctx) = prepared(3);
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 1, 1));
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 2, 2));
        let lm = routing.landmark(0);
        assert_eq!(lm.parent(), None);
        assert_eq!(lm.address(), &Address::root(0));
    }

    #[test]
    fn test_child_follows_parent_address() {
        let (mut routing, mut ctx) = prepared(3);
        deliver(&mut routing, &mut ctx, 1, 0, announcement(1, 1, 1));
        let moved = LandmarkUpdate {
            address: Address::root(2).child(4),
            ..announcement(1, 1, 2)
        };
        deliver(&mut routing, &mut ctx, 1, 0, moved);
        assert_eq!(routing.landmark(0).address(), &Address::root(2).child(4).child(0));
    }

    #[test]
    fn test_full_parent_refuses() {
        let (mut routing, mut ctx) = prepared(8);
        for child in [0, 2] {
            for _ in 0..MAX_CHILDREN {
                routing.landmarks[1].add_child(7);
            }
            deliver(&mut routing, &mut ctx, 1, child, announcement(1, 1, 1));
            assert_eq!(routing.landmark(child).parent(), None);
        }
    }

    #[test]
    fn test_hierarchy_runs_and_validates() {
        let config = SimConfig {
            routing: RoutingConfig::LandmarkHierarchy { interval: 1.0 },
            fees: FeeConfig::Constant { base: 0, rate: 0 },
            max_run_time: 40.0,
            ..SimConfig::default()
        };
        let mut g = line(10);
        g.add_channel(0, 9, 1000, 1000).unwrap();
        let mut sim = Simulation::new(config, g);
        sim.schedule_payment(35.0, 2, 7, 10);
        sim.start(12).unwrap();

        assert!(sim.routing().estimate_storage(sim.context()) > 0);
        assert!(sim.context().payment(0).result().is_final());
    }

    #[test]
    fn test_validate_reports_cycles() {
        let (mut routing, _) = prepared(4);
        routing.landmarks[0].parent = Some(1);
        routing.landmarks[1].parent = Some(0);
        routing.landmarks[2].parent = Some(3);
        routing.landmarks[3].level = 1;
        let report = routing.validate();
        assert_eq!(report.roots, vec![0, 1, 3]);
        assert_eq!(report.cycles, vec![vec![0, 1], vec![1, 0]]);
        assert_eq!(report.per_level.get(&0), Some(&3));
        assert_eq!(report.per_level.get(&1), Some(&1));
    }
}
