//! Channel graph: nodes, bidirectional channels and their per-direction state.
//!
//! The graph owns every `Node` and `Channel`. Everything else refers to them by
//! index. Indices are stable for the duration of a run; only the compaction
//! helpers (`remove_nodes`, `remove_channels`) renumber, and they are meant to be
//! used while a topology is being set up.

use crate::pcn_error::{SimError, SimResult};
use crate::pcn_interface::{
    Amount, ChannelId, NodeId, Role, SimTime, Timelock, DEFAULT_MIN_TIMELOCK_DELTA,
    TIMESTAMP_EPSILON,
};
use hashbrown::HashMap;

/// Base fee a fresh channel charges, in thousandths of a unit.
pub const DEFAULT_BASE_FEE: Amount = 1000;
/// Proportional fee a fresh channel charges, in millionths.
pub const DEFAULT_FEE_RATE: Amount = 2;

// ============================================================================
// Channel
// ============================================================================

/// State of one direction of a channel, i.e. payments sent from one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSide {
    /// Funds the endpoint can still send.
    pub capacity: Amount,
    /// Fixed fee, in thousandths of a unit.
    pub base_fee: Amount,
    /// Proportional fee, in millionths of the forwarded amount.
    pub fee_rate: Amount,
    /// Smallest amount accepted in this direction.
    pub htlc_min: Amount,
    /// Amounts must stay strictly below this.
    pub htlc_max: Amount,
    pub timelock_delta: Timelock,
    pub disabled: bool,
}

impl ChannelSide {
    fn new(capacity: Amount) -> Self {
        Self {
            capacity,
            base_fee: DEFAULT_BASE_FEE,
            fee_rate: DEFAULT_FEE_RATE,
            htlc_min: 0,
            htlc_max: Amount::MAX,
            timelock_delta: 1,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: ChannelId,
    node1: NodeId,
    node2: NodeId,
    sides: [ChannelSide; 2],
    /// Freshness of this copy, compared when gossiped copies conflict.
    timestamp: SimTime,
}

impl Channel {
    pub fn new(id: ChannelId, node1: NodeId, node2: NodeId, capacity1: Amount, capacity2: Amount) -> Self {
        Self {
            id,
            node1,
            node2,
            sides: [ChannelSide::new(capacity1), ChannelSide::new(capacity2)],
            timestamp: 0.0,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn node1(&self) -> NodeId {
        self.node1
    }

    pub fn node2(&self) -> NodeId {
        self.node2
    }

    pub fn other_node(&self, node: NodeId) -> NodeId {
        if node == self.node1 {
            self.node2
        } else {
            self.node1
        }
    }

    pub fn connects(&self, node: NodeId) -> bool {
        node == self.node1 || node == self.node2
    }

    fn side_index(&self, sender: NodeId) -> usize {
        if sender == self.node1 {
            0
        } else {
            1
        }
    }

    pub fn side(&self, sender: NodeId) -> &ChannelSide {
        &self.sides[self.side_index(sender)]
    }

    pub fn side_mut(&mut self, sender: NodeId) -> &mut ChannelSide {
        let i = self.side_index(sender);
        &mut self.sides[i]
    }

    /// Total funds locked in the channel.
    pub fn capacity(&self) -> Amount {
        self.sides[0].capacity + self.sides[1].capacity
    }

    pub fn capacity_of(&self, sender: NodeId) -> Amount {
        self.side(sender).capacity
    }

    pub fn capacity1(&self) -> Amount {
        self.sides[0].capacity
    }

    pub fn capacity2(&self) -> Amount {
        self.sides[1].capacity
    }

    /// 0 for a perfectly balanced channel, 1 when all funds sit on one side.
    pub fn imbalance(&self) -> f64 {
        let total = self.capacity();
        if total == 0 {
            return 0.0;
        }
        2.0 * (0.5 - self.capacity1() as f64 / total as f64).abs()
    }

    pub fn base_fee(&self, sender: NodeId) -> Amount {
        self.side(sender).base_fee
    }

    pub fn fee_rate(&self, sender: NodeId) -> Amount {
        self.side(sender).fee_rate
    }

    /// Fee charged for forwarding `amount` from `sender`, rounded up.
    pub fn fee(&self, sender: NodeId, amount: Amount) -> Amount {
        let side = self.side(sender);
        (side.base_fee + amount * side.fee_rate + 999) / 1000
    }

    /// Minimum timelock delta demanded per hop.
    pub fn min_timelock_delta(&self) -> Timelock {
        DEFAULT_MIN_TIMELOCK_DELTA
    }

    /// Whether `sender` can push `amount` (before this channel's fee) through.
    pub fn can_pay(&self, sender: NodeId, amount: Amount) -> bool {
        let side = self.side(sender);
        amount > 0
            && amount >= side.htlc_min
            && amount < side.htlc_max
            && !side.disabled
            && amount + self.fee(sender, amount) <= side.capacity
    }

    pub fn timestamp(&self) -> SimTime {
        self.timestamp
    }

    pub fn with_timestamp(mut self, time: SimTime) -> Self {
        self.timestamp = time;
        self
    }

    pub fn is_newer_than(&self, other: &Channel) -> bool {
        self.timestamp - other.timestamp > TIMESTAMP_EPSILON
    }

    // ===== Mutators =====

    pub fn set_capacities(&mut self, capacity1: Amount, capacity2: Amount) {
        self.sides[0].capacity = capacity1;
        self.sides[1].capacity = capacity2;
    }

    /// Sets all four fee values and reports whether any of them changed.
    pub fn set_fees(&mut self, base1: Amount, base2: Amount, rate1: Amount, rate2: Amount) -> bool {
        let changed = self.sides[0].base_fee != base1
            || self.sides[1].base_fee != base2
            || self.sides[0].fee_rate != rate1
            || self.sides[1].fee_rate != rate2;
        self.sides[0].base_fee = base1;
        self.sides[1].base_fee = base2;
        self.sides[0].fee_rate = rate1;
        self.sides[1].fee_rate = rate2;
        changed
    }

    pub fn set_timelock_deltas(&mut self, delta1: Timelock, delta2: Timelock) {
        self.sides[0].timelock_delta = delta1;
        self.sides[1].timelock_delta = delta2;
    }

    /// A maximum of zero means unlimited.
    pub fn set_htlc_limits(&mut self, min1: Amount, min2: Amount, max1: Amount, max2: Amount) {
        self.sides[0].htlc_min = min1;
        self.sides[1].htlc_min = min2;
        self.sides[0].htlc_max = if max1 > 0 { max1 } else { Amount::MAX };
        self.sides[1].htlc_max = if max2 > 0 { max2 } else { Amount::MAX };
    }

    pub fn set_disabled(&mut self, dir12: bool, dir21: bool) {
        self.sides[0].disabled = dir12;
        self.sides[1].disabled = dir21;
    }

    /// Takes `amount` away from the `node` side.
    pub fn debit(&mut self, node: NodeId, amount: Amount) {
        let id = self.id;
        let side = self.side_mut(node);
        assert!(
            side.capacity >= amount,
            "channel {} side {} would go negative",
            id,
            node
        );
        side.capacity -= amount;
    }

    /// Adds `amount` to the `node` side.
    pub fn credit(&mut self, node: NodeId, amount: Amount) {
        self.side_mut(node).capacity += amount;
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<>{}", self.node1, self.node2)
    }
}

// ============================================================================
// Node
// ============================================================================

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    role: Role,
    channels: Vec<ChannelId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    /// Incident channels, in the order they were opened.
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn degree(&self) -> usize {
        self.channels.len()
    }
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    channels: Vec<Channel>,
    pairs: HashMap<(NodeId, NodeId), ChannelId>,
    /// Channels whose balance moved since the last drain.
    updated: Vec<ChannelId>,
}

fn pair_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with `count` bridge nodes and no channels.
    pub fn with_nodes(count: usize) -> Self {
        let mut g = Self::new();
        for _ in 0..count {
            g.add_node(Role::Bridge);
        }
        g
    }

    pub fn add_node(&mut self, role: Role) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node { id, role, channels: Vec::new() });
        id
    }

    pub fn add_channel(
        &mut self,
        node1: NodeId,
        node2: NodeId,
        capacity1: Amount,
        capacity2: Amount,
    ) -> SimResult<ChannelId> {
        for n in [node1, node2] {
            if n >= self.nodes.len() {
                return Err(SimError::UnknownNode(n));
            }
        }
        if node1 == node2 {
            return Err(SimError::SelfChannel(node1));
        }
        let key = pair_key(node1, node2);
        if self.pairs.contains_key(&key) {
            return Err(SimError::DuplicateChannel(node1, node2));
        }
        let id = self.channels.len();
        self.channels.push(Channel::new(id, node1, node2, capacity1, capacity2));
        self.nodes[node1].channels.push(id);
        self.nodes[node2].channels.push(id);
        self.pairs.insert(key, id);
        Ok(id)
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id]
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub fn channel_between(&self, a: NodeId, b: NodeId) -> Option<ChannelId> {
        self.pairs.get(&pair_key(a, b)).copied()
    }

    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node]
            .channels
            .iter()
            .map(move |&ch| self.channels[ch].other_node(node))
    }

    pub fn nodes_with_role(&self, role: Role) -> Vec<NodeId> {
        self.nodes.iter().filter(|n| n.role == role).map(|n| n.id).collect()
    }

    pub fn set_role(&mut self, node: NodeId, role: Role) {
        self.nodes[node].role = role;
    }

    pub fn total_capacity(&self) -> Amount {
        self.channels.iter().map(Channel::capacity).sum()
    }

    // ===== Channel update notifications =====

    /// Records that the balance of `channel` moved.
    pub fn channel_updated(&mut self, channel: ChannelId) {
        self.updated.push(channel);
    }

    pub fn take_updates(&mut self) -> Vec<ChannelId> {
        std::mem::take(&mut self.updated)
    }

    // ===== Compaction =====

    /// Removes channels and renumbers the remaining ones densely.
    pub fn remove_channels(&mut self, ids: &[ChannelId]) {
        let doomed: hashbrown::HashSet<ChannelId> = ids.iter().copied().collect();
        if doomed.is_empty() {
            return;
        }
        let old = std::mem::take(&mut self.channels);
        let mut remap = vec![None; old.len()];
        for ch in old {
            if doomed.contains(&ch.id) {
                continue;
            }
            remap[ch.id] = Some(self.channels.len());
            let mut ch = ch;
            ch.id = self.channels.len();
            self.channels.push(ch);
        }
        for node in &mut self.nodes {
            node.channels = node.channels.iter().filter_map(|&c| remap[c]).collect();
        }
        self.updated.clear();
        self.rebuild_pairs();
    }

    /// Removes nodes together with their channels and renumbers both.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) {
        let doomed: hashbrown::HashSet<NodeId> = ids.iter().copied().collect();
        if doomed.is_empty() {
            return;
        }
        let dropped_channels: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|ch| doomed.contains(&ch.node1) || doomed.contains(&ch.node2))
            .map(|ch| ch.id)
            .collect();
        self.remove_channels(&dropped_channels);

        let old = std::mem::take(&mut self.nodes);
        let mut remap = vec![None; old.len()];
        for mut node in old {
            if doomed.contains(&node.id) {
                continue;
            }
            remap[node.id] = Some(self.nodes.len());
            node.id = self.nodes.len();
            self.nodes.push(node);
        }
        for ch in &mut self.channels {
            // surviving channels only touch surviving nodes
            ch.node1 = remap[ch.node1].unwrap_or(ch.node1);
            ch.node2 = remap[ch.node2].unwrap_or(ch.node2);
        }
        self.rebuild_pairs();
    }

    fn rebuild_pairs(&mut self) {
        self.pairs = self
            .channels
            .iter()
            .map(|ch| (pair_key(ch.node1, ch.node2), ch.id))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, cap: Amount) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n - 1 {
            g.add_channel(i, i + 1, cap, cap).unwrap();
        }
        g
    }

    #[test]
    fn test_fee_rounds_up() {
        let ch = Channel::new(0, 0, 1, 100, 100);
        // 1000/1000 + 50*2/1000 = 1.1 -> 2
        assert_eq!(ch.fee(0, 50), 2);

        let mut ch = ch;
        ch.set_fees(0, 0, 0, 0);
        assert_eq!(ch.fee(0, 50), 0);
        ch.set_fees(0, 0, 1, 1);
        assert_eq!(ch.fee(1, 1000), 1);
        assert_eq!(ch.fee(1, 1001), 2);
    }

    #[test]
    fn test_can_pay_conditions() {
        let mut ch = Channel::new(0, 0, 1, 100, 0);
        ch.set_fees(0, 0, 0, 0);
        assert!(ch.can_pay(0, 100));
        assert!(!ch.can_pay(0, 101));
        assert!(!ch.can_pay(0, 0));
        assert!(!ch.can_pay(1, 1));

        ch.set_htlc_limits(10, 0, 50, 0);
        assert!(!ch.can_pay(0, 9));
        assert!(ch.can_pay(0, 49));
        assert!(!ch.can_pay(0, 50));

        ch.set_htlc_limits(0, 0, 0, 0);
        ch.set_disabled(true, false);
        assert!(!ch.can_pay(0, 10));
    }

    #[test]
    fn test_can_pay_includes_fee() {
        let ch = Channel::new(0, 0, 1, 100, 100);
        // fee for 98 is ceil(1 + 0.196) = 2
        assert!(ch.can_pay(0, 98));
        assert!(!ch.can_pay(0, 99));
    }

    #[test]
    fn test_set_fees_detects_every_field() {
        let mut ch = Channel::new(0, 0, 1, 0, 0);
        assert!(!ch.set_fees(DEFAULT_BASE_FEE, DEFAULT_BASE_FEE, DEFAULT_FEE_RATE, DEFAULT_FEE_RATE));
        assert!(ch.set_fees(DEFAULT_BASE_FEE, 7, DEFAULT_FEE_RATE, DEFAULT_FEE_RATE));
        assert!(ch.set_fees(DEFAULT_BASE_FEE, 7, DEFAULT_FEE_RATE, 9));
        assert!(!ch.set_fees(DEFAULT_BASE_FEE, 7, DEFAULT_FEE_RATE, 9));
    }

    #[test]
    fn test_imbalance_and_freshness() {
        let ch = Channel::new(0, 0, 1, 75, 25);
        assert!((ch.imbalance() - 0.5).abs() < 1e-9);
        assert_eq!(Channel::new(0, 0, 1, 0, 0).imbalance(), 0.0);

        let old = ch.clone().with_timestamp(1.0);
        let same = ch.clone().with_timestamp(1.004);
        let new = ch.with_timestamp(1.01);
        assert!(new.is_newer_than(&old));
        assert!(!same.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
    }

    #[test]
    fn test_debit_credit_conserve() {
        let mut ch = Channel::new(0, 0, 1, 60, 40);
        ch.debit(0, 30);
        ch.credit(1, 30);
        assert_eq!(ch.capacity_of(0), 30);
        assert_eq!(ch.capacity_of(1), 70);
        assert_eq!(ch.capacity(), 100);
    }

    #[test]
    #[should_panic]
    fn test_debit_below_zero_panics() {
        let mut ch = Channel::new(0, 0, 1, 10, 0);
        ch.debit(0, 11);
    }

    #[test]
    fn test_add_channel_rejects_bad_input() {
        let mut g = Graph::with_nodes(3);
        g.add_channel(0, 1, 5, 5).unwrap();
        assert!(matches!(g.add_channel(1, 0, 5, 5), Err(SimError::DuplicateChannel(1, 0))));
        assert!(matches!(g.add_channel(2, 2, 5, 5), Err(SimError::SelfChannel(2))));
        assert!(matches!(g.add_channel(0, 9, 5, 5), Err(SimError::UnknownNode(9))));
        assert_eq!(g.channel_between(1, 0), Some(0));
        assert_eq!(g.channel_between(0, 2), None);
    }

    #[test]
    fn test_node_channels_reference_node() {
        let g = line(5, 10);
        for node in g.nodes() {
            for &ch in node.channels() {
                assert!(g.channel(ch).connects(node.id()));
            }
        }
        assert_eq!(g.neighbors(2).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_remove_nodes_renumbers() {
        let mut g = line(5, 10);
        g.set_role(4, Role::Consumer);
        g.remove_nodes(&[1]);

        assert_eq!(g.size(), 4);
        assert_eq!(g.channel_count(), 2);
        // old 2-3 and 3-4 are now 1-2 and 2-3
        assert_eq!(g.channel_between(1, 2), Some(0));
        assert_eq!(g.channel_between(2, 3), Some(1));
        assert_eq!(g.node(3).role(), Role::Consumer);
        for (i, ch) in g.channels().iter().enumerate() {
            assert_eq!(ch.id(), i);
        }
        for node in g.nodes() {
            for &ch in node.channels() {
                assert!(g.channel(ch).connects(node.id()));
            }
        }
        assert!(g.node(0).channels().is_empty());
    }

    #[test]
    fn test_update_notifications_drain() {
        let mut g = line(3, 10);
        g.channel_updated(1);
        g.channel_updated(0);
        assert_eq!(g.take_updates(), vec![1, 0]);
        assert!(g.take_updates().is_empty());
    }
}
