//! Source routing over a gossiped copy of the graph.
//!
//! Every node keeps its own view of all channels. A channel whose fees change
//! is announced to its two endpoints; every broadcast epoch each node floods
//! what it learned since the last epoch to its neighbors. Paths are searched
//! on the sender's view only, so balances are as stale as the last fee
//! announcement.

use crate::pcn_engine::Context;
use crate::pcn_error::SimResult;
use crate::pcn_events::{Event, RoutingEvent};
use crate::pcn_graph::Channel;
use crate::pcn_interface::{ChannelId, NodeId, PaymentId, SimTime};
use crate::pcn_payment;
use crate::pcn_routing::{path_channels, ChannelView, PathSearch, RoutingAlgorithm};
use hashbrown::HashSet;
use indexmap::IndexMap;
use log::debug;
use rand::rngs::StdRng;
use std::rc::Rc;

/// One node's view of the graph.
#[derive(Debug, Clone, Default)]
pub struct LocalGraph {
    /// Indexed by channel id. Snapshots are shared between views until replaced.
    channels: Vec<Rc<Channel>>,
    /// Learned since the last epoch, forwarded on the next one.
    pending: IndexMap<ChannelId, Rc<Channel>>,
}

impl LocalGraph {
    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id]
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Takes over every channel newer than the known one.
    fn merge(&mut self, channels: &[Rc<Channel>]) {
        for ch in channels {
            let id = ch.id();
            if ch.is_newer_than(&self.channels[id]) {
                self.channels[id] = ch.clone();
                self.pending.insert(id, ch.clone());
            }
        }
    }
}

impl ChannelView for LocalGraph {
    fn view(&self, id: ChannelId) -> &Channel {
        self.channel(id)
    }
}

#[derive(Debug)]
pub struct SourceGraphRouting {
    broadcast_interval: SimTime,
    path_count: usize,
    views: Vec<LocalGraph>,
    search: PathSearch,
}

impl SourceGraphRouting {
    pub fn new(broadcast_interval: SimTime, path_count: usize) -> Self {
        Self {
            broadcast_interval,
            path_count,
            views: Vec::new(),
            search: PathSearch::new(),
        }
    }

    pub fn view(&self, node: NodeId) -> &LocalGraph {
        &self.views[node]
    }

    fn send_update(ctx: &mut Context, from: NodeId, to: NodeId, channels: Rc<Vec<Rc<Channel>>>) {
        ctx.send(Event::Routing(RoutingEvent::ChannelUpdate { from, to, channels }));
    }

    fn broadcast_epoch(&mut self, ctx: &mut Context) {
        let mut sent = 0;
        for node in 0..self.views.len() {
            if self.views[node].pending.is_empty() {
                continue;
            }
            let pending = std::mem::take(&mut self.views[node].pending);
            let channels: Rc<Vec<Rc<Channel>>> = Rc::new(pending.into_values().collect());
            let neighbors: Vec<NodeId> = ctx.graph().neighbors(node).collect();
            for to in neighbors {
                Self::send_update(ctx, node, to, channels.clone());
                sent += 1;
            }
        }
        if sent > 0 {
            debug!("broadcast epoch at {:.2}: {} channel update messages", ctx.now(), sent);
        }
        ctx.schedule_after(
            self.broadcast_interval,
            Event::Routing(RoutingEvent::ChannelBroadcastEpoch),
        );
    }
}

impl RoutingAlgorithm for SourceGraphRouting {
    fn name(&self) -> &'static str {
        "source graph"
    }

    fn prepare(&mut self, ctx: &mut Context, _rng: StdRng) -> SimResult<()> {
        let snapshot: Vec<Rc<Channel>> = ctx
            .graph()
            .channels()
            .iter()
            .map(|ch| Rc::new(ch.clone().with_timestamp(0.0)))
            .collect();
        self.views = (0..ctx.graph().size())
            .map(|_| LocalGraph {
                channels: snapshot.clone(),
                pending: IndexMap::new(),
            })
            .collect();
        ctx.schedule_now(Event::Routing(RoutingEvent::ChannelBroadcastEpoch));
        Ok(())
    }

    /// Up to `path_count` channel-disjoint paths on the sender's view.
    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target, amount) = {
            let p = ctx.payment(payment);
            (p.source(), p.target(), p.amount())
        };
        let max_fee_percent = ctx.config().max_fee_percent;
        let mut excluded: HashSet<ChannelId> = HashSet::new();
        for _ in 0..self.path_count {
            let view = &self.views[source];
            let Some(path) = self
                .search
                .find(ctx.graph(), view, source, target, amount, max_fee_percent, &excluded)
            else {
                break;
            };
            if let Some(channels) = path_channels(ctx.graph(), &path) {
                excluded.extend(channels);
            }
            ctx.payment_mut(payment).add_path(path);
        }
        pcn_payment::select_routes(ctx, payment);
    }

    fn handle_event(&mut self, ctx: &mut Context, event: RoutingEvent) {
        match event {
            RoutingEvent::ChannelUpdate { to, channels, .. } => self.views[to].merge(&channels),
            RoutingEvent::ChannelBroadcastEpoch => self.broadcast_epoch(ctx),
            _ => {}
        }
    }

    /// Both endpoints learn the new fees right away.
    fn on_fee_update(&mut self, ctx: &mut Context, channel: ChannelId) {
        let ch = ctx.graph().channel(channel);
        let (node1, node2) = (ch.node1(), ch.node2());
        let update = Rc::new(vec![Rc::new(ch.clone().with_timestamp(ctx.now()))]);
        Self::send_update(ctx, node1, node2, update.clone());
        Self::send_update(ctx, node2, node1, update);
    }

    /// Every node holds every channel plus a per-node adjacency of references.
    fn estimate_storage(&self, ctx: &Context) -> u64 {
        const REF_SIZE: u64 = 32;
        let channels = ctx.graph().channel_count() as u64;
        let nodes = ctx.graph().size() as u64;
        let channel_ram = channels * (REF_SIZE + std::mem::size_of::<Channel>() as u64);
        let adjacency_ram = nodes * REF_SIZE + channels * 2 * REF_SIZE;
        nodes * (channel_ram + adjacency_ram)
    }
}
