//! Hop-by-hop conditional transfers along a route.
//!
//! An HTLC is created when its sender reserves funds on the channel and
//! offers them to the receiver. The offer doubles as the HTLC record itself.
//! On arrival, an intermediate receiver either offers the next hop or fails
//! the HTLC back; the final receiver waits for its payment to release it.
//! Settling or failing walks back along `prev` to the source, where the route
//! is finalized.

use crate::pcn_engine::Context;
use crate::pcn_events::{Event, HtlcMessage};
use crate::pcn_interface::{
    Amount, ChannelId, HtlcId, NodeId, RouteId, SimTime, MAX_CLTV_EXPIRATION,
};
use crate::pcn_payment;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtlcState {
    Offered,
    Fulfilled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Htlc {
    pub route: RouteId,
    /// Position of the receiver within the route.
    pub index: usize,
    /// HTLC of the previous hop, `None` at the source.
    pub prev: Option<HtlcId>,
    pub channel: ChannelId,
    pub sender: NodeId,
    pub receiver: NodeId,
    /// Funds reserved on the sender side.
    pub amount: Amount,
    pub offered_at: SimTime,
    pub state: HtlcState,
}

impl Htlc {
    pub fn is_completed(&self) -> bool {
        self.state != HtlcState::Offered
    }
}

/// Sends the first HTLC of a route from its source.
///
/// Routes of one payment are priced independently, so the first channel is
/// checked again before anything is reserved.
pub(crate) fn start_route(ctx: &mut Context, route: RouteId) {
    let (source, first_hop, amount) = {
        let r = ctx.route(route);
        (r.node(0), r.node(1), r.amount(1))
    };
    let can_pay = ctx
        .graph()
        .channel_between(source, first_hop)
        .map(|ch| ctx.graph().channel(ch).can_pay(source, amount))
        .unwrap_or(false);
    if can_pay {
        send(ctx, route, 1, None);
    } else {
        trace!("route {} cannot leave node {}", route, source);
        pcn_payment::route_failed(ctx, route);
    }
}

/// Reserves the funds for hop `index` of `route` and offers them.
fn send(ctx: &mut Context, route: RouteId, index: usize, prev: Option<HtlcId>) {
    let (sender, receiver, amount, timelock) = {
        let r = ctx.route(route);
        (r.node(index - 1), r.node(index), r.amount(index), r.timelock(index - 1))
    };
    let Some(channel) = ctx.graph().channel_between(sender, receiver) else {
        panic!("route {} uses missing channel {}<>{}", route, sender, receiver);
    };
    ctx.graph_mut().channel_mut(channel).debit(sender, amount);

    let now = ctx.now();
    let id = ctx.add_htlc(Htlc {
        route,
        index,
        prev,
        channel,
        sender,
        receiver,
        amount,
        offered_at: now,
        state: HtlcState::Offered,
    });
    ctx.send(Event::Htlc(HtlcMessage::Add(id)));
    ctx.schedule_after(timelock as SimTime + 1.0, Event::Htlc(HtlcMessage::Timeout(id)));
}

/// Releases a final-hop HTLC held back until all routes were ready.
pub(crate) fn fulfill(ctx: &mut Context, id: HtlcId) {
    ctx.send(Event::Htlc(HtlcMessage::Fulfill(id)));
}

fn fail(ctx: &mut Context, id: HtlcId) {
    ctx.send(Event::Htlc(HtlcMessage::Fail(id)));
}

pub(crate) fn handle(ctx: &mut Context, message: HtlcMessage) {
    match message {
        HtlcMessage::Add(id) => receive(ctx, id),
        HtlcMessage::Fulfill(id) => complete(ctx, id, true),
        HtlcMessage::Fail(id) | HtlcMessage::Timeout(id) => complete(ctx, id, false),
    }
}

/// Runs at the receiver when the offer arrives.
fn receive(ctx: &mut Context, id: HtlcId) {
    let (route, index) = {
        let h = ctx.htlc(id);
        (h.route, h.index)
    };
    let r = ctx.route(route);
    if index == r.len() - 1 {
        pcn_payment::route_ready(ctx, route, id);
        return;
    }

    let node = r.node(index);
    let next_hop = r.node(index + 1);
    let amount = r.amount(index + 1);
    let delta = r.timelock(index).saturating_sub(r.timelock(index + 1));
    let next_timelock = r.timelock(index + 1);
    let forward = ctx
        .graph()
        .channel_between(node, next_hop)
        .map(|ch| {
            let ch = ctx.graph().channel(ch);
            ch.can_pay(node, amount)
                && delta >= ch.min_timelock_delta()
                && next_timelock < MAX_CLTV_EXPIRATION
        })
        .unwrap_or(false);

    if forward {
        send(ctx, route, index + 1, Some(id));
    } else {
        trace!("htlc {} stops at node {}", id, node);
        fail(ctx, id);
    }
}

/// Runs at the sender: settles or refunds the reservation, then walks back.
fn complete(ctx: &mut Context, id: HtlcId, success: bool) {
    if ctx.htlc(id).is_completed() {
        return;
    }
    let (channel, sender, receiver, amount, prev, route) = {
        let h = ctx.htlc(id);
        (h.channel, h.sender, h.receiver, h.amount, h.prev, h.route)
    };

    let graph = ctx.graph_mut();
    graph.channel_mut(channel).credit(if success { receiver } else { sender }, amount);
    if success {
        graph.channel_updated(channel);
    }
    ctx.htlc_mut(id).state = if success { HtlcState::Fulfilled } else { HtlcState::Failed };
    ctx.complete(Event::Htlc(HtlcMessage::Add(id)));

    match (prev, success) {
        (Some(prev), true) => fulfill(ctx, prev),
        (Some(prev), false) => fail(ctx, prev),
        (None, true) => pcn_payment::route_paid(ctx, route),
        (None, false) => pcn_payment::route_failed(ctx, route),
    }
}
