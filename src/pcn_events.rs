//! Every event the engine can schedule, and the flat kinds hooks are keyed on.
//!
//! Node-local events carry the node they run on. Messages carry both the
//! sender and the receiver and are scheduled with the propagation delay.

use crate::pcn_ghs::GhsMessage;
use crate::pcn_interface::{BuilderId, HtlcId, NodeId, PaymentId};
use crate::pcn_routing_flare::FlareMessage;
use crate::pcn_routing_hierarchy::LandmarkUpdate;
use crate::pcn_graph::Channel;
use std::rc::Rc;

/// Steps of a single-hop conditional transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtlcMessage {
    /// Offer arriving at the receiving end of the hop.
    Add(HtlcId),
    /// Receiver settles, arriving back at the sender.
    Fulfill(HtlcId),
    /// Receiver refuses, arriving back at the sender.
    Fail(HtlcId),
    /// Local deadline at the sender.
    Timeout(HtlcId),
}

impl HtlcMessage {
    pub fn htlc(&self) -> HtlcId {
        match *self {
            HtlcMessage::Add(h) | HtlcMessage::Fulfill(h) | HtlcMessage::Fail(h) | HtlcMessage::Timeout(h) => h,
        }
    }
}

/// Distance announcement flooded while a spanning forest is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeUpdate {
    pub builder: BuilderId,
    /// `None` for the initial message a root sends to itself.
    pub from: Option<NodeId>,
    pub to: NodeId,
    /// Sender's distance to `root`.
    pub distance: u64,
    pub root: NodeId,
}

/// Events private to one routing algorithm.
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    /// Rebuild the trees of one landmark slot.
    RenewLandmark { index: usize },
    /// Periodic hierarchy maintenance at `node`.
    HierarchyManage { node: NodeId },
    LandmarkUpdate {
        from: NodeId,
        to: NodeId,
        update: Box<LandmarkUpdate>,
    },
    Flare(FlareMessage),
    /// Every node forwards its pending channel updates.
    ChannelBroadcastEpoch,
    ChannelUpdate {
        from: NodeId,
        to: NodeId,
        channels: Rc<Vec<Rc<Channel>>>,
    },
}

#[derive(Debug, Clone)]
pub enum Event {
    /// A payment starts looking for paths.
    Payment(PaymentId),
    Htlc(HtlcMessage),
    FeeUpdate,
    TrafficTick,
    TreeUpdate(TreeUpdate),
    TreeSettled(BuilderId),
    Ghs(GhsMessage),
    Routing(RoutingEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Payment,
    HtlcAdd,
    HtlcFulfill,
    HtlcFail,
    HtlcTimeout,
    FeeUpdate,
    TrafficTick,
    TreeUpdate,
    TreeSettled,
    Ghs,
    RenewLandmark,
    HierarchyManage,
    LandmarkUpdate,
    Flare,
    ChannelBroadcastEpoch,
    ChannelUpdate,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Payment(_) => EventKind::Payment,
            Event::Htlc(HtlcMessage::Add(_)) => EventKind::HtlcAdd,
            Event::Htlc(HtlcMessage::Fulfill(_)) => EventKind::HtlcFulfill,
            Event::Htlc(HtlcMessage::Fail(_)) => EventKind::HtlcFail,
            Event::Htlc(HtlcMessage::Timeout(_)) => EventKind::HtlcTimeout,
            Event::FeeUpdate => EventKind::FeeUpdate,
            Event::TrafficTick => EventKind::TrafficTick,
            Event::TreeUpdate(_) => EventKind::TreeUpdate,
            Event::TreeSettled(_) => EventKind::TreeSettled,
            Event::Ghs(_) => EventKind::Ghs,
            Event::Routing(r) => match r {
                RoutingEvent::RenewLandmark { .. } => EventKind::RenewLandmark,
                RoutingEvent::HierarchyManage { .. } => EventKind::HierarchyManage,
                RoutingEvent::LandmarkUpdate { .. } => EventKind::LandmarkUpdate,
                RoutingEvent::Flare(_) => EventKind::Flare,
                RoutingEvent::ChannelBroadcastEpoch => EventKind::ChannelBroadcastEpoch,
                RoutingEvent::ChannelUpdate { .. } => EventKind::ChannelUpdate,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Event::Payment(3).kind(), EventKind::Payment);
        assert_eq!(Event::Htlc(HtlcMessage::Timeout(1)).kind(), EventKind::HtlcTimeout);
        assert_eq!(
            Event::Routing(RoutingEvent::RenewLandmark { index: 0 }).kind(),
            EventKind::RenewLandmark
        );
        assert_eq!(HtlcMessage::Fail(9).htlc(), 9);
    }
}
