//! Payment lifecycle and routes.
//!
//! A payment moves through five steps:
//! 1. its event fires and the routing algorithm looks for paths
//! 2. every path found is added once (`Payment::add_path`)
//! 3. `select_routes` turns the paths into priced routes and starts an HTLC
//!    chain per route
//! 4. each chain reaching the target marks its route ready; once all are
//!    ready the target settles all of them together
//! 5. the payment succeeds when every route is paid and fails as soon as
//!    one route fails

use crate::pcn_engine::Context;
use crate::pcn_events::Event;
use crate::pcn_graph::Graph;
use crate::pcn_htlc;
use crate::pcn_interface::{
    Amount, HtlcId, NodeId, PaymentId, PaymentResult, RouteId, SimTime, Timelock,
    MIN_FINAL_CLTV_EXPIRATION,
};
use log::{debug, trace};

// ============================================================================
// Route
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Proposed,
    Ready,
    Paid,
    Failed,
}

/// A path with the amount and timelock every hop has to receive.
///
/// Both are computed backward from the target: the last node receives the
/// payment amount with the final CLTV expiry, every earlier node the next
/// amount plus the fee of the channel it forwards over.
#[derive(Debug, Clone)]
pub struct Route {
    payment: PaymentId,
    nodes: Vec<NodeId>,
    amounts: Vec<Amount>,
    timelocks: Vec<Timelock>,
    sufficient: bool,
    state: RouteState,
}

impl Route {
    pub fn new(graph: &Graph, payment: PaymentId, path: &[NodeId], amount: Amount) -> Self {
        let n = path.len();
        let mut route = Self {
            payment,
            nodes: path.to_vec(),
            amounts: vec![0; n],
            timelocks: vec![0; n],
            sufficient: false,
            state: RouteState::Proposed,
        };
        if n < 2 {
            return route;
        }
        route.amounts[n - 1] = amount;
        route.timelocks[n - 1] = MIN_FINAL_CLTV_EXPIRATION;
        for i in (1..n).rev() {
            let Some(ch) = graph.channel_between(path[i - 1], path[i]) else {
                return route;
            };
            let ch = graph.channel(ch);
            if !ch.can_pay(path[i - 1], route.amounts[i]) {
                return route;
            }
            route.amounts[i - 1] = route.amounts[i] + ch.fee(path[i - 1], route.amounts[i]);
            route.timelocks[i - 1] = route.timelocks[i] + ch.min_timelock_delta();
        }
        route.sufficient = true;
        route
    }

    pub fn payment(&self) -> PaymentId {
        self.payment
    }

    pub fn node(&self, i: usize) -> NodeId {
        self.nodes[i]
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Amount that has to arrive at node `i`.
    pub fn amount(&self, i: usize) -> Amount {
        self.amounts[i]
    }

    pub fn timelock(&self, i: usize) -> Timelock {
        self.timelocks[i]
    }

    pub fn gross_amount(&self) -> Amount {
        self.amounts[0]
    }

    pub fn net_amount(&self) -> Amount {
        self.amounts[self.amounts.len() - 1]
    }

    pub fn fee(&self) -> Amount {
        self.gross_amount() - self.net_amount()
    }

    pub fn has_sufficient_capacities(&self) -> bool {
        self.sufficient
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn has_state(&self, state: RouteState) -> bool {
        self.state == state
    }
}

// ============================================================================
// Payment
// ============================================================================

#[derive(Debug, Clone)]
pub struct Payment {
    id: PaymentId,
    source: NodeId,
    target: NodeId,
    amount: Amount,
    scheduled_at: SimTime,
    started_at: Option<SimTime>,
    finished_at: Option<SimTime>,
    paths: Vec<Vec<NodeId>>,
    routes: Option<Vec<RouteId>>,
    /// Final-hop HTLCs waiting for their siblings to become ready.
    ready: Vec<HtlcId>,
    result: PaymentResult,
    dry_run: bool,
}

impl Payment {
    pub fn new(id: PaymentId, source: NodeId, target: NodeId, amount: Amount, scheduled_at: SimTime) -> Self {
        Self {
            id,
            source,
            target,
            amount,
            scheduled_at,
            started_at: None,
            finished_at: None,
            paths: Vec::new(),
            routes: None,
            ready: Vec::new(),
            result: PaymentResult::Undetermined,
            dry_run: false,
        }
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn scheduled_at(&self) -> SimTime {
        self.scheduled_at
    }

    pub fn started_at(&self) -> Option<SimTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<SimTime> {
        self.finished_at
    }

    /// Time between start and final result.
    pub fn delay(&self) -> Option<SimTime> {
        Some(self.finished_at? - self.started_at?)
    }

    pub fn paths(&self) -> &[Vec<NodeId>] {
        &self.paths
    }

    /// Routes picked by the selector, `None` before selection or if none fit.
    pub fn routes(&self) -> Option<&[RouteId]> {
        self.routes.as_deref()
    }

    pub fn result(&self) -> PaymentResult {
        self.result
    }

    pub fn has_succeeded(&self) -> bool {
        self.result == PaymentResult::Success
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Stops the payment after route selection. No funds move.
    pub fn set_dry_run(&mut self) {
        self.dry_run = true;
    }

    pub(crate) fn start(&mut self, now: SimTime) {
        self.started_at = Some(now);
    }

    /// Adds a candidate path unless the same node sequence is already known.
    pub fn add_path(&mut self, path: Vec<NodeId>) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }
}

/// Sum of the fees of the selected routes.
pub fn payment_fee(ctx: &Context, id: PaymentId) -> Option<Amount> {
    let routes = ctx.payment(id).routes()?;
    Some(routes.iter().map(|&r| ctx.route(r).fee()).sum())
}

// ============================================================================
// Lifecycle steps
// ============================================================================

/// Step 3: picks routes from the collected paths and starts executing them.
///
/// Only the first call per payment has an effect.
pub fn select_routes(ctx: &mut Context, id: PaymentId) {
    if ctx.payment(id).routes.is_some() || ctx.payment(id).result.is_final() {
        return;
    }
    let selected = ctx.selector().select_routes(ctx.graph(), ctx.config(), ctx.payment(id));
    let Some(selected) = selected else {
        let payment = ctx.payment(id);
        let max_len = ctx.config().max_path_length;
        let result = if !payment.paths.is_empty() && payment.paths.iter().all(|p| p.len() > max_len) {
            PaymentResult::PathTooLong
        } else {
            PaymentResult::NoPath
        };
        complete_with(ctx, id, result);
        return;
    };

    let route_ids: Vec<RouteId> = selected.into_iter().map(|r| ctx.add_route(r)).collect();
    trace!("payment {} selected {} route(s)", id, route_ids.len());
    ctx.payment_mut(id).routes = Some(route_ids.clone());

    if ctx.payment(id).dry_run {
        let now = ctx.now();
        ctx.payment_mut(id).finished_at = Some(now);
        ctx.complete(Event::Payment(id));
        return;
    }
    for route in route_ids {
        pcn_htlc::start_route(ctx, route);
    }
}

/// Step 4: the chain of `route` reached the target, held by `final_htlc`.
pub(crate) fn route_ready(ctx: &mut Context, route: RouteId, final_htlc: HtlcId) {
    if !ctx.route(route).has_state(RouteState::Proposed) {
        return;
    }
    ctx.route_mut(route).state = RouteState::Ready;
    let id = ctx.route(route).payment;
    ctx.payment_mut(id).ready.push(final_htlc);

    let all_ready = ctx
        .payment(id)
        .routes()
        .map(|rs| rs.iter().all(|&r| ctx.route(r).has_state(RouteState::Ready)))
        .unwrap_or(false);
    if all_ready {
        let ready = std::mem::take(&mut ctx.payment_mut(id).ready);
        for htlc in ready {
            pcn_htlc::fulfill(ctx, htlc);
        }
    }
}

/// Step 4b: one route failed, so the whole payment fails.
pub(crate) fn route_failed(ctx: &mut Context, route: RouteId) {
    ctx.route_mut(route).state = RouteState::Failed;
    let id = ctx.route(route).payment;
    complete_with(ctx, id, PaymentResult::HtlcFailure);
}

/// Step 5: `route` settled; the payment succeeds once all routes have.
pub(crate) fn route_paid(ctx: &mut Context, route: RouteId) {
    ctx.route_mut(route).state = RouteState::Paid;
    let id = ctx.route(route).payment;
    let all_paid = ctx
        .payment(id)
        .routes()
        .map(|rs| rs.iter().all(|&r| ctx.route(r).has_state(RouteState::Paid)))
        .unwrap_or(false);
    if all_paid {
        complete_with(ctx, id, PaymentResult::Success);
    }
}

fn complete_with(ctx: &mut Context, id: PaymentId, result: PaymentResult) {
    if ctx.payment(id).result.is_final() {
        return;
    }
    let now = ctx.now();
    let payment = ctx.payment_mut(id);
    payment.result = result;
    payment.finished_at = Some(now);
    debug!("payment {} finished: {}", id, result);
    ctx.complete(Event::Payment(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(caps: &[(Amount, Amount)]) -> Graph {
        let mut g = Graph::with_nodes(caps.len() + 1);
        for (i, &(a, b)) in caps.iter().enumerate() {
            g.add_channel(i, i + 1, a, b).unwrap();
        }
        g
    }

    #[test]
    fn test_route_amounts_and_timelocks_backward() {
        let mut g = line(&[(1000, 1000), (1000, 1000), (1000, 1000)]);
        for ch in g.channels_mut() {
            ch.set_fees(1000, 1000, 0, 0);
        }
        let route = Route::new(&g, 0, &[0, 1, 2, 3], 100);
        assert!(route.has_sufficient_capacities());
        assert_eq!(route.amount(3), 100);
        assert_eq!(route.amount(2), 101);
        assert_eq!(route.amount(1), 102);
        assert_eq!(route.amount(0), 103);
        assert_eq!(route.fee(), 3);
        assert_eq!(route.timelock(3), 9);
        assert_eq!(route.timelock(2), 21);
        assert_eq!(route.timelock(0), 45);
        assert!(route.has_state(RouteState::Proposed));
    }

    #[test]
    fn test_route_insufficient_capacity() {
        let mut g = line(&[(1000, 0), (50, 0)]);
        for ch in g.channels_mut() {
            ch.set_fees(0, 0, 0, 0);
        }
        assert!(Route::new(&g, 0, &[0, 1, 2], 50).has_sufficient_capacities());
        assert!(!Route::new(&g, 0, &[0, 1, 2], 51).has_sufficient_capacities());
        // wrong direction
        assert!(!Route::new(&g, 0, &[2, 1, 0], 10).has_sufficient_capacities());
        // not adjacent
        assert!(!Route::new(&g, 0, &[0, 2], 10).has_sufficient_capacities());
        assert!(!Route::new(&g, 0, &[0], 10).has_sufficient_capacities());
    }

    #[test]
    fn test_add_path_deduplicates() {
        let mut p = Payment::new(0, 0, 3, 100, 1.0);
        p.add_path(vec![0, 1, 3]);
        p.add_path(vec![0, 2, 3]);
        p.add_path(vec![0, 1, 3]);
        assert_eq!(p.paths().len(), 2);
        assert_eq!(p.result(), PaymentResult::Undetermined);
        assert!(p.routes().is_none());
        assert!(p.delay().is_none());
    }
}
