//! Discrete-event engine.
//!
//! `Context` is the state every handler works on: clock, queue, graph and the
//! arenas holding payments, routes, HTLCs and forest builders. `Simulation`
//! owns a context plus the pluggable components (routing, fees, traffic) and
//! the observer hooks, and drives one run.
//!
//! Each `advance` pops the earliest event, runs the before-hooks of its kind,
//! executes it and then delivers what the event finished: after-hooks for
//! completed events, channel-update observers for moved balances.

use crate::pcn_config::SimConfig;
use crate::pcn_costs::RoutingCosts;
use crate::pcn_error::SimResult;
use crate::pcn_events::{Event, EventKind};
use crate::pcn_fees::FeePolicy;
use crate::pcn_forest::{self, ForestBuilder};
use crate::pcn_ghs::Ghs;
use crate::pcn_graph::Graph;
use crate::pcn_htlc::{self, Htlc};
use crate::pcn_interface::{
    Amount, BuilderId, ChannelId, HtlcId, NodeId, PaymentId, RouteId, SimTime, FEE_UPDATE_INTERVAL,
    PROPAGATION_DELAY,
};
use crate::pcn_payment::{Payment, Route};
use crate::pcn_routing::{self, RoutingAlgorithm};
use crate::pcn_scheduler::EventQueue;
use crate::pcn_selector::AmpRouteSelector;
use crate::pcn_traffic::{self, Traffic};
use hashbrown::HashMap;
use log::{info, trace};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::Instant;

// ============================================================================
// Context
// ============================================================================

pub struct Context {
    config: SimConfig,
    time: SimTime,
    queue: EventQueue<Event>,
    graph: Graph,
    costs: RoutingCosts,
    selector: AmpRouteSelector,
    payments: Vec<Payment>,
    routes: Vec<Route>,
    htlcs: Vec<Htlc>,
    forests: Vec<Option<ForestBuilder>>,
    ghs: Option<Ghs>,
    /// Events that finished during the current step.
    completed: Vec<Event>,
}

impl Context {
    pub fn new(config: SimConfig, graph: Graph) -> Self {
        let costs = RoutingCosts::new(config.costs);
        Self {
            config,
            time: 0.0,
            queue: EventQueue::new(),
            graph,
            costs,
            selector: AmpRouteSelector::new(),
            payments: Vec::new(),
            routes: Vec::new(),
            htlcs: Vec::new(),
            forests: Vec::new(),
            ghs: None,
            completed: Vec::new(),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.time
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn costs(&self) -> RoutingCosts {
        self.costs
    }

    pub fn inverse_costs(&self) -> RoutingCosts {
        self.costs.inverted()
    }

    pub fn selector(&self) -> &AmpRouteSelector {
        &self.selector
    }

    // ===== Scheduling =====

    pub fn schedule_at(&mut self, time: SimTime, event: Event) {
        assert!(
            time >= self.time,
            "cannot schedule into the past: now={}, at={}",
            self.time,
            time
        );
        self.queue.push(time, event);
    }

    pub fn schedule_after(&mut self, delay: SimTime, event: Event) {
        self.schedule_at(self.time + delay, event);
    }

    pub fn schedule_now(&mut self, event: Event) {
        self.schedule_at(self.time, event);
    }

    /// Delivers a message after the propagation delay.
    pub fn send(&mut self, event: Event) {
        self.schedule_after(PROPAGATION_DELAY, event);
    }

    /// Sends one message to every neighbor of `node` except `except`.
    pub fn flood(&mut self, node: NodeId, except: Option<NodeId>, mut message: impl FnMut(NodeId) -> Event) {
        let neighbors: Vec<NodeId> = self
            .graph
            .neighbors(node)
            .filter(|&n| Some(n) != except)
            .collect();
        for n in neighbors {
            let event = message(n);
            self.send(event);
        }
    }

    /// Marks `event` as finished; its after-hooks run once the current step ends.
    pub fn complete(&mut self, event: Event) {
        self.completed.push(event);
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    // ===== Arenas =====

    /// Creates a payment and schedules its start at `time`.
    pub fn add_payment(&mut self, time: SimTime, source: NodeId, target: NodeId, amount: Amount) -> PaymentId {
        let id = self.payments.len();
        self.payments.push(Payment::new(id, source, target, amount, time));
        self.schedule_at(time, Event::Payment(id));
        id
    }

    pub fn payment(&self, id: PaymentId) -> &Payment {
        &self.payments[id]
    }

    pub fn payment_mut(&mut self, id: PaymentId) -> &mut Payment {
        &mut self.payments[id]
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub(crate) fn add_route(&mut self, route: Route) -> RouteId {
        self.routes.push(route);
        self.routes.len() - 1
    }

    pub fn route(&self, id: RouteId) -> &Route {
        &self.routes[id]
    }

    pub(crate) fn route_mut(&mut self, id: RouteId) -> &mut Route {
        &mut self.routes[id]
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub(crate) fn add_htlc(&mut self, htlc: Htlc) -> HtlcId {
        self.htlcs.push(htlc);
        self.htlcs.len() - 1
    }

    pub fn htlc(&self, id: HtlcId) -> &Htlc {
        &self.htlcs[id]
    }

    pub(crate) fn htlc_mut(&mut self, id: HtlcId) -> &mut Htlc {
        &mut self.htlcs[id]
    }

    pub fn htlcs(&self) -> &[Htlc] {
        &self.htlcs
    }

    pub(crate) fn add_forest(&mut self, builder: ForestBuilder) -> BuilderId {
        self.forests.push(Some(builder));
        self.forests.len() - 1
    }

    pub fn forest(&self, id: BuilderId) -> Option<&ForestBuilder> {
        self.forests.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn forest_mut(&mut self, id: BuilderId) -> Option<&mut ForestBuilder> {
        self.forests.get_mut(id).and_then(Option::as_mut)
    }

    /// Releases a forest nobody routes on anymore. Late messages for it are ignored.
    pub fn drop_forest(&mut self, id: BuilderId) {
        if let Some(slot) = self.forests.get_mut(id) {
            *slot = None;
        }
    }

    pub fn ghs(&self) -> Option<&Ghs> {
        self.ghs.as_ref()
    }
}

// ============================================================================
// Simulation
// ============================================================================

pub type EventHook = Box<dyn FnMut(&Context, &Event)>;
/// Reacts to a balance change; may adjust the channel (e.g. rebalancing).
pub type ChannelHook = Box<dyn FnMut(&mut Graph, ChannelId)>;
pub type FeeHook = Box<dyn FnMut(&Context, ChannelId)>;

/// Summary of one finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seed: u64,
    pub events: u64,
    pub end_time: SimTime,
    pub payments: usize,
    pub storage_estimate: u64,
    pub wall_ms: u128,
}

pub struct Simulation {
    ctx: Context,
    routing: Box<dyn RoutingAlgorithm>,
    fees: FeePolicy,
    traffic: Option<Box<dyn Traffic>>,
    before: HashMap<EventKind, Vec<EventHook>>,
    after: HashMap<EventKind, Vec<EventHook>>,
    channel_hooks: Vec<ChannelHook>,
    fee_hooks: Vec<FeeHook>,
    events_processed: u64,
}

impl Simulation {
    /// Builds routing, fee policy and traffic from `config`.
    pub fn new(config: SimConfig, graph: Graph) -> Self {
        let routing = pcn_routing::from_config(&config.routing);
        let fees = FeePolicy::new(config.fees.clone());
        let traffic = config.traffic.as_ref().map(pcn_traffic::from_config);
        Self {
            ctx: Context::new(config, graph),
            routing,
            fees,
            traffic,
            before: HashMap::new(),
            after: HashMap::new(),
            channel_hooks: Vec::new(),
            fee_hooks: Vec::new(),
            events_processed: 0,
        }
    }

    pub fn with_routing(mut self, routing: Box<dyn RoutingAlgorithm>) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_traffic(mut self, traffic: Box<dyn Traffic>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn graph(&self) -> &Graph {
        &self.ctx.graph
    }

    pub fn routing(&self) -> &dyn RoutingAlgorithm {
        self.routing.as_ref()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    // ===== Hooks =====

    pub fn before_event(&mut self, kind: EventKind, hook: EventHook) {
        self.before.entry(kind).or_default().push(hook);
    }

    pub fn after_event(&mut self, kind: EventKind, hook: EventHook) {
        self.after.entry(kind).or_default().push(hook);
    }

    pub fn on_channel_update(&mut self, hook: ChannelHook) {
        self.channel_hooks.push(hook);
    }

    pub fn on_fee_update(&mut self, hook: FeeHook) {
        self.fee_hooks.push(hook);
    }

    // ===== Scheduling from outside =====

    pub fn schedule_payment(&mut self, time: SimTime, source: NodeId, target: NodeId, amount: Amount) -> PaymentId {
        self.ctx.add_payment(time, source, target, amount)
    }

    /// A payment that stops once its routes are chosen.
    pub fn schedule_dry_run(&mut self, time: SimTime, source: NodeId, target: NodeId, amount: Amount) -> PaymentId {
        let id = self.ctx.add_payment(time, source, target, amount);
        self.ctx.payment_mut(id).set_dry_run();
        id
    }

    /// Starts flooding a shortest-path forest outside of any routing algorithm.
    pub fn build_forest(&mut self, roots: &[NodeId], costs: RoutingCosts) -> BuilderId {
        pcn_forest::build(&mut self.ctx, roots, costs)
    }

    /// Starts building a minimum spanning tree over the current graph.
    pub fn start_ghs(&mut self) -> &mut Ghs {
        let mut ghs = Ghs::new(&self.ctx.graph, &self.ctx.costs);
        ghs.start(&mut self.ctx);
        self.ctx.ghs.insert(ghs)
    }

    // ===== Run =====

    /// Prepares the components in order: fee policy, routing, traffic.
    ///
    /// Routing and traffic each get their own stream derived from `seed`.
    /// Fails without touching anything if the configuration is invalid.
    pub fn prepare(&mut self, seed: u64) -> SimResult<()> {
        self.ctx.config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let routing_rng = StdRng::seed_from_u64(rng.next_u64());
        let traffic_rng = StdRng::seed_from_u64(rng.next_u64());

        let started = Instant::now();
        self.fees.prepare(&mut self.ctx.graph);
        if self.fees.is_dynamic() {
            self.ctx.schedule_after(FEE_UPDATE_INTERVAL, Event::FeeUpdate);
        }
        info!("fee policy ready in {:?}", started.elapsed());

        let started = Instant::now();
        self.routing.prepare(&mut self.ctx, routing_rng)?;
        info!("{} routing ready in {:?}", self.routing.name(), started.elapsed());

        if let Some(traffic) = self.traffic.as_mut() {
            let started = Instant::now();
            traffic.prepare(&mut self.ctx, traffic_rng)?;
            info!("traffic ready in {:?}", started.elapsed());
        }
        Ok(())
    }

    /// Executes the next event. Returns `false` once the queue is empty or the
    /// next event lies beyond the maximum run time.
    pub fn advance(&mut self) -> bool {
        let Some(next) = self.ctx.queue.pop() else {
            return false;
        };
        if next.time > self.ctx.config.max_run_time {
            return false;
        }
        assert!(
            next.time >= self.ctx.time,
            "time went backward: now={}, event={}",
            self.ctx.time,
            next.time
        );
        self.ctx.time = next.time;
        let event = next.payload;
        let kind = event.kind();
        trace!("{:.3} {:?}", self.ctx.time, kind);

        if let Some(hooks) = self.before.get_mut(&kind) {
            for hook in hooks.iter_mut() {
                hook(&self.ctx, &event);
            }
        }
        self.dispatch(event);
        self.deliver_completions();
        self.events_processed += 1;
        true
    }

    /// Runs until `advance` stops; returns the number of events executed.
    pub fn run(&mut self) -> u64 {
        let start = self.events_processed;
        while self.advance() {}
        self.events_processed - start
    }

    /// Prepares, runs and reports.
    pub fn start(&mut self, seed: u64) -> SimResult<RunReport> {
        let started = Instant::now();
        self.prepare(seed)?;

        let run_started = Instant::now();
        let events = self.run();
        info!(
            "ran {} events up to t={:.2} in {:?}",
            events,
            self.ctx.time,
            run_started.elapsed()
        );

        Ok(RunReport {
            seed,
            events,
            end_time: self.ctx.time,
            payments: self.ctx.payments.len(),
            storage_estimate: self.routing.estimate_storage(&self.ctx),
            wall_ms: started.elapsed().as_millis(),
        })
    }

    fn dispatch(&mut self, event: Event) {
        let ctx = &mut self.ctx;
        match event {
            Event::Payment(id) => {
                let now = ctx.time;
                ctx.payments[id].start(now);
                self.routing.find_paths(ctx, id);
            }
            Event::Htlc(message) => pcn_htlc::handle(ctx, message),
            Event::FeeUpdate => {
                let changed = self.fees.update_all(&mut ctx.graph);
                for ch in changed {
                    self.routing.on_fee_update(ctx, ch);
                    for hook in self.fee_hooks.iter_mut() {
                        hook(ctx, ch);
                    }
                }
                ctx.schedule_after(FEE_UPDATE_INTERVAL, Event::FeeUpdate);
            }
            Event::TrafficTick => {
                if let Some(traffic) = self.traffic.as_mut() {
                    traffic.tick(ctx);
                }
            }
            Event::TreeUpdate(update) => pcn_forest::handle_update(ctx, update),
            Event::TreeSettled(id) => {
                if let Some(builder) = ctx.forest_mut(id) {
                    builder.mark_settled();
                    self.routing.on_forest_settled(ctx, id);
                }
            }
            Event::Ghs(message) => {
                if let Some(mut ghs) = ctx.ghs.take() {
                    ghs.handle(ctx, message);
                    ctx.ghs = Some(ghs);
                }
            }
            Event::Routing(event) => self.routing.handle_event(ctx, event),
        }
    }

    fn deliver_completions(&mut self) {
        loop {
            let completed = std::mem::take(&mut self.ctx.completed);
            let updates = self.ctx.graph.take_updates();
            if completed.is_empty() && updates.is_empty() {
                return;
            }
            for event in completed {
                if let Some(hooks) = self.after.get_mut(&event.kind()) {
                    for hook in hooks.iter_mut() {
                        hook(&self.ctx, &event);
                    }
                }
            }
            for ch in updates {
                self.routing.on_channel_update(&mut self.ctx, ch);
                for hook in self.channel_hooks.iter_mut() {
                    hook(&mut self.ctx.graph, ch);
                }
            }
        }
    }
}

/// Seeds for `runs` independent runs, drawn from the master seed.
pub fn run_seeds(master_seed: u64, runs: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(master_seed);
    (0..runs).map(|_| rng.next_u64()).collect()
}
