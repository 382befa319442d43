//! Routing over landmark trees.
//!
//! A landmark owns two shortest-path trees: one towards it, built with the
//! regular costs, and one away from it, built with the inverted costs. A path
//! is the walk from the source up to the landmark followed by the walk down
//! to the target, with the first loop cut out.
//!
//! The centric variant rotates a fixed number of single landmarks. The
//! universe variant keeps several universes of forests where level `i` has
//! `2^i` roots, so lower levels give short paths between nearby nodes.

use crate::pcn_engine::Context;
use crate::pcn_error::{SimError, SimResult};
use crate::pcn_events::{Event, RoutingEvent};
use crate::pcn_forest::{self, SpanningForest};
use crate::pcn_interface::{BuilderId, NodeId, PaymentId, Role, SimTime};
use crate::pcn_payment;
use crate::pcn_routing::{concat, shorten_path, RoutingAlgorithm};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;

/// Both trees of one root set.
#[derive(Debug, Clone, Copy)]
struct TreePair {
    to_root: BuilderId,
    from_root: BuilderId,
}

impl TreePair {
    fn build(ctx: &mut Context, roots: &[NodeId]) -> Self {
        let (costs, inverse) = (ctx.costs(), ctx.inverse_costs());
        let to_root = pcn_forest::build(ctx, roots, costs);
        let from_root = pcn_forest::build(ctx, roots, inverse);
        Self { to_root, from_root }
    }

    fn contains(&self, builder: BuilderId) -> bool {
        self.to_root == builder || self.from_root == builder
    }

    /// Both forests, once both have settled.
    fn forests<'a>(&self, ctx: &'a Context) -> Option<(&'a SpanningForest, &'a SpanningForest)> {
        let to = ctx.forest(self.to_root).filter(|b| b.is_settled())?;
        let from = ctx.forest(self.from_root).filter(|b| b.is_settled())?;
        Some((to.forest(), from.forest()))
    }

    fn release(self, ctx: &mut Context) {
        ctx.drop_forest(self.to_root);
        ctx.drop_forest(self.from_root);
    }

    /// Source up to the shared root, then down to the target.
    fn path(&self, ctx: &Context, source: NodeId, target: NodeId) -> Option<Vec<NodeId>> {
        let (to, from) = self.forests(ctx)?;
        let root = to.root_of(source)?;
        if from.root_of(target)? != root {
            return None;
        }
        let up = to.path_from(source, true)?;
        let down = from.path_to(target, false)?;
        Some(shorten_path(&concat(&up, &down)))
    }
}

fn bridges(ctx: &Context) -> Vec<NodeId> {
    ctx.graph().nodes_with_role(Role::Bridge)
}

fn schedule_renewal(ctx: &mut Context, interval: SimTime, index: usize) {
    ctx.schedule_after(interval, Event::Routing(RoutingEvent::RenewLandmark { index }));
}

// ============================================================================
// Centric
// ============================================================================

#[derive(Debug, Clone)]
struct Landmark {
    root: NodeId,
    trees: TreePair,
    /// A renewal waits for both trees before it counts as done.
    renewing: bool,
}

#[derive(Debug)]
pub struct LandmarkCentricRouting {
    interval: SimTime,
    count: usize,
    bridges: Vec<NodeId>,
    landmarks: Vec<Landmark>,
    rng: StdRng,
}

impl LandmarkCentricRouting {
    pub fn new(interval: SimTime, landmarks: usize) -> Self {
        Self {
            interval,
            count: landmarks,
            bridges: Vec::new(),
            landmarks: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Current landmark roots, one per slot.
    pub fn roots(&self) -> Vec<NodeId> {
        self.landmarks.iter().map(|l| l.root).collect()
    }

    fn new_landmark(&mut self, ctx: &mut Context, renewing: bool) -> Option<Landmark> {
        let root = *self.bridges.choose(&mut self.rng)?;
        Some(Landmark {
            root,
            trees: TreePair::build(ctx, &[root]),
            renewing,
        })
    }

    fn renew(&mut self, ctx: &mut Context, index: usize) {
        if let Some(landmark) = self.new_landmark(ctx, true) {
            debug!("landmark slot {} moves to node {} at {:.2}", index, landmark.root, ctx.now());
            let old = std::mem::replace(&mut self.landmarks[index], landmark);
            old.trees.release(ctx);
        }
        schedule_renewal(ctx, self.interval, (index + 1) % self.landmarks.len());
    }
}

impl RoutingAlgorithm for LandmarkCentricRouting {
    fn name(&self) -> &'static str {
        "landmark centric"
    }

    fn prepare(&mut self, ctx: &mut Context, rng: StdRng) -> SimResult<()> {
        self.rng = rng;
        self.bridges = bridges(ctx);
        if self.bridges.is_empty() {
            return Err(SimError::NoBridges);
        }
        self.landmarks.clear();
        for _ in 0..self.count {
            if let Some(landmark) = self.new_landmark(ctx, false) {
                self.landmarks.push(landmark);
            }
        }
        if !self.landmarks.is_empty() {
            schedule_renewal(ctx, self.interval, 0);
        }
        Ok(())
    }

    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target) = {
            let p = ctx.payment(payment);
            (p.source(), p.target())
        };
        let paths: Vec<Vec<NodeId>> = self
            .landmarks
            .iter()
            .filter_map(|l| l.trees.path(ctx, source, target))
            .collect();
        for path in paths {
            ctx.payment_mut(payment).add_path(path);
        }
        pcn_payment::select_routes(ctx, payment);
    }

    fn handle_event(&mut self, ctx: &mut Context, event: RoutingEvent) {
        if let RoutingEvent::RenewLandmark { index } = event {
            self.renew(ctx, index);
        }
    }

    fn on_forest_settled(&mut self, ctx: &mut Context, builder: BuilderId) {
        for (index, landmark) in self.landmarks.iter_mut().enumerate() {
            if landmark.renewing && landmark.trees.contains(builder) && landmark.trees.forests(ctx).is_some() {
                landmark.renewing = false;
                ctx.complete(Event::Routing(RoutingEvent::RenewLandmark { index }));
            }
        }
    }

    /// Two trees per landmark, each node keeps a parent id and a distance.
    fn estimate_storage(&self, ctx: &Context) -> u64 {
        (self.landmarks.len() * 2 * ctx.graph().size() * 32) as u64
    }
}

// ============================================================================
// Universe
// ============================================================================

#[derive(Debug, Clone)]
struct Universe {
    /// Level `i` holds `2^i` roots.
    levels: Vec<TreePair>,
    renewing: bool,
}

impl Universe {
    fn contains(&self, builder: BuilderId) -> bool {
        self.levels.iter().any(|l| l.contains(builder))
    }

    fn is_ready(&self, ctx: &Context) -> bool {
        self.levels.iter().all(|l| l.forests(ctx).is_some())
    }
}

#[derive(Debug)]
pub struct LandmarkUniverseRouting {
    interval: SimTime,
    count: usize,
    level_count: usize,
    bridges: Vec<NodeId>,
    universes: Vec<Universe>,
    rng: StdRng,
}

impl LandmarkUniverseRouting {
    pub fn new(interval: SimTime, universes: usize, levels: usize) -> Self {
        Self {
            interval,
            count: universes,
            level_count: levels,
            bridges: Vec::new(),
            universes: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn new_universe(&mut self, ctx: &mut Context, renewing: bool) -> Universe {
        let levels = (0..self.level_count)
            .map(|level| {
                let roots: Vec<NodeId> = index::sample(&mut self.rng, self.bridges.len(), 1 << level)
                    .into_iter()
                    .map(|i| self.bridges[i])
                    .collect();
                TreePair::build(ctx, &roots)
            })
            .collect();
        Universe { levels, renewing }
    }
}

impl RoutingAlgorithm for LandmarkUniverseRouting {
    fn name(&self) -> &'static str {
        "landmark universe"
    }

    fn prepare(&mut self, ctx: &mut Context, rng: StdRng) -> SimResult<()> {
        self.rng = rng;
        self.bridges = bridges(ctx);
        let needed = 1usize << self.level_count;
        if self.bridges.len() < needed {
            return Err(SimError::NotEnoughBridges {
                needed,
                available: self.bridges.len(),
            });
        }
        self.universes.clear();
        for _ in 0..self.count {
            let universe = self.new_universe(ctx, false);
            self.universes.push(universe);
        }
        if !self.universes.is_empty() {
            schedule_renewal(ctx, self.interval, 0);
        }
        Ok(())
    }

    /// One candidate per universe and level, as long as both ends share a root.
    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target) = {
            let p = ctx.payment(payment);
            (p.source(), p.target())
        };
        let paths: Vec<Vec<NodeId>> = self
            .universes
            .iter()
            .flat_map(|u| u.levels.iter())
            .filter_map(|l| l.path(ctx, source, target))
            .collect();
        for path in paths {
            ctx.payment_mut(payment).add_path(path);
        }
        pcn_payment::select_routes(ctx, payment);
    }

    fn handle_event(&mut self, ctx: &mut Context, event: RoutingEvent) {
        if let RoutingEvent::RenewLandmark { index } = event {
            let universe = self.new_universe(ctx, true);
            let old = std::mem::replace(&mut self.universes[index], universe);
            for level in old.levels {
                level.release(ctx);
            }
            debug!("universe {} renewed at {:.2}", index, ctx.now());
            schedule_renewal(ctx, self.interval, (index + 1) % self.universes.len());
        }
    }

    fn on_forest_settled(&mut self, ctx: &mut Context, builder: BuilderId) {
        for (index, universe) in self.universes.iter_mut().enumerate() {
            if universe.renewing && universe.contains(builder) && universe.is_ready(ctx) {
                universe.renewing = false;
                ctx.complete(Event::Routing(RoutingEvent::RenewLandmark { index }));
            }
        }
    }

    fn estimate_storage(&self, ctx: &Context) -> u64 {
        (self.universes.len() * self.level_count * 2 * ctx.graph().size() * 32) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::{CostConfig, FeeConfig, RoutingConfig, SimConfig};
    use crate::pcn_engine::Simulation;
    use crate::pcn_events::EventKind;
    use crate::pcn_graph::Graph;
    use crate::pcn_interface::PaymentResult;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ring(n: usize) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n {
            g.add_channel(i, (i + 1) % n, 1000, 1000).unwrap();
        }
        g
    }

    fn config(routing: RoutingConfig) -> SimConfig {
        SimConfig {
            routing,
            fees: FeeConfig::Constant { base: 0, rate: 0 },
            costs: CostConfig::Hop,
            max_run_time: 75.0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_centric_routes_after_trees_settle() {
        let mut sim = Simulation::new(
            config(RoutingConfig::LandmarkCentric { interval: 50.0, landmarks: 2 }),
            ring(8),
        );
        let early = sim.schedule_payment(5.0, 0, 4, 100);
        let late = sim.schedule_payment(20.0, 0, 4, 100);
        sim.start(9).unwrap();

        let ctx = sim.context();
        assert_eq!(ctx.payment(early).result(), PaymentResult::NoPath);
        assert_eq!(ctx.payment(late).result(), PaymentResult::Success);
        for path in ctx.payment(late).paths() {
            assert_eq!(path.first(), Some(&0));
            assert_eq!(path.last(), Some(&4));
            let mut sorted = path.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), path.len(), "loop left in {:?}", path);
        }
    }

    #[test]
    fn test_centric_needs_bridges() {
        let mut g = ring(3);
        for n in 0..3 {
            g.set_role(n, Role::Consumer);
        }
        let mut sim = Simulation::new(
            config(RoutingConfig::LandmarkCentric { interval: 10.0, landmarks: 1 }),
            g,
        );
        assert!(matches!(sim.start(1), Err(SimError::NoBridges)));
    }

    #[test]
    fn test_renewals_complete_once_trees_settle() {
        let mut sim = Simulation::new(
            config(RoutingConfig::LandmarkCentric { interval: 20.0, landmarks: 2 }),
            ring(6),
        );
        let done = Rc::new(RefCell::new(Vec::new()));
        let d = done.clone();
        sim.after_event(EventKind::RenewLandmark, Box::new(move |ctx, _| d.borrow_mut().push(ctx.now())));
        sim.start(4).unwrap();
        // renewals at 20, 40 and 60, each done after the settling delay
        assert_eq!(*done.borrow(), vec![30.0, 50.0, 70.0]);
    }

    #[test]
    fn test_universe_requires_enough_bridges() {
        let mut sim = Simulation::new(
            config(RoutingConfig::LandmarkUniverse { interval: 10.0, universes: 1, levels: 3 }),
            ring(6),
        );
        match sim.start(1) {
            Err(SimError::NotEnoughBridges { needed, available }) => {
                assert_eq!(needed, 8);
                assert_eq!(available, 6);
            }
            other => panic!("unexpected {:?}", other.map(|r| r.events)),
        }
    }

    #[test]
    fn test_universe_finds_paths_per_level() {
        let mut sim = Simulation::new(
            config(RoutingConfig::LandmarkUniverse { interval: 100.0, universes: 2, levels: 2 }),
            ring(8),
        );
        let p = sim.schedule_payment(20.0, 1, 6, 100);
        sim.start(7).unwrap();

        let ctx = sim.context();
        assert_eq!(ctx.payment(p).result(), PaymentResult::Success);
        let paths = ctx.payment(p).paths();
        // level 0 has a single root, so every universe yields a path there
        assert!(!paths.is_empty() && paths.len() <= 4);
        assert!(paths.iter().all(|p| p[0] == 1 && p[p.len() - 1] == 6));
    }
}
