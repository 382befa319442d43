//! Payment generators.
//!
//! A generator reads the consumer nodes of the graph once and then schedules
//! payments between them in fixed intervals. Pairs sharing a neighbor are
//! skipped: a single intermediary says nothing about routing.

use crate::pcn_config::TrafficConfig;
use crate::pcn_engine::Context;
use crate::pcn_error::{SimError, SimResult};
use crate::pcn_events::Event;
use crate::pcn_graph::Graph;
use crate::pcn_interface::{Amount, NodeId, Role, SimTime};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Time between two generation rounds.
pub const TRAFFIC_INTERVAL: SimTime = 5.0;

/// Attempts to find a non-trivial pair before a payment is given up.
const MAX_PAIR_ATTEMPTS: usize = 1000;

pub trait Traffic {
    /// Reads the consumers and schedules the first round.
    fn prepare(&mut self, ctx: &mut Context, rng: StdRng) -> SimResult<()>;

    /// One generation round; schedules the next.
    fn tick(&mut self, ctx: &mut Context);
}

pub fn from_config(config: &TrafficConfig) -> Box<dyn Traffic> {
    match *config {
        TrafficConfig::Constant { frequency, amount } => Box::new(ConstantTraffic::new(frequency, amount)),
        TrafficConfig::Linear { frequency, max_amount } => Box::new(ConstantTraffic::linear(frequency, max_amount)),
    }
}

/// Whether `a` and `b` have a common neighbor.
pub fn is_trivial_pair(graph: &Graph, a: NodeId, b: NodeId) -> bool {
    graph.neighbors(a).any(|n| graph.neighbors(b).any(|m| m == n))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Amounts {
    Fixed(Amount),
    Uniform(Amount),
}

/// `frequency` payments per time unit between random consumer pairs.
#[derive(Debug)]
pub struct ConstantTraffic {
    frequency: f64,
    amounts: Amounts,
    consumers: Vec<NodeId>,
    rng: StdRng,
}

impl ConstantTraffic {
    pub fn new(frequency: f64, amount: Amount) -> Self {
        Self::with_amounts(frequency, Amounts::Fixed(amount))
    }

    /// Amounts drawn uniformly from `1..=max_amount`.
    pub fn linear(frequency: f64, max_amount: Amount) -> Self {
        Self::with_amounts(frequency, Amounts::Uniform(max_amount))
    }

    fn with_amounts(frequency: f64, amounts: Amounts) -> Self {
        Self {
            frequency,
            amounts,
            consumers: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn consumers(&self) -> &[NodeId] {
        &self.consumers
    }

    /// Payments created per round.
    pub fn per_round(&self) -> usize {
        (self.frequency * TRAFFIC_INTERVAL).ceil() as usize
    }

    fn pick_pair(&mut self, graph: &Graph) -> Option<(NodeId, NodeId)> {
        for _ in 0..MAX_PAIR_ATTEMPTS {
            let picked = index::sample(&mut self.rng, self.consumers.len(), 2);
            let (src, dst) = (self.consumers[picked.index(0)], self.consumers[picked.index(1)]);
            if !is_trivial_pair(graph, src, dst) {
                return Some((src, dst));
            }
        }
        None
    }
}

impl Traffic for ConstantTraffic {
    fn prepare(&mut self, ctx: &mut Context, rng: StdRng) -> SimResult<()> {
        self.consumers = ctx.graph().nodes_with_role(Role::Consumer);
        if self.consumers.len() < 2 {
            return Err(SimError::NoConsumers);
        }
        self.rng = rng;
        debug!("traffic over {} consumers, {} payments per round", self.consumers.len(), self.per_round());
        ctx.schedule_now(Event::TrafficTick);
        Ok(())
    }

    fn tick(&mut self, ctx: &mut Context) {
        let now = ctx.now();
        for _ in 0..self.per_round() {
            let time = now + TRAFFIC_INTERVAL * self.rng.gen::<f64>();
            let amount = match self.amounts {
                Amounts::Fixed(amount) => amount,
                Amounts::Uniform(max) => self.rng.gen_range(1..=max),
            };
            let Some((src, dst)) = self.pick_pair(ctx.graph()) else {
                warn!("every consumer pair shares a neighbor, skipping payment");
                continue;
            };
            ctx.add_payment(time, src, dst, amount);
        }
        ctx.schedule_after(TRAFFIC_INTERVAL, Event::TrafficTick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::SimConfig;

    fn ring(n: usize, consumers: &[NodeId]) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n {
            g.add_channel(i, (i + 1) % n, 1000, 1000).unwrap();
        }
        for &c in consumers {
            g.set_role(c, Role::Consumer);
        }
        g
    }

    #[test]
    fn test_needs_two_consumers() {
        let mut ctx = Context::new(SimConfig::default(), ring(6, &[0]));
        let mut traffic = ConstantTraffic::new(1.0, 10);
        let err = traffic.prepare(&mut ctx, StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, SimError::NoConsumers));
    }

    #[test]
    fn test_trivial_pairs() {
        let g = ring(6, &[]);
        assert!(is_trivial_pair(&g, 0, 2));
        assert!(!is_trivial_pair(&g, 0, 3));
    }

    #[test]
    fn test_round_schedules_payments_within_interval() {
        let mut ctx = Context::new(SimConfig::default(), ring(12, &[0, 3, 6, 9]));
        let mut traffic = ConstantTraffic::new(0.9, 25);
        traffic.prepare(&mut ctx, StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(traffic.per_round(), 5);
        assert_eq!(ctx.pending_events(), 1);

        traffic.tick(&mut ctx);
        assert_eq!(ctx.payments().len(), 5);
        // five payments plus the next round
        assert_eq!(ctx.pending_events(), 7);
        for p in ctx.payments() {
            assert!(p.scheduled_at() >= 0.0 && p.scheduled_at() < TRAFFIC_INTERVAL);
            assert_ne!(p.source(), p.target());
            assert!(traffic.consumers().contains(&p.source()));
            assert!(traffic.consumers().contains(&p.target()));
            assert_eq!(p.amount(), 25);
        }
    }

    #[test]
    fn test_linear_amounts_bounded() {
        let mut ctx = Context::new(SimConfig::default(), ring(12, &[0, 3, 6, 9]));
        let mut traffic = ConstantTraffic::linear(4.0, 30);
        traffic.prepare(&mut ctx, StdRng::seed_from_u64(9)).unwrap();
        traffic.tick(&mut ctx);
        assert_eq!(ctx.payments().len(), 20);
        assert!(ctx.payments().iter().all(|p| (1..=30).contains(&p.amount())));
    }

    #[test]
    fn test_only_trivial_pairs_yield_nothing() {
        // 0 and 2 share node 1
        let mut ctx = Context::new(SimConfig::default(), ring(6, &[0, 2]));
        let mut traffic = ConstantTraffic::new(1.0, 10);
        traffic.prepare(&mut ctx, StdRng::seed_from_u64(1)).unwrap();
        traffic.tick(&mut ctx);
        assert!(ctx.payments().is_empty());
    }
}
