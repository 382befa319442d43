//! Single cheapest path over the authoritative graph.
//!
//! Not decentralized: every node is assumed to know every balance. Serves as
//! the reference the other algorithms are compared against.

use crate::pcn_engine::Context;
use crate::pcn_error::SimResult;
use crate::pcn_interface::PaymentId;
use crate::pcn_payment;
use crate::pcn_routing::{PathSearch, RoutingAlgorithm};
use hashbrown::HashSet;
use rand::rngs::StdRng;

#[derive(Debug, Default)]
pub struct OptimalRouting {
    search: PathSearch,
}

impl OptimalRouting {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingAlgorithm for OptimalRouting {
    fn name(&self) -> &'static str {
        "optimal"
    }

    fn prepare(&mut self, _ctx: &mut Context, _rng: StdRng) -> SimResult<()> {
        Ok(())
    }

    fn find_paths(&mut self, ctx: &mut Context, payment: PaymentId) {
        let (source, target, amount) = {
            let p = ctx.payment(payment);
            (p.source(), p.target(), p.amount())
        };
        let max_fee_percent = ctx.config().max_fee_percent;
        let graph = ctx.graph();
        if let Some(path) = self
            .search
            .find(graph, graph, source, target, amount, max_fee_percent, &HashSet::new())
        {
            ctx.payment_mut(payment).add_path(path);
        }
        pcn_payment::select_routes(ctx, payment);
    }

    /// Search scratch space per node: visited flag, distance, amount, predecessor.
    fn estimate_storage(&self, ctx: &Context) -> u64 {
        ctx.graph().size() as u64 * (8 + 64 + 64 + 32)
    }
}
