//! Payment statistics gathered from finished payments.

use crate::pcn_engine::{Context, Simulation};
use crate::pcn_events::{Event, EventKind};
use crate::pcn_interface::{Amount, PaymentId, PaymentResult, SimTime};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct PaymentStats {
    payments: u64,
    results: [u64; PaymentResult::ALL.len()],
    /// Successful payments only from here on.
    succeeded: u64,
    routes: u64,
    hops: u64,
    fees: Amount,
    fee_percents: f64,
    delay: SimTime,
    /// Number of routes -> payments split that way.
    splits: BTreeMap<usize, u64>,
}

impl PaymentStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every payment of `sim` once it is finished.
    pub fn attach(sim: &mut Simulation) -> Rc<RefCell<PaymentStats>> {
        let stats = Rc::new(RefCell::new(PaymentStats::new()));
        let s = stats.clone();
        sim.after_event(
            EventKind::Payment,
            Box::new(move |ctx, event| {
                if let Event::Payment(id) = event {
                    s.borrow_mut().record(ctx, *id);
                }
            }),
        );
        stats
    }

    pub fn record(&mut self, ctx: &Context, id: PaymentId) {
        let payment = ctx.payment(id);
        self.payments += 1;
        self.results[payment.result().code()] += 1;
        if !payment.has_succeeded() {
            return;
        }
        self.succeeded += 1;
        if let Some(delay) = payment.delay() {
            self.delay += delay;
        }
        let routes = payment.routes().unwrap_or_default();
        *self.splits.entry(routes.len()).or_default() += 1;
        for &r in routes {
            let route = ctx.route(r);
            self.routes += 1;
            self.hops += route.len().saturating_sub(1) as u64;
            self.fees += route.fee();
            if route.net_amount() > 0 {
                self.fee_percents += 100.0 * route.fee() as f64 / route.net_amount() as f64;
            }
        }
    }

    pub fn payments(&self) -> u64 {
        self.payments
    }

    pub fn count(&self, result: PaymentResult) -> u64 {
        self.results[result.code()]
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.count(PaymentResult::Success) as f64, self.payments)
    }

    pub fn total_fee(&self) -> Amount {
        self.fees
    }

    /// Per successful route.
    pub fn mean_fee(&self) -> f64 {
        ratio(self.fees as f64, self.routes)
    }

    pub fn mean_fee_percent(&self) -> f64 {
        ratio(self.fee_percents, self.routes)
    }

    /// Hops per successful route.
    pub fn mean_route_length(&self) -> f64 {
        ratio(self.hops as f64, self.routes)
    }

    /// Routes per successful payment.
    pub fn mean_split(&self) -> f64 {
        ratio(self.routes as f64, self.succeeded)
    }

    pub fn mean_delay(&self) -> f64 {
        ratio(self.delay, self.succeeded)
    }

    pub fn splits(&self) -> &BTreeMap<usize, u64> {
        &self.splits
    }
}

fn ratio(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl fmt::Display for PaymentStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "payments: {}", self.payments)?;
        for result in PaymentResult::ALL {
            writeln!(f, "  {}: {}", result, self.count(result))?;
        }
        writeln!(f, "success rate: {:.1}%", 100.0 * self.success_rate())?;
        if self.succeeded == 0 {
            return writeln!(f, "no payments were routed successfully");
        }
        writeln!(f, "route fee (avg): {:.2} sat ({:.3}%)", self.mean_fee(), self.mean_fee_percent())?;
        writeln!(f, "route length (avg): {:.2} hops", self.mean_route_length())?;
        writeln!(f, "route split (avg): {:.2}", self.mean_split())?;
        write!(f, "payment delay (avg): {:.3}", self.mean_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::{FeeConfig, SimConfig};
    use crate::pcn_graph::Graph;

    fn line(n: usize, capacity: Amount) -> Graph {
        let mut g = Graph::with_nodes(n);
        for i in 0..n - 1 {
            g.add_channel(i, i + 1, capacity, capacity).unwrap();
        }
        g
    }

    #[test]
    fn test_empty_stats() {
        let stats = PaymentStats::new();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.mean_split(), 0.0);
        assert!(stats.to_string().contains("no payments were routed successfully"));
    }

    #[test]
    fn test_counts_results_of_a_run() {
        let config = SimConfig {
            fees: FeeConfig::Constant { base: 1000, rate: 0 },
            ..SimConfig::default()
        };
        let mut sim = Simulation::new(config, line(4, 1000));
        let stats = PaymentStats::attach(&mut sim);
        sim.schedule_payment(1.0, 0, 3, 100);
        sim.schedule_payment(2.0, 0, 3, 5000);
        sim.start(1).unwrap();

        let stats = stats.borrow();
        assert_eq!(stats.payments(), 2);
        assert_eq!(stats.count(PaymentResult::Success), 1);
        assert_eq!(stats.count(PaymentResult::NoPath), 1);
        assert_eq!(stats.success_rate(), 0.5);
        // one sat per channel
        assert_eq!(stats.total_fee(), 3);
        assert_eq!(stats.mean_route_length(), 3.0);
        assert_eq!(stats.splits().get(&1), Some(&1));
        assert!(stats.mean_delay() > 0.0);
    }
}
