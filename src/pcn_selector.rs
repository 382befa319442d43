//! Route selection for atomic multi-path payments.

use crate::pcn_config::SimConfig;
use crate::pcn_graph::Graph;
use crate::pcn_interface::Amount;
use crate::pcn_payment::{Payment, Route};

/// Splits a payment into the smallest number of equal parts that can be
/// carried by the cheapest sufficient paths within the fee limit.
#[derive(Debug, Clone, Default)]
pub struct AmpRouteSelector;

impl AmpRouteSelector {
    pub fn new() -> Self {
        Self
    }

    /// Returns the routes for `payment`, or `None` if no split works.
    pub fn select_routes(&self, graph: &Graph, config: &SimConfig, payment: &Payment) -> Option<Vec<Route>> {
        let amount = payment.amount();
        for count in 1..=config.max_amp_split as Amount {
            // parts are rounded up so they add up to at least the amount
            let split = amount.div_ceil(count);
            let mut routes: Vec<Route> = payment
                .paths()
                .iter()
                .filter(|p| p.len() <= config.max_path_length)
                .map(|p| Route::new(graph, payment.id(), p, split))
                .filter(Route::has_sufficient_capacities)
                .collect();
            routes.sort_by_key(Route::fee);
            routes.truncate(count as usize);

            let fee: Amount = routes.iter().map(Route::fee).sum();
            if routes.len() == count as usize && fee_within_limit(fee, amount, config.max_fee_percent) {
                return Some(routes);
            }
        }
        None
    }
}

fn fee_within_limit(fee: Amount, amount: Amount, max_fee_percent: f64) -> bool {
    fee as f64 <= amount as f64 * max_fee_percent * 0.01
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two disjoint two-hop paths from 0 to 3, each able to carry `cap`.
    fn diamond(cap: Amount) -> Graph {
        let mut g = Graph::with_nodes(4);
        g.add_channel(0, 1, cap, cap).unwrap();
        g.add_channel(1, 3, cap, cap).unwrap();
        g.add_channel(0, 2, cap, cap).unwrap();
        g.add_channel(2, 3, cap, cap).unwrap();
        for ch in g.channels_mut() {
            ch.set_fees(0, 0, 0, 0);
        }
        g
    }

    fn payment(amount: Amount) -> Payment {
        let mut p = Payment::new(0, 0, 3, amount, 0.0);
        p.add_path(vec![0, 1, 3]);
        p.add_path(vec![0, 2, 3]);
        p
    }

    #[test]
    fn test_single_route_when_it_fits() {
        let g = diamond(1000);
        let routes = AmpRouteSelector.select_routes(&g, &SimConfig::default(), &payment(100)).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].net_amount(), 100);
        assert_eq!(routes[0].nodes(), &[0, 1, 3]);
    }

    #[test]
    fn test_splits_when_no_single_path_fits() {
        let g = diamond(60);
        let routes = AmpRouteSelector.select_routes(&g, &SimConfig::default(), &payment(100)).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.net_amount() == 50));
    }

    #[test]
    fn test_uneven_split_rounds_every_part_up() {
        let g = diamond(60);
        let routes = AmpRouteSelector.select_routes(&g, &SimConfig::default(), &payment(101)).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.net_amount() == 51));
        assert_eq!(routes.iter().map(Route::net_amount).sum::<Amount>(), 102);
    }

    #[test]
    fn test_none_when_even_splits_do_not_fit() {
        let g = diamond(40);
        assert!(AmpRouteSelector.select_routes(&g, &SimConfig::default(), &payment(100)).is_none());
    }

    #[test]
    fn test_fee_limit_and_path_length() {
        let mut g = diamond(1000);
        for ch in g.channels_mut() {
            // 10 per hop on 100 is far above 5 percent
            ch.set_fees(10_000, 10_000, 0, 0);
        }
        assert!(AmpRouteSelector.select_routes(&g, &SimConfig::default(), &payment(100)).is_none());

        let g = diamond(1000);
        let config = SimConfig { max_path_length: 2, ..SimConfig::default() };
        assert!(AmpRouteSelector.select_routes(&g, &config, &payment(100)).is_none());
    }
}
