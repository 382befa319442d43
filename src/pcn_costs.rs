//! Edge weights for tree construction.

use crate::pcn_config::CostConfig;
use crate::pcn_graph::Channel;
use crate::pcn_interface::NodeId;

/// Direction-aware cost of sending over a channel.
///
/// The inverted variant charges the opposite direction, which turns a
/// "distance to the root" tree into a "distance from the root" tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingCosts {
    config: CostConfig,
    inverted: bool,
}

impl RoutingCosts {
    pub fn new(config: CostConfig) -> Self {
        Self { config, inverted: false }
    }

    pub fn hop() -> Self {
        Self::new(CostConfig::Hop)
    }

    pub fn inverted(&self) -> Self {
        Self {
            config: self.config,
            inverted: !self.inverted,
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Cost for `sender` to push a payment over `ch`.
    pub fn cost(&self, ch: &Channel, sender: NodeId) -> u64 {
        let sender = if self.inverted { ch.other_node(sender) } else { sender };
        match self.config {
            CostConfig::Hop => 1,
            CostConfig::Advanced {
                base_factor,
                rate_factor,
                capacity_factor,
            } => {
                let total = ch.capacity();
                let depletion = if total == 0 {
                    1.0
                } else {
                    1.0 - ch.capacity_of(sender) as f64 / total as f64
                };
                let cost = base_factor * (ch.base_fee(sender) as f64 / 1000.0)
                    + rate_factor * ch.fee_rate(sender) as f64
                    + capacity_factor * depletion;
                cost.max(0.0) as u64
            }
        }
    }
}

impl Default for RoutingCosts {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_costs() {
        let ch = Channel::new(0, 3, 4, 10, 0);
        let costs = RoutingCosts::hop();
        assert_eq!(costs.cost(&ch, 3), 1);
        assert_eq!(costs.inverted().cost(&ch, 4), 1);
    }

    #[test]
    fn test_advanced_costs_follow_direction() {
        let mut ch = Channel::new(0, 0, 1, 25, 75);
        ch.set_fees(2000, 0, 3, 7);
        let costs = RoutingCosts::new(CostConfig::Advanced {
            base_factor: 1.0,
            rate_factor: 10.0,
            capacity_factor: 100.0,
        });
        // 2 + 30 + 75
        assert_eq!(costs.cost(&ch, 0), 107);
        // 0 + 70 + 25
        assert_eq!(costs.cost(&ch, 1), 95);
        assert_eq!(costs.inverted().cost(&ch, 0), costs.cost(&ch, 1));
        assert!(!costs.inverted().inverted().is_inverted());
    }
}
