//! Fee policies.
//!
//! Dynamic policies raise the fee rate of a direction as it runs dry: the
//! rate for payments sent by node 1 grows with the share of funds sitting on
//! node 2's side, and the other way around.

use crate::pcn_config::FeeConfig;
use crate::pcn_graph::{Channel, Graph};
use crate::pcn_interface::{Amount, ChannelId};

#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    config: FeeConfig,
}

impl FeePolicy {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Constant fees are set once and never need periodic recalculation.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self.config, FeeConfig::Constant { .. })
    }

    /// Sets the initial fees of every channel.
    pub fn prepare(&self, graph: &mut Graph) {
        for ch in graph.channels_mut() {
            match self.config {
                FeeConfig::Constant { base, rate } => {
                    ch.set_fees(base, base, rate, rate);
                }
                _ => {
                    self.update_channel(ch);
                }
            }
        }
    }

    /// Recomputes one channel's fees and reports whether they changed.
    pub fn update_channel(&self, ch: &mut Channel) -> bool {
        let (base, rate1, rate2) = match self.config {
            FeeConfig::Constant { .. } => return false,
            FeeConfig::Linear { base, min_rate, max_rate } => {
                let (share1, share2) = shares(ch);
                let span = (max_rate - min_rate) as f64;
                (
                    base,
                    min_rate + (span * share2) as Amount,
                    min_rate + (span * share1) as Amount,
                )
            }
            FeeConfig::Exponential {
                base,
                min_rate,
                max_rate,
                exponent,
            } => {
                let (share1, share2) = shares(ch);
                let span = (max_rate - min_rate) as f64;
                (
                    base,
                    (min_rate as f64 + span * share2.powf(exponent)) as Amount,
                    (min_rate as f64 + span * share1.powf(exponent)) as Amount,
                )
            }
        };
        ch.set_fees(base, base, rate1, rate2)
    }

    /// Recomputes every channel and returns the ones whose fees changed.
    pub fn update_all(&self, graph: &mut Graph) -> Vec<ChannelId> {
        graph
            .channels_mut()
            .iter_mut()
            .filter_map(|ch| self.update_channel(ch).then(|| ch.id()))
            .collect()
    }
}

/// Share of the total capacity on each side. An empty channel counts as balanced.
fn shares(ch: &Channel) -> (f64, f64) {
    let total = ch.capacity();
    if total == 0 {
        return (0.5, 0.5);
    }
    let share1 = ch.capacity1() as f64 / total as f64;
    (share1, 1.0 - share1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(cap1: Amount, cap2: Amount) -> Graph {
        let mut g = Graph::with_nodes(2);
        g.add_channel(0, 1, cap1, cap2).unwrap();
        g
    }

    #[test]
    fn test_constant_sets_once() {
        let policy = FeePolicy::new(FeeConfig::Constant { base: 5, rate: 3 });
        let mut g = graph(10, 10);
        policy.prepare(&mut g);
        assert_eq!(g.channel(0).base_fee(1), 5);
        assert_eq!(g.channel(0).fee_rate(0), 3);
        assert!(!policy.is_dynamic());

        g.channel_mut(0).set_capacities(20, 0);
        assert!(policy.update_all(&mut g).is_empty());
    }

    #[test]
    fn test_linear_follows_depletion() {
        let policy = FeePolicy::new(FeeConfig::Linear { base: 0, min_rate: 0, max_rate: 100 });
        let mut g = graph(25, 75);
        policy.prepare(&mut g);
        // node 0 only holds a quarter, sending from it is expensive
        assert_eq!(g.channel(0).fee_rate(0), 75);
        assert_eq!(g.channel(0).fee_rate(1), 25);
    }

    #[test]
    fn test_exponential_reports_changes_only() {
        let policy = FeePolicy::new(FeeConfig::Exponential {
            base: 1000,
            min_rate: 1,
            max_rate: 11,
            exponent: 2.0,
        });
        let mut g = graph(50, 50);
        policy.prepare(&mut g);
        // 1 + 10 * 0.25
        assert_eq!(g.channel(0).fee_rate(0), 3);
        assert!(policy.update_all(&mut g).is_empty());

        g.channel_mut(0).set_capacities(0, 100);
        assert_eq!(policy.update_all(&mut g), vec![0]);
        assert_eq!(g.channel(0).fee_rate(0), 11);
        assert_eq!(g.channel(0).fee_rate(1), 1);
    }
}
