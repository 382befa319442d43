//! Run configuration.
//!
//! Every section has defaults, so a scenario file only needs to name what it
//! changes. Component sections are tagged enums (`type: landmark_centric`).

use crate::pcn_error::{SimError, SimResult};
use crate::pcn_interface::{Amount, SimTime};
use std::path::Path;

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed. Every run and every component derives its stream from it (default: 42)
    pub random_seed: u64,

    /// Number of independent runs (default: 1)
    pub runs: usize,

    /// Events scheduled after this time are not executed (default: 100.0)
    pub max_run_time: SimTime,

    /// Fees above this share of the amount make a path unusable (default: 5.0 percent)
    pub max_fee_percent: f64,

    /// Longer candidate paths are not turned into routes (default: 20)
    pub max_path_length: usize,

    /// Most parts a payment may be split into (default: 7)
    pub max_amp_split: usize,

    pub routing: RoutingConfig,
    pub fees: FeeConfig,
    pub costs: CostConfig,

    /// Generated payments. `None` means payments are only scheduled by hand.
    pub traffic: Option<TrafficConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            runs: 1,
            max_run_time: 100.0,
            max_fee_percent: 5.0,
            max_path_length: 20,
            max_amp_split: 7,
            routing: RoutingConfig::default(),
            fees: FeeConfig::default(),
            costs: CostConfig::default(),
            traffic: None,
        }
    }
}

impl SimConfig {
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Rejects values no run could make sense of.
    pub fn validate(&self) -> SimResult<()> {
        if self.runs == 0 {
            return Err(SimError::InvalidConfig("runs must be at least 1".into()));
        }
        if !(self.max_run_time > 0.0) {
            return Err(SimError::InvalidConfig("max_run_time must be positive".into()));
        }
        if self.max_fee_percent < 0.0 {
            return Err(SimError::InvalidConfig("max_fee_percent must not be negative".into()));
        }
        if self.max_path_length < 2 {
            return Err(SimError::InvalidConfig("max_path_length must be at least 2".into()));
        }
        if self.max_amp_split == 0 {
            return Err(SimError::InvalidConfig("max_amp_split must be at least 1".into()));
        }
        self.routing.validate()?;
        self.fees.validate()?;
        if let Some(traffic) = &self.traffic {
            traffic.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingConfig {
    /// Relaxation over the authoritative graph.
    Optimal,
    /// Every node keeps a copy of the graph refreshed by broadcasts.
    SourceGraph {
        broadcast_interval: SimTime,
        path_count: usize,
    },
    /// Random bridges act as landmarks, one tree pair each.
    LandmarkCentric { interval: SimTime, landmarks: usize },
    /// Several universes of leveled spanning forests.
    LandmarkUniverse {
        interval: SimTime,
        universes: usize,
        levels: usize,
    },
    /// Self-organizing landmark hierarchy with prefix addresses.
    LandmarkHierarchy { interval: SimTime },
    /// Gossip with beacons.
    Flare,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig::Optimal
    }
}

impl RoutingConfig {
    fn validate(&self) -> SimResult<()> {
        let bad = |msg: &str| Err(SimError::InvalidConfig(msg.to_string()));
        match *self {
            RoutingConfig::SourceGraph { broadcast_interval, path_count } => {
                if !(broadcast_interval > 0.0) {
                    return bad("broadcast_interval must be positive");
                }
                if path_count == 0 {
                    return bad("path_count must be at least 1");
                }
            }
            RoutingConfig::LandmarkCentric { interval, landmarks } => {
                if !(interval > 0.0) {
                    return bad("landmark interval must be positive");
                }
                if landmarks == 0 {
                    return bad("landmarks must be at least 1");
                }
            }
            RoutingConfig::LandmarkUniverse { interval, universes, levels } => {
                if !(interval > 0.0) {
                    return bad("universe interval must be positive");
                }
                if universes == 0 || levels == 0 {
                    return bad("universes and levels must be at least 1");
                }
                if levels > 16 {
                    return bad("levels must not exceed 16");
                }
            }
            RoutingConfig::LandmarkHierarchy { interval } => {
                if !(interval > 0.0) {
                    return bad("hierarchy interval must be positive");
                }
            }
            RoutingConfig::Optimal | RoutingConfig::Flare => {}
        }
        Ok(())
    }
}

// ============================================================================
// Fees and costs
// ============================================================================

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeConfig {
    Constant { base: Amount, rate: Amount },
    Linear { base: Amount, min_rate: Amount, max_rate: Amount },
    Exponential {
        base: Amount,
        min_rate: Amount,
        max_rate: Amount,
        exponent: f64,
    },
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig::Exponential {
            base: 1000,
            min_rate: 1,
            max_rate: 10,
            exponent: 2.0,
        }
    }
}

impl FeeConfig {
    fn validate(&self) -> SimResult<()> {
        match *self {
            FeeConfig::Linear { min_rate, max_rate, .. }
            | FeeConfig::Exponential { min_rate, max_rate, .. }
                if min_rate > max_rate =>
            {
                Err(SimError::InvalidConfig("min_rate exceeds max_rate".into()))
            }
            FeeConfig::Exponential { exponent, .. } if !(exponent > 0.0) => {
                Err(SimError::InvalidConfig("fee exponent must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Edge weights used to build spanning trees and the GHS tree.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostConfig {
    /// Every hop costs one.
    Hop,
    /// Weighted sum of base fee, fee rate and depletion.
    Advanced {
        base_factor: f64,
        rate_factor: f64,
        capacity_factor: f64,
    },
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig::Advanced {
            base_factor: 0.0,
            rate_factor: 100.0,
            capacity_factor: 0.0,
        }
    }
}

// ============================================================================
// Traffic
// ============================================================================

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrafficConfig {
    /// Random consumer pairs at a steady rate.
    Constant { frequency: f64, amount: Amount },
    /// Like constant, with amounts uniform in `1..=max_amount`.
    Linear { frequency: f64, max_amount: Amount },
}

impl TrafficConfig {
    fn validate(&self) -> SimResult<()> {
        match *self {
            TrafficConfig::Constant { frequency, amount } => {
                if frequency < 0.0 {
                    return Err(SimError::InvalidConfig("traffic frequency must not be negative".into()));
                }
                if amount == 0 {
                    return Err(SimError::InvalidConfig("traffic amount must be positive".into()));
                }
                Ok(())
            }
            TrafficConfig::Linear { frequency, max_amount } => {
                if frequency < 0.0 {
                    return Err(SimError::InvalidConfig("traffic frequency must not be negative".into()));
                }
                if max_amount == 0 {
                    return Err(SimError::InvalidConfig("traffic max_amount must be positive".into()));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = SimConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.runs, 1);
        assert_eq!(config.max_path_length, 20);
        assert_eq!(config.routing, RoutingConfig::Optimal);
        assert!(matches!(config.fees, FeeConfig::Exponential { base: 1000, .. }));
        assert!(config.traffic.is_none());
    }

    #[test]
    fn test_tagged_sections() {
        let yaml = r#"
random_seed: 7
max_run_time: 50.0
routing:
  type: landmark_universe
  interval: 20.0
  universes: 4
  levels: 2
fees:
  type: constant
  base: 0
  rate: 0
costs:
  type: hop
traffic:
  type: constant
  frequency: 2.0
  amount: 150
"#;
        let config = SimConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.random_seed, 7);
        assert_eq!(
            config.routing,
            RoutingConfig::LandmarkUniverse { interval: 20.0, universes: 4, levels: 2 }
        );
        assert_eq!(config.fees, FeeConfig::Constant { base: 0, rate: 0 });
        assert_eq!(config.costs, CostConfig::Hop);
        assert_eq!(config.traffic, Some(TrafficConfig::Constant { frequency: 2.0, amount: 150 }));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            SimConfig::from_yaml_str("runs: 0"),
            Err(SimError::InvalidConfig(_))
        ));
        let yaml = "fees:\n  type: linear\n  base: 0\n  min_rate: 9\n  max_rate: 1\n";
        assert!(matches!(SimConfig::from_yaml_str(yaml), Err(SimError::InvalidConfig(_))));
        assert!(matches!(
            SimConfig::from_yaml_str("routing:\n  type: nonsense\n"),
            Err(SimError::Yaml(_))
        ));
    }
}
