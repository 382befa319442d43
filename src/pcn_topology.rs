//! Scenario topologies.
//!
//! A scenario file carries the simulation settings next to a `topology`
//! section describing the channel graph:
//!
//! ```yaml
//! runs: 3
//! routing:
//!   type: landmark_centric
//!   interval: 20.0
//!   landmarks: 2
//! topology:
//!   type: ring
//!   nodes: 12
//!   capacity: 1000
//!   consumers: [0, 3, 6, 9]
//! ```

use crate::pcn_config::SimConfig;
use crate::pcn_error::{SimError, SimResult};
use crate::pcn_graph::Graph;
use crate::pcn_interface::{Amount, NodeId, Role};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ChannelSpec {
    pub node1: NodeId,
    pub node2: NodeId,
    pub capacity1: Amount,
    pub capacity2: Amount,
}

/// Capacities are per direction.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyConfig {
    Ring {
        nodes: usize,
        capacity: Amount,
        #[serde(default)]
        consumers: Vec<NodeId>,
    },
    Line {
        nodes: usize,
        capacity: Amount,
        #[serde(default)]
        consumers: Vec<NodeId>,
    },
    /// `channels` distinct channels between uniformly drawn node pairs.
    Random {
        nodes: usize,
        channels: usize,
        capacity: Amount,
        #[serde(default)]
        consumers: Vec<NodeId>,
    },
    Explicit {
        nodes: Vec<Role>,
        channels: Vec<ChannelSpec>,
    },
}

impl TopologyConfig {
    /// Builds the graph. Only random topologies use `seed`.
    pub fn build(&self, seed: u64) -> SimResult<Graph> {
        match self {
            TopologyConfig::Ring { nodes, capacity, consumers } => {
                with_consumers(ring(*nodes, *capacity)?, consumers)
            }
            TopologyConfig::Line { nodes, capacity, consumers } => {
                with_consumers(line(*nodes, *capacity)?, consumers)
            }
            TopologyConfig::Random { nodes, channels, capacity, consumers } => {
                let mut rng = StdRng::seed_from_u64(seed);
                with_consumers(random(*nodes, *channels, *capacity, &mut rng)?, consumers)
            }
            TopologyConfig::Explicit { nodes, channels } => {
                let mut g = Graph::new();
                for &role in nodes {
                    g.add_node(role);
                }
                for ch in channels {
                    g.add_channel(ch.node1, ch.node2, ch.capacity1, ch.capacity2)?;
                }
                Ok(g)
            }
        }
    }
}

fn with_consumers(mut g: Graph, consumers: &[NodeId]) -> SimResult<Graph> {
    for &n in consumers {
        if n >= g.size() {
            return Err(SimError::UnknownNode(n));
        }
        g.set_role(n, Role::Consumer);
    }
    Ok(g)
}

/// `n` bridges, each connected to the next, the last back to the first.
pub fn ring(n: usize, capacity: Amount) -> SimResult<Graph> {
    let mut g = Graph::with_nodes(n);
    if n < 3 {
        return Err(SimError::InvalidConfig(format!("a ring needs at least 3 nodes, got {}", n)));
    }
    for i in 0..n {
        g.add_channel(i, (i + 1) % n, capacity, capacity)?;
    }
    Ok(g)
}

pub fn line(n: usize, capacity: Amount) -> SimResult<Graph> {
    let mut g = Graph::with_nodes(n);
    for i in 1..n {
        g.add_channel(i - 1, i, capacity, capacity)?;
    }
    Ok(g)
}

pub fn complete(n: usize, capacity: Amount) -> SimResult<Graph> {
    let mut g = Graph::with_nodes(n);
    for a in 0..n {
        for b in a + 1..n {
            g.add_channel(a, b, capacity, capacity)?;
        }
    }
    Ok(g)
}

/// Draws pairs until `channels` distinct channels exist.
pub fn random(n: usize, channels: usize, capacity: Amount, rng: &mut StdRng) -> SimResult<Graph> {
    let max = n * n.saturating_sub(1) / 2;
    if channels > max {
        return Err(SimError::TooManyEdges { requested: channels, max });
    }
    let mut g = Graph::with_nodes(n);
    while g.channel_count() < channels {
        let (a, b) = (rng.gen_range(0..n), rng.gen_range(0..n));
        if a != b && g.channel_between(a, b).is_none() {
            g.add_channel(a, b, capacity, capacity)?;
        }
    }
    Ok(g)
}

/// Simulation settings plus the topology to run them on.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub simulation: SimConfig,
    pub topology: TopologyConfig,
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.simulation.validate()?;
        Ok(scenario)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcn_config::RoutingConfig;

    #[test]
    fn test_ring_and_line() {
        let g = ring(5, 100).unwrap();
        assert_eq!(g.channel_count(), 5);
        assert_eq!(g.channel_between(4, 0), Some(4));
        assert_eq!(g.total_capacity(), 1000);

        let g = line(4, 10).unwrap();
        assert_eq!(g.channel_count(), 3);
        assert!(g.channel_between(3, 0).is_none());

        assert!(matches!(ring(2, 100), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_complete_graph() {
        let g = complete(5, 10).unwrap();
        assert_eq!(g.channel_count(), 10);
        assert!(g.nodes().iter().all(|n| n.degree() == 4));
    }

    #[test]
    fn test_random_edge_limit() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = random(4, 7, 10, &mut rng).unwrap_err();
        assert!(matches!(err, SimError::TooManyEdges { requested: 7, max: 6 }));

        let g = random(4, 6, 10, &mut rng).unwrap();
        assert_eq!(g.channel_count(), 6);
    }

    #[test]
    fn test_random_topology_is_seeded() {
        let topology = TopologyConfig::Random { nodes: 20, channels: 40, capacity: 10, consumers: vec![] };
        let pairs = |g: &Graph| g.channels().iter().map(|c| (c.node1(), c.node2())).collect::<Vec<_>>();
        let a = topology.build(3).unwrap();
        let b = topology.build(3).unwrap();
        assert_eq!(pairs(&a), pairs(&b));
    }

    #[test]
    fn test_consumers_must_exist() {
        let topology = TopologyConfig::Line { nodes: 3, capacity: 10, consumers: vec![0, 5] };
        assert!(matches!(topology.build(0), Err(SimError::UnknownNode(5))));
    }

    #[test]
    fn test_scenario_yaml() {
        let yaml = r#"
name: small
runs: 2
routing:
  type: landmark_centric
  interval: 20.0
  landmarks: 2
topology:
  type: explicit
  nodes: [consumer, gateway, bridge, consumer]
  channels:
    - { node1: 0, node2: 1, capacity1: 100, capacity2: 0 }
    - { node1: 1, node2: 2, capacity1: 500, capacity2: 500 }
    - { node1: 2, node2: 3, capacity1: 500, capacity2: 500 }
"#;
        let scenario = Scenario::from_yaml_str(yaml).unwrap();
        assert_eq!(scenario.name.as_deref(), Some("small"));
        assert_eq!(scenario.simulation.runs, 2);
        assert_eq!(
            scenario.simulation.routing,
            RoutingConfig::LandmarkCentric { interval: 20.0, landmarks: 2 }
        );
        let g = scenario.topology.build(0).unwrap();
        assert_eq!(g.nodes_with_role(Role::Consumer), vec![0, 3]);
        assert_eq!(g.channel(0).capacity_of(0), 100);
        assert_eq!(g.channel(0).capacity_of(1), 0);
    }

    #[test]
    fn test_bundled_scenarios_load() {
        let files = [
            include_str!("../scenarios/ring_landmarks.yaml"),
            include_str!("../scenarios/random_source_graph.yaml"),
            include_str!("../scenarios/hub_flare.yaml"),
            include_str!("../scenarios/hierarchy.yaml"),
        ];
        for yaml in files {
            let scenario = Scenario::from_yaml_str(yaml).unwrap();
            let g = scenario.topology.build(scenario.simulation.random_seed).unwrap();
            assert!(g.nodes_with_role(Role::Consumer).len() >= 2);
        }
    }

    #[test]
    fn test_explicit_duplicate_channel() {
        let topology = TopologyConfig::Explicit {
            nodes: vec![Role::Bridge; 2],
            channels: vec![
                ChannelSpec { node1: 0, node2: 1, capacity1: 1, capacity2: 1 },
                ChannelSpec { node1: 1, node2: 0, capacity1: 1, capacity2: 1 },
            ],
        };
        assert!(matches!(topology.build(0), Err(SimError::DuplicateChannel(1, 0))));
    }
}
