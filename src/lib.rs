//! # pcn-sim - Payment Channel Network Routing Simulator
//!
//! A discrete-event simulator for multi-hop payments over a network of
//! bidirectional payment channels. It compares routing algorithms under
//! identical, seed-reproducible traffic.
//!
//! ## Core Components
//!
//! - **Simulation / Context**: event loop, arenas and hooks (`pcn_engine`)
//! - **Graph**: nodes, channels and their per-direction capacities and fees
//! - **Payment / HTLC**: routes, hop-by-hop conditional transfers, atomic
//!   multi-path settlement
//! - **Routing**: optimal, source graph, landmark (centric, universe,
//!   hierarchy) and flare algorithms behind one trait
//! - **Topology construction**: flooding spanning forests and the GHS
//!   minimum spanning tree, both run as simulated message exchanges
//!
//! ## Usage
//!
//! ```no_run
//! use pcn_sim::pcn_config::SimConfig;
//! use pcn_sim::pcn_engine::Simulation;
//! use pcn_sim::pcn_stats::PaymentStats;
//! use pcn_sim::pcn_topology;
//!
//! let graph = pcn_topology::ring(6, 1000).unwrap();
//! let mut sim = Simulation::new(SimConfig::default(), graph);
//! let stats = PaymentStats::attach(&mut sim);
//! sim.schedule_payment(1.0, 0, 3, 100);
//! sim.start(42).unwrap();
//! println!("{}", stats.borrow());
//! ```
//!
//! Scenario files combining settings and topology are run by the
//! `scenario_runner` binary in `simulator/`.

// Shared types and setup
pub mod pcn_config;
pub mod pcn_error;
pub mod pcn_interface;
pub mod pcn_topology;

// Engine
pub mod pcn_engine;
pub mod pcn_events;
pub mod pcn_scheduler;

// Network and payments
pub mod pcn_fees;
pub mod pcn_graph;
pub mod pcn_htlc;
pub mod pcn_payment;
pub mod pcn_selector;
pub mod pcn_traffic;

// Topology construction
pub mod pcn_costs;
pub mod pcn_forest;
pub mod pcn_ghs;

// Routing
pub mod pcn_routing;
pub mod pcn_routing_flare;
pub mod pcn_routing_hierarchy;
pub mod pcn_routing_landmark;
pub mod pcn_routing_optimal;
pub mod pcn_routing_source_graph;

// Results
pub mod pcn_stats;

// Re-export commonly used types
pub use pcn_config::SimConfig;
pub use pcn_engine::{Context, RunReport, Simulation};
pub use pcn_error::{SimError, SimResult};
pub use pcn_graph::{Channel, Graph};
pub use pcn_interface::{Amount, ChannelId, NodeId, PaymentId, PaymentResult, Role, SimTime};
pub use pcn_routing::RoutingAlgorithm;
