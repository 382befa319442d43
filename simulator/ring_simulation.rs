// Ring Simulation - every routing algorithm on the same traffic
//
// Usage:
//   cargo run --example ring_simulation

use pcn_sim::pcn_config::{FeeConfig, RoutingConfig, SimConfig, TrafficConfig};
use pcn_sim::pcn_engine::Simulation;
use pcn_sim::pcn_interface::Role;
use pcn_sim::pcn_stats::PaymentStats;
use pcn_sim::pcn_topology;
use simple_logger::SimpleLogger;

const NODES: usize = 24;
const CAPACITY: u64 = 2000;
const SEED: u64 = 7;

fn main() {
    SimpleLogger::new().with_level(log::LevelFilter::Warn).init().unwrap();

    let algorithms = [
        RoutingConfig::Optimal,
        RoutingConfig::SourceGraph { broadcast_interval: 5.0, path_count: 3 },
        RoutingConfig::LandmarkCentric { interval: 30.0, landmarks: 3 },
        RoutingConfig::LandmarkUniverse { interval: 30.0, universes: 2, levels: 2 },
        RoutingConfig::LandmarkHierarchy { interval: 10.0 },
        RoutingConfig::Flare,
    ];

    println!("Ring of {} nodes, consumers on every fourth node\n", NODES);
    println!("{:<20} {:>9} {:>9} {:>10} {:>10} {:>12}", "algorithm", "payments", "success", "fee (avg)", "hops", "storage");

    for routing in algorithms {
        let config = SimConfig {
            max_run_time: 200.0,
            routing,
            fees: FeeConfig::Constant { base: 0, rate: 1 },
            traffic: Some(TrafficConfig::Constant { frequency: 1.0, amount: 500 }),
            ..SimConfig::default()
        };

        let mut graph = pcn_topology::ring(NODES, CAPACITY).unwrap();
        for n in (0..NODES).step_by(4) {
            graph.set_role(n, Role::Consumer);
        }

        let mut sim = Simulation::new(config, graph);
        let stats = PaymentStats::attach(&mut sim);
        let report = sim.start(SEED).unwrap();
        let stats = stats.borrow();

        println!(
            "{:<20} {:>9} {:>8.1}% {:>10.2} {:>10.2} {:>12}",
            sim.routing().name(),
            stats.payments(),
            100.0 * stats.success_rate(),
            stats.mean_fee(),
            stats.mean_route_length(),
            report.storage_estimate
        );
    }
}
