// GHS MST - distributed minimum spanning tree on a random graph
//
// Usage:
//   cargo run --example ghs_mst [NODES] [CHANNELS]

use pcn_sim::pcn_config::{CostConfig, SimConfig};
use pcn_sim::pcn_engine::Simulation;
use pcn_sim::pcn_topology;
use rand::rngs::StdRng;
use rand::SeedableRng;
use simple_logger::SimpleLogger;
use std::env;

fn main() {
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().unwrap();

    let args: Vec<String> = env::args().collect();
    let nodes: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(50);
    let channels: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(120);

    let mut rng = StdRng::seed_from_u64(1);
    let graph = match pcn_topology::random(nodes, channels, 1000, &mut rng) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Cannot build graph: {}", e);
            std::process::exit(1);
        }
    };

    let config = SimConfig {
        max_run_time: 1.0e6,
        costs: CostConfig::Hop,
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(config, graph);
    sim.start_ghs();
    let events = sim.run();

    let ctx = sim.context();
    let Some(ghs) = ctx.ghs() else {
        return;
    };
    println!("Graph: {} nodes, {} channels", nodes, channels);
    println!("Events: {} up to t={:.2}", events, ctx.now());
    println!("GHS messages: {}", ghs.messages());
    match ghs.forest() {
        Some(forest) => {
            let roots = (0..nodes).filter(|&n| forest.next_hop(n).is_none()).count();
            println!("Finished: {} tree(s), total weight {}", roots, ghs.total_weight());
        }
        None => println!("Not finished: the graph may be disconnected"),
    }
}
