// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/ring_landmarks.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/ring_landmarks.yaml --seed 1234

use log::{info, LevelFilter};
use pcn_sim::pcn_engine::{run_seeds, Simulation};
use pcn_sim::pcn_stats::PaymentStats;
use pcn_sim::pcn_topology::Scenario;
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/ring_landmarks.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/ring_landmarks.yaml --seed 1234", args[0]);
        std::process::exit(1);
    }

    let level = match env::var("PCN_LOG").ok().as_deref() {
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        Some("warn") => LevelFilter::Warn,
        _ => LevelFilter::Info,
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let path = Path::new(&args[1]);

    // Optional master seed overriding the scenario's
    let seed: Option<u64> = if args.len() >= 4 && args[2] == "--seed" {
        Some(args[3].parse().unwrap_or_else(|e| {
            eprintln!("Invalid seed {}: {}", args[3], e);
            std::process::exit(1);
        }))
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<u64>) {
    let mut scenarios = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }
}

fn run_scenario_file(path: &Path, seed: Option<u64>) {
    let mut scenario = Scenario::from_file(path).unwrap_or_else(|e| {
        eprintln!("Failed to load {}: {}", path.display(), e);
        std::process::exit(1);
    });
    if let Some(seed) = seed {
        scenario.simulation.random_seed = seed;
    }

    let name = scenario
        .name
        .clone()
        .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .unwrap_or_default();
    let config = &scenario.simulation;

    println!("=== {} ===", name);
    println!("Configuration:");
    println!("  Runs: {}", config.runs);
    println!("  Seed: {}", config.random_seed);
    println!("  Max run time: {}", config.max_run_time);
    println!("  Routing: {:?}", config.routing);
    println!("  Fees: {:?}", config.fees);
    println!("  Traffic: {:?}", config.traffic);
    println!("  Topology: {:?}", scenario.topology);

    for (run, run_seed) in run_seeds(config.random_seed, config.runs).into_iter().enumerate() {
        let started = std::time::Instant::now();
        let graph = scenario.topology.build(run_seed).unwrap_or_else(|e| {
            eprintln!("Failed to build topology: {}", e);
            std::process::exit(1);
        });
        info!(
            "generated {} nodes and {} channels in {:?}",
            graph.size(),
            graph.channel_count(),
            started.elapsed()
        );

        let mut sim = Simulation::new(config.clone(), graph);
        let stats = PaymentStats::attach(&mut sim);
        let report = sim.start(run_seed).unwrap_or_else(|e| {
            eprintln!("Run {} failed: {}", run + 1, e);
            std::process::exit(1);
        });

        println!("\n--- run {}/{} (seed {}) ---", run + 1, config.runs, report.seed);
        println!("routing: {}", sim.routing().name());
        println!("events: {} up to t={:.2}", report.events, report.end_time);
        println!("storage estimate: {} bytes", report.storage_estimate);
        println!("wall time: {} ms", report.wall_ms);
        println!("{}", stats.borrow());
    }

    println!("\nScenario complete.\n");
}
