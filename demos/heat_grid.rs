//! Heat diffusion example.
//!
//! Builds a rectangular `gals_heat` grid with a hot spot in the middle, runs
//! it with the chosen scheduler until every device has passed the time
//! horizon, and prints the final temperature field as a character map.
//!
//! Usage: `cargo run --example heat_grid -- [width] [height] [single|batch] [log level]`

use gals_sim::config::{SchedulerKind, SimConfig, SimConfigBuilder};
use gals_sim::engine::Simulation;
use gals_sim::graphs::heat::{field, make_grid_until};
use gals_sim::stats::StatsCollector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const SEED: u64 = 0x5eed;
const MAX_TIME: u32 = 200;
const SHADES: &[u8] = b" .:-=+*#%@";

fn shade(v: f64) -> char {
    // Values live in [-1, 1].
    let t = ((v + 1.0) / 2.0).clamp(0.0, 1.0);
    let i = (t * (SHADES.len() - 1) as f64).round() as usize;
    SHADES[i] as char
}

fn run_config(scheduler: &str, log_level: &str) -> SimConfig {
    let kind = match scheduler {
        "batch" => SchedulerKind::Batch,
        _ => SchedulerKind::Single,
    };
    let built = SimConfigBuilder::new()
        .scheduler(kind)
        .seed(SEED)
        .max_steps(u64::MAX)
        .log_level(log_level)
        .build();
    match built {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bad run settings: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let width = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(16);
    let height = args.get(2).and_then(|a| a.parse().ok()).unwrap_or(12);
    let scheduler = args.get(3).map(String::as_str).unwrap_or("single");
    let log_level = args.get(4).map(String::as_str).unwrap_or("info");

    let config = run_config(scheduler, log_level);
    config.init_logging();

    println!("==== Heat grid example ====");
    println!("{}x{} grid, {} scheduler, horizon {}\n", width, height, scheduler, MAX_TIME);

    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let graph = match make_grid_until(width, height, MAX_TIME, true, &mut rng) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("failed to build grid: {}", e);
            std::process::exit(1);
        }
    };

    let mut collector = StatsCollector::new();
    collector.set_name(format!("heat_{}x{}", width, height));
    collector.start();

    let mut sim = Simulation::from_config(&config);
    sim.attach(graph);
    sim.run_configured();

    collector.stop();
    collector.update_from_json(&sim.export_stats());

    let graph = sim.detach();
    let mut rows = vec![vec![' '; width]; height];
    for (x, y, v) in field(&graph) {
        rows[y as usize][x as usize] = shade(v);
    }
    for row in rows {
        println!("{}", row.into_iter().collect::<String>());
    }

    println!();
    print!("{}", collector.stats().summary());
}
