//! # engine_app: particle demo
//!
//! Runs a small particle simulation on the multi-threaded system scheduler.
//!
//! ## Startup Sequence
//!
//! 1. Parse the command line and load the scheduler configuration (JSON file,
//!    then environment, then command-line overrides).
//! 2. Spawn the scheduler's worker threads and register the demo systems.
//! 3. Either print the dependency graph (`--dump-graph`) or enter the
//!    fixed-timestep tick loop.

mod systems;
mod tick;
mod world;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine_system::{Scheduler, SchedulerConfig};
use systems::{Bounds, Gravity, Integrate, Spawner, Stats};
use tick::{TickConfig, TickLoop};
use world::ParticleWorld;

#[derive(Debug, Parser)]
#[command(name = "engine_app", about = "Particle demo for the ECS system scheduler")]
struct Args {
    /// Worker threads in addition to the main thread
    #[arg(short, long)]
    workers: Option<usize>,

    /// Number of ticks to run (0 = unlimited)
    #[arg(short, long, default_value_t = 600)]
    ticks: u64,

    /// Target ticks per second
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Number of live particles to maintain
    #[arg(short, long, default_value_t = 10_000)]
    particles: usize,

    /// Scheduler configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the system graph as JSON and exit
    #[arg(long)]
    dump_graph: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    info!(
        workers = config.worker_threads,
        profiler_samples = config.profiler_samples,
        "scheduler configuration loaded"
    );

    let world = Arc::new(ParticleWorld::new());
    let mut scheduler = Scheduler::new(config)?;
    scheduler.add_system(Gravity::new(Arc::clone(&world)));
    scheduler.add_system(Integrate::new(Arc::clone(&world)));
    scheduler.add_system(Bounds::new(Arc::clone(&world), 50.0));
    scheduler.add_system(Spawner::new(Arc::clone(&world), args.particles));
    let stats = scheduler.add_system(Stats::new(Arc::clone(&world), 60));

    if args.dump_graph {
        let snapshot = scheduler.snapshot()?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let tick_config = TickConfig {
        tick_rate: args.tick_rate,
        max_ticks: args.ticks,
    };
    let mut tick_loop = TickLoop::new(tick_config, scheduler);
    tick_loop.run()?;

    if let Some(stats) = tick_loop.scheduler().get_system::<Stats>(stats) {
        println!("{}", serde_json::to_string_pretty(&stats.latest())?);
    }
    info!(
        spawned = world.spawned(),
        live = world.len(),
        overruns = tick_loop.overruns(),
        failures = tick_loop.failures(),
        "particle demo shut down"
    );
    Ok(())
}

/// Load the scheduler configuration from `path`, or from the environment
/// when no file is given.
fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let Some(path) = path else {
        return Ok(SchedulerConfig::from_env());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
