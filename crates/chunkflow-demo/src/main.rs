//! Flocking demo for the chunkflow task pipeline.
//!
//! Spawns a flock and a handful of orbiting targets, then runs a fixed
//! number of frames, logging the flock's shape as it goes.
//!
//! Environment:
//! - `BOIDS`, `TARGETS`, `FRAMES`, `MAX_SLICE`, `SEED` - see [`config::DemoConfig`]
//! - `CHUNKFLOW_WORKERS` - worker thread count
//! - `RUST_LOG` - log filter

#![allow(clippy::suboptimal_flops)]

mod boids;
mod config;

use std::time::Instant;

use chunkflow_ecs::World;
use chunkflow_tasks::{Scheduler, SchedulerConfig};
use rand::{SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{boids::Flock, config::DemoConfig};

/// Frames between progress reports.
const REPORT_EVERY: u32 = 60;

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chunkflow_demo=info".parse()?)
                .add_directive("chunkflow_tasks=warn".parse()?),
        )
        .init();

    let config = DemoConfig::from_env();
    info!(?config, "starting flocking demo");

    let scheduler = Scheduler::new(SchedulerConfig::from_env()?)?;
    info!(workers = scheduler.worker_threads(), "scheduler ready");

    let mut world = World::new();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let meta = boids::spawn(&mut world, &config, &mut rng)?;
    let flock = Flock::new();

    let start = Instant::now();
    for frame in 0..config.frames {
        let report = frame % REPORT_EVERY == 0;
        let cells = scheduler.frame(&mut world, |ppl| {
            boids::schedule_frame(ppl, &flock, meta, &config, report)
        });

        if let (Some(cells), Some(stats)) = (cells, boids::stats(&world)) {
            info!(
                frame,
                cells,
                spread = stats.spread,
                alignment = stats.alignment,
                centroid = ?stats.centroid,
                "flock"
            );
        }
    }

    let elapsed = start.elapsed();
    info!(
        frames = config.frames,
        ?elapsed,
        per_frame = ?elapsed / config.frames.max(1),
        "done"
    );
    Ok(())
}
