//! Demo configuration, read from the environment.

use std::env;

/// Knobs for one demo run.
///
/// Every field has an environment override: `BOIDS`, `TARGETS`, `FRAMES`,
/// `MAX_SLICE` (0 means one task per chunk range) and `SEED`.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub boids: usize,
    pub targets: usize,
    pub frames: u32,
    pub max_slice: Option<usize>,
    pub seed: u64,
    /// Seconds simulated per frame.
    pub dt: f32,
    /// Half the edge length of the cube boids spawn in.
    pub spawn_extent: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            boids: 4096,
            targets: 4,
            frames: 240,
            max_slice: Some(512),
            seed: 0x5eed,
            dt: 1.0 / 60.0,
            spawn_extent: 50.0,
        }
    }
}

impl DemoConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            boids: parse("BOIDS").unwrap_or(defaults.boids),
            targets: parse("TARGETS").unwrap_or(defaults.targets),
            frames: parse("FRAMES").unwrap_or(defaults.frames),
            max_slice: parse::<usize>("MAX_SLICE").map_or(defaults.max_slice, |m| (m > 0).then_some(m)),
            seed: parse("SEED").unwrap_or(defaults.seed),
            ..defaults
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
