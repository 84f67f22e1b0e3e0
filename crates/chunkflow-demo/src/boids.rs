//! Flocking over the task pipeline.
//!
//! Each frame copies boid positions and headings into flat buffers, builds
//! a uniform grid over them in a custom pass, steers every boid from its
//! grid neighbors and the nearest target, and finally integrates positions.
//! Targets orbit the origin in a pass of their own.

use chunkflow_ecs::{EcsResult, Entity, EntityType, Filter, World};
use chunkflow_tasks::{Pipeline, SharedResource};
use hashbrown::HashMap;
use rand::Rng;
use rustc_hash::FxBuildHasher;
use tracing::{debug, info};

use crate::config::DemoConfig;

pub type Vec3 = [f32; 3];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Translation(pub Vec3);

/// Unit direction of travel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Heading(pub Vec3);

/// Something the flock chases. Orbits the origin at `angular_speed` rad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Target {
    pub angular_speed: f32,
}

/// Flock tuning, shared by every boid through one meta entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoidSettings {
    pub cell_radius: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub target_weight: f32,
    pub move_speed: f32,
    /// Fraction of the way a heading turns toward its steer per frame.
    pub turn_rate: f32,
}

impl Default for BoidSettings {
    fn default() -> Self {
        Self {
            cell_radius: 8.0,
            separation_weight: 1.0,
            alignment_weight: 1.0,
            target_weight: 2.0,
            move_speed: 25.0,
            turn_rate: 0.1,
        }
    }
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: Vec3, s: f32) -> Vec3 {
    v.map(|c| c * s)
}

fn length(v: Vec3) -> f32 {
    v.iter().map(|c| c * c).sum::<f32>().sqrt()
}

fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let len = length(v);
    if len > f32::EPSILON { scale(v, 1.0 / len) } else { fallback }
}

type CellKey = [i32; 3];

fn cell_of(p: Vec3, cell_size: f32) -> CellKey {
    p.map(|c| (c / cell_size).floor() as i32)
}

/// Uniform grid over the copied boid positions.
#[derive(Debug, Default)]
pub struct Grid {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<u32>, FxBuildHasher>,
}

impl Grid {
    pub fn rebuild(&mut self, positions: &[Vec3], cell_size: f32) {
        self.cell_size = cell_size.max(f32::EPSILON);
        self.cells.clear();
        for (index, &p) in positions.iter().enumerate() {
            self.cells
                .entry(cell_of(p, self.cell_size))
                .or_default()
                .push(index as u32);
        }
    }

    /// Number of non-empty cells.
    pub fn occupied(&self) -> usize {
        self.cells.len()
    }

    /// Indices in the cell containing `p` and the 26 around it.
    pub fn neighbors(&self, p: Vec3) -> impl Iterator<Item = usize> + '_ {
        let [x, y, z] = cell_of(p, self.cell_size);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).flat_map(move |dy| (-1..=1).map(move |dz| [x + dx, y + dy, z + dz])))
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .map(|&index| index as usize)
    }
}

/// Per-frame buffers shared between passes.
#[derive(Clone)]
pub struct Flock {
    positions: SharedResource<Vec<Vec3>>,
    headings: SharedResource<Vec<Vec3>>,
    targets: SharedResource<Vec<Vec3>>,
    grid: SharedResource<Grid>,
}

impl Flock {
    pub fn new() -> Self {
        Self {
            positions: SharedResource::new(Vec::new()),
            headings: SharedResource::new(Vec::new()),
            targets: SharedResource::new(Vec::new()),
            grid: SharedResource::new(Grid::default()),
        }
    }
}

impl Default for Flock {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a boid looks at while steering.
struct Neighborhood<'a> {
    positions: &'a [Vec3],
    headings: &'a [Vec3],
    targets: &'a [Vec3],
    grid: &'a Grid,
}

impl Neighborhood<'_> {
    fn steer(&self, settings: &BoidSettings, me: usize, position: Vec3, heading: Vec3) -> Vec3 {
        let mut separation = [0.0; 3];
        let mut alignment = [0.0; 3];
        let mut neighbors = 0_u32;

        for other in self.grid.neighbors(position) {
            if other == me {
                continue;
            }
            let away = sub(position, self.positions[other]);
            let distance = length(away);
            if distance > 0.0 && distance < settings.cell_radius {
                separation = add(separation, scale(away, 1.0 / distance));
                alignment = add(alignment, self.headings[other]);
                neighbors += 1;
            }
        }

        let seek = self
            .targets
            .iter()
            .map(|&t| sub(t, position))
            .min_by(|a, b| length(*a).total_cmp(&length(*b)))
            .map_or([0.0; 3], |v| normalize_or(v, [0.0; 3]));

        let mut desired = scale(seek, settings.target_weight);
        if neighbors > 0 {
            desired = add(desired, scale(normalize_or(separation, [0.0; 3]), settings.separation_weight));
            desired = add(desired, scale(normalize_or(alignment, [0.0; 3]), settings.alignment_weight));
        }

        let desired = normalize_or(desired, heading);
        normalize_or(add(heading, scale(sub(desired, heading), settings.turn_rate)), heading)
    }
}

/// Spawn the settings meta entity, the boids and the targets. Returns the
/// meta entity.
pub fn spawn(world: &mut World, config: &DemoConfig, rng: &mut impl Rng) -> EcsResult<Entity> {
    let translation = world.register::<Translation>();
    let heading = world.register::<Heading>();
    let target = world.register::<Target>();
    let settings = world.register::<BoidSettings>();

    let meta = world.spawn(&EntityType::new(&[settings]))?;

    let extent = config.spawn_extent;
    let boid_type = EntityType::new(&[translation, heading]).with_shared(&[meta]);
    for slice in world.allocate(&boid_type, config.boids)? {
        if let Some(translations) = world.slice_mut::<Translation>(&slice) {
            for t in translations {
                t.0 = [0, 1, 2].map(|_| rng.gen_range(-extent..extent));
            }
        }
        if let Some(headings) = world.slice_mut::<Heading>(&slice) {
            for h in headings {
                let raw = [0, 1, 2].map(|_| rng.gen_range(-1.0..1.0));
                h.0 = normalize_or(raw, [0.0, 0.0, 1.0]);
            }
        }
    }

    for slice in world.allocate(&EntityType::new(&[translation, target]), config.targets)? {
        if let Some(translations) = world.slice_mut::<Translation>(&slice) {
            for t in translations {
                let angle = rng.gen_range(0.0..std::f32::consts::TAU);
                t.0 = [angle.cos() * extent, 0.0, angle.sin() * extent];
            }
        }
        if let Some(targets) = world.slice_mut::<Target>(&slice) {
            for t in targets {
                t.angular_speed = rng.gen_range(0.2..0.8);
            }
        }
    }

    info!(boids = config.boids, targets = config.targets, "spawned flock");
    Ok(meta)
}

/// Schedule one frame of flocking. With `report` set, waits for the grid
/// build and returns its occupied cell count.
pub fn schedule_frame(
    ppl: &mut Pipeline<'_>,
    flock: &Flock,
    meta: Entity,
    config: &DemoConfig,
    report: bool,
) -> Option<usize> {
    let cell_radius = ppl
        .world()
        .get_owned::<BoidSettings>(meta)
        .map_or(BoidSettings::default().cell_radius, |s| s.cell_radius);
    let dt = config.dt;
    let max_slice = config.max_slice;

    let boids = ppl
        .filter()
        .all::<Translation>()
        .all::<Heading>()
        .shared::<BoidSettings>()
        .build();
    let targets = ppl.filter().all::<Translation>().all::<Target>().build();

    ppl.set_on_sync(|passes| {
        for custom in passes {
            debug!(pass = custom.pass.index(), "waiting on custom pass");
            custom.event.wait();
        }
    });

    // Copy boids into flat buffers, indexed by position within the pass.
    // Later passes over the same filter see the same offsets.
    let copy = ppl.create_pass(
        &boids,
        ppl.params().read::<Translation>().read::<Heading>().build(),
        &[flock.positions.write_access(), flock.headings.write_access()],
    );
    flock.positions.write().resize(copy.entity_count(), [0.0; 3]);
    flock.headings.write().resize(copy.entity_count(), [0.0; 3]);
    {
        let (positions, headings) = (flock.positions.clone(), flock.headings.clone());
        ppl.schedule(copy, max_slice, move |op| {
            let (Some(translations), Some(dirs)) = (op.read::<Translation>(), op.read::<Heading>()) else {
                return;
            };
            let rows = op.index()..op.index() + op.count();
            if let Some(mut out) = op.resource_mut(&positions) {
                for (dst, t) in out[rows.clone()].iter_mut().zip(translations) {
                    *dst = t.0;
                }
            }
            if let Some(mut out) = op.resource_mut(&headings) {
                for (dst, h) in out[rows].iter_mut().zip(dirs) {
                    *dst = h.0;
                }
            }
        });
    }

    let copy_targets = ppl.create_pass(
        &targets,
        ppl.params().read::<Translation>().build(),
        &[flock.targets.write_access()],
    );
    flock.targets.write().resize(copy_targets.entity_count(), [0.0; 3]);
    {
        let targets = flock.targets.clone();
        ppl.schedule(copy_targets, None, move |op| {
            let (Some(translations), Some(mut out)) = (op.read::<Translation>(), op.resource_mut(&targets)) else {
                return;
            };
            for (dst, t) in out[op.index()..op.index() + op.count()].iter_mut().zip(translations) {
                *dst = t.0;
            }
        });
    }

    let orbit = ppl.create_pass(
        &targets,
        ppl.params().write::<Translation>().read::<Target>().build(),
        &[],
    );
    ppl.schedule(orbit, None, move |op| {
        let (Some(params), Some(translations)) = (op.read::<Target>(), op.write::<Translation>()) else {
            return;
        };
        for (t, target) in translations.iter_mut().zip(params) {
            let (sin, cos) = (target.angular_speed * dt).sin_cos();
            let [x, y, z] = t.0;
            t.0 = [x * cos - z * sin, y, x * sin + z * cos];
        }
    });

    let build = ppl.create_custom_pass(&[flock.positions.read_access(), flock.grid.write_access()]);
    {
        let (positions, grid) = (flock.positions.clone(), flock.grid.clone());
        ppl.schedule_custom(build, move || {
            grid.write().rebuild(&positions.read(), cell_radius);
        });
    }

    let steer = ppl.create_pass(
        &boids,
        ppl.params()
            .read::<Translation>()
            .read::<BoidSettings>()
            .write::<Heading>()
            .build(),
        &[
            flock.positions.read_access(),
            flock.headings.read_access(),
            flock.targets.read_access(),
            flock.grid.read_access(),
        ],
    );
    {
        let flock = flock.clone();
        ppl.schedule(steer, max_slice, move |op| {
            let (Some(settings), Some(translations), Some(dirs)) = (
                op.shared::<BoidSettings>(),
                op.read::<Translation>(),
                op.write::<Heading>(),
            ) else {
                return;
            };
            let (Some(positions), Some(headings), Some(targets), Some(grid)) = (
                op.resource(&flock.positions),
                op.resource(&flock.headings),
                op.resource(&flock.targets),
                op.resource(&flock.grid),
            ) else {
                return;
            };
            let around = Neighborhood {
                positions: &positions,
                headings: &headings,
                targets: &targets,
                grid: &grid,
            };
            for (row, (t, h)) in translations.iter().zip(dirs).enumerate() {
                h.0 = around.steer(settings, op.index() + row, t.0, h.0);
            }
        });
    }

    let integrate = ppl.create_pass(
        &boids,
        ppl.params()
            .write::<Translation>()
            .read::<Heading>()
            .read::<BoidSettings>()
            .build(),
        &[],
    );
    ppl.schedule(integrate, max_slice, move |op| {
        let (Some(settings), Some(dirs), Some(translations)) = (
            op.shared::<BoidSettings>(),
            op.read::<Heading>(),
            op.write::<Translation>(),
        ) else {
            return;
        };
        let step = settings.move_speed * dt;
        for (t, h) in translations.iter_mut().zip(dirs) {
            t.0 = add(t.0, scale(h.0, step));
        }
    });

    report.then(|| {
        ppl.sync(&[flock.grid.read_access()]);
        flock.grid.read().occupied()
    })
}

/// Summary of the flock's current shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlockStats {
    pub boids: usize,
    pub centroid: Vec3,
    /// Mean distance from the centroid.
    pub spread: f32,
    /// Length of the mean heading; 1 when every boid flies the same way.
    pub alignment: f32,
}

pub fn stats(world: &World) -> Option<FlockStats> {
    let filter = Filter::builder(world)
        .all::<Translation>()
        .all::<Heading>()
        .shared::<BoidSettings>()
        .build();
    let slices = world.matching_chunks(&filter);

    let mut boids = 0_usize;
    let mut sum = [0.0; 3];
    let mut heading_sum = [0.0; 3];
    for slice in &slices {
        for t in world.slice::<Translation>(slice)? {
            sum = add(sum, t.0);
            boids += 1;
        }
        for h in world.slice::<Heading>(slice)? {
            heading_sum = add(heading_sum, h.0);
        }
    }
    if boids == 0 {
        return None;
    }

    let inv = 1.0 / boids as f32;
    let centroid = scale(sum, inv);
    let spread = slices
        .iter()
        .filter_map(|slice| world.slice::<Translation>(slice))
        .flatten()
        .map(|t| length(sub(t.0, centroid)))
        .sum::<f32>()
        * inv;

    Some(FlockStats {
        boids,
        centroid,
        spread,
        alignment: length(scale(heading_sum, inv)),
    })
}

#[cfg(test)]
mod tests {
    use chunkflow_tasks::{Scheduler, SchedulerConfig};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn small_config() -> DemoConfig {
        DemoConfig {
            boids: 300,
            targets: 2,
            frames: 4,
            max_slice: Some(32),
            ..DemoConfig::default()
        }
    }

    #[test]
    fn test_grid_neighbors_cover_adjacent_cells() {
        let mut grid = Grid::default();
        grid.rebuild(&[[0.5, 0.5, 0.5], [1.5, 0.5, 0.5], [10.0, 10.0, 10.0]], 1.0);

        let mut near: Vec<usize> = grid.neighbors([0.5, 0.5, 0.5]).collect();
        near.sort_unstable();
        assert_eq!(near, vec![0, 1]);
        assert_eq!(grid.occupied(), 3);
    }

    #[test]
    fn test_steer_keeps_unit_heading() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let headings = [[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]];
        let mut grid = Grid::default();
        grid.rebuild(&positions, 8.0);
        let around = Neighborhood {
            positions: &positions,
            headings: &headings,
            targets: &[[0.0, 0.0, 50.0]],
            grid: &grid,
        };

        let h = around.steer(&BoidSettings::default(), 0, positions[0], headings[0]);
        assert!((length(h) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_frames_move_every_boid() {
        let config = small_config();
        let scheduler = Scheduler::new(SchedulerConfig::with_workers(2)).unwrap();
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let meta = spawn(&mut world, &config, &mut rng).unwrap();
        let flock = Flock::new();

        let before = stats(&world).unwrap();
        let mut cells = None;
        for frame in 0..config.frames {
            cells = scheduler.frame(&mut world, |ppl| {
                schedule_frame(ppl, &flock, meta, &config, frame + 1 == config.frames)
            });
        }
        let after = stats(&world).unwrap();

        assert_eq!(after.boids, config.boids);
        assert!(length(sub(before.centroid, after.centroid)) > 0.0);
        assert!(cells.is_some_and(|c| c > 0));
        assert_eq!(flock.positions.read().len(), config.boids);
    }
}
