//! Integration tests for the chunkflow pipeline

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use chunkflow_ecs::{EntityType, World, WorldConfig};
use chunkflow_tasks::{Scheduler, SchedulerConfig, SharedResource};

// ============================================================================
// Test Components
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Counter(u32);

#[derive(Clone, Copy, Debug, Default)]
struct Marker;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Tuning {
    speed: f32,
}

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig::with_workers(workers)).unwrap()
}

fn world(chunk_capacity: usize) -> World {
    World::with_config(WorldConfig::with_chunk_capacity(chunk_capacity))
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn test_position_plus_velocity() {
    let mut world = world(16);
    let pos = world.register::<Position>();
    let vel = world.register::<Velocity>();
    let slices = world.allocate(&EntityType::new(&[pos, vel]), 3).unwrap();
    let slice = slices[0];

    for (i, p) in world.slice_mut::<Position>(&slice).unwrap().iter_mut().enumerate() {
        *p = Position { x: i as f32, y: 10.0 };
    }
    for (i, v) in world.slice_mut::<Velocity>(&slice).unwrap().iter_mut().enumerate() {
        *v = Velocity { x: 0.5, y: -(i as f32) };
    }

    scheduler(2).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().all::<Velocity>().build();
        let params = ppl.params().write::<Position>().read::<Velocity>().build();
        let pass = ppl.create_pass(&filter, params, &[]);
        assert_eq!(pass.entity_count(), 3);

        ppl.schedule(pass, None, |op| {
            let velocities = op.read::<Velocity>().unwrap();
            for (p, v) in op.write::<Position>().unwrap().iter_mut().zip(velocities) {
                p.x += v.x;
                p.y += v.y;
            }
        });
        ppl.wait();
    });

    let positions = world.slice::<Position>(&slice).unwrap();
    assert_eq!(
        positions,
        &[
            Position { x: 0.5, y: 10.0 },
            Position { x: 1.5, y: 9.0 },
            Position { x: 2.5, y: 8.0 },
        ]
    );
}

#[test]
fn test_kdtree_custom_pass_runs_after_copy() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    let slices = world.allocate(&EntityType::new(&[pos]), 20).unwrap();
    for slice in &slices {
        for p in world.slice_mut::<Position>(slice).unwrap() {
            p.x = 1.0;
        }
    }

    let positions = SharedResource::new(Vec::<f32>::new());
    let index = SharedResource::new(Vec::<f32>::new());
    let log = Mutex::new(Vec::new());

    scheduler(4).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().build();
        let params = ppl.params().read::<Position>().build();
        let copy = ppl.create_pass(&filter, params, &[positions.write_access()]);
        positions.write().resize(copy.entity_count(), 0.0);

        let copy_event = {
            let positions = positions.clone();
            let log = &log;
            ppl.schedule(copy, Some(3), move |op| {
                log.lock().unwrap().push("copy-start");
                thread::sleep(Duration::from_millis(2));
                let mut out = op.resource_mut(&positions).unwrap();
                for (i, p) in op.read::<Position>().unwrap().iter().enumerate() {
                    out[op.index() + i] = p.x;
                }
                log.lock().unwrap().push("copy-end");
            })
        };

        let build = ppl.create_custom_pass(&[positions.read_access(), index.write_access()]);
        let build_event = {
            let (positions, index, log) = (positions.clone(), index.clone(), &log);
            ppl.schedule_custom(build, move || {
                log.lock().unwrap().push("build");
                let mut sorted = positions.read().clone();
                sorted.sort_by(f32::total_cmp);
                *index.write() = sorted;
            })
        };

        build_event.wait();
        assert!(copy_event.is_complete());
    });

    let log = log.into_inner().unwrap();
    let build_at = log.iter().position(|&entry| entry == "build").unwrap();
    assert_eq!(build_at, log.len() - 1);
    let starts = log.iter().filter(|&&entry| entry == "copy-start").count();
    let ends = log.iter().filter(|&&entry| entry == "copy-end").count();
    // Seven tasks of at most three rows, two of them spanning a chunk border.
    assert_eq!((starts, ends), (9, 9));
    assert_eq!(*index.read(), vec![1.0; 20]);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_conflicting_passes_never_overlap() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    let vel = world.register::<Velocity>();
    let slices = world.allocate(&EntityType::new(&[pos, vel]), 40).unwrap();
    let mut next = 0.0;
    for slice in &slices {
        for p in world.slice_mut::<Position>(slice).unwrap() {
            p.x = next;
            next += 1.0;
        }
    }

    let intervals: Mutex<Vec<(usize, Instant, Instant)>> = Mutex::new(Vec::new());
    let velocity_sum = Mutex::new(0.0f32);

    scheduler(4).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().all::<Velocity>().build();
        let record = |unit: usize, start: Instant| {
            thread::sleep(Duration::from_micros(300));
            intervals.lock().unwrap().push((unit, start, Instant::now()));
        };

        let p0 = ppl.create_pass(&filter, ppl.params().write::<Position>().build(), &[]);
        ppl.schedule(p0, Some(5), move |op| {
            let start = Instant::now();
            op.write::<Position>().unwrap().iter_mut().for_each(|p| p.x += 1.0);
            record(0, start);
        });

        let p1 = ppl.create_pass(
            &filter,
            ppl.params().read::<Position>().write::<Velocity>().build(),
            &[],
        );
        ppl.schedule(p1, Some(7), move |op| {
            let start = Instant::now();
            let positions = op.read::<Position>().unwrap();
            for (v, p) in op.write::<Velocity>().unwrap().iter_mut().zip(positions) {
                v.x = p.x;
            }
            record(1, start);
        });

        let p2 = ppl.create_pass(&filter, ppl.params().write::<Position>().build(), &[]);
        ppl.schedule(p2, Some(3), move |op| {
            let start = Instant::now();
            op.write::<Position>().unwrap().iter_mut().for_each(|p| p.x *= 2.0);
            record(2, start);
        });

        let p3 = ppl.create_pass(&filter, ppl.params().read::<Velocity>().build(), &[]);
        let velocity_sum = &velocity_sum;
        ppl.schedule(p3, None, move |op| {
            let start = Instant::now();
            let sum: f32 = op.read::<Velocity>().unwrap().iter().map(|v| v.x).sum();
            *velocity_sum.lock().unwrap() += sum;
            record(3, start);
        });
    });

    let intervals = intervals.into_inner().unwrap();
    for (before, after) in [(0, 1), (0, 2), (1, 2), (1, 3)] {
        let last_end = intervals
            .iter()
            .filter(|(unit, ..)| *unit == before)
            .map(|&(_, _, end)| end)
            .max()
            .unwrap();
        let first_start = intervals
            .iter()
            .filter(|(unit, ..)| *unit == after)
            .map(|&(_, start, _)| start)
            .min()
            .unwrap();
        assert!(last_end <= first_start, "pass {after} overlapped pass {before}");
    }

    let mut expected = 0.0;
    for slice in &slices {
        for p in world.slice::<Position>(slice).unwrap() {
            expected += 1.0;
            assert_eq!(p.x, expected * 2.0);
        }
    }
    // Velocities hold the positions between the two writes: 1..=40.
    assert_eq!(velocity_sum.into_inner().unwrap(), (1..=40).sum::<i32>() as f32);
}

#[test]
fn test_zero_entity_pass_keeps_ordering() {
    let mut world = world(8);
    world.register::<Position>();
    world.register::<Marker>();

    let first = SharedResource::new(false);
    let second = SharedResource::new(false);
    let observed = AtomicBool::new(false);

    scheduler(4).frame(&mut world, |ppl| {
        let producer = ppl.create_custom_pass(&[first.write_access()]);
        let first_handle = first.clone();
        ppl.schedule_custom(producer, move || {
            thread::sleep(Duration::from_millis(20));
            *first_handle.write() = true;
        });

        // Matches nothing, but still sits between the two custom passes.
        let filter = ppl.filter().all::<Marker>().build();
        let empty = ppl.create_pass(
            &filter,
            ppl.params().read::<Marker>().build(),
            &[first.read_access(), second.write_access()],
        );
        assert_eq!(empty.entity_count(), 0);
        ppl.schedule(empty, Some(4), |_| unreachable!("no rows to visit"));

        let consumer = ppl.create_custom_pass(&[second.read_access()]);
        let (first, observed) = (first.clone(), &observed);
        ppl.schedule_custom(consumer, move || {
            observed.store(*first.read(), Ordering::SeqCst);
        });
    });

    assert!(observed.load(Ordering::SeqCst));
}

#[test]
fn test_shared_component_reads_follow_writer() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    let tuning = world.register::<Tuning>();

    let meta = world.spawn(&EntityType::new(&[tuning])).unwrap();
    world
        .allocate(&EntityType::new(&[pos]).with_shared(&[meta]), 12)
        .unwrap();

    scheduler(4).frame(&mut world, |ppl| {
        let tuning_filter = ppl.filter().all::<Tuning>().build();
        let tune = ppl.create_pass(&tuning_filter, ppl.params().write::<Tuning>().build(), &[]);
        ppl.schedule(tune, None, |op| {
            thread::sleep(Duration::from_millis(10));
            op.write::<Tuning>().unwrap()[0].speed = 3.0;
        });

        let boids = ppl.filter().all::<Position>().shared::<Tuning>().build();
        let params = ppl.params().write::<Position>().read::<Tuning>().build();
        let steer = ppl.create_pass(&boids, params, &[]);
        assert_eq!(steer.entity_count(), 12);
        ppl.schedule(steer, Some(5), |op| {
            let speed = op.shared::<Tuning>().unwrap().speed;
            op.write::<Position>().unwrap().iter_mut().for_each(|p| p.x = speed);
        });
    });

    let filter = chunkflow_ecs::Filter::builder(&world).all::<Position>().build();
    for slice in world.matching_chunks(&filter) {
        assert!(world.slice::<Position>(&slice).unwrap().iter().all(|p| p.x == 3.0));
    }
}

#[test]
fn test_shared_hidden_from_pass_writing_it() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    let tuning = world.register::<Tuning>();

    let meta = world.spawn(&EntityType::new(&[tuning])).unwrap();
    world
        .allocate(&EntityType::new(&[pos]).with_shared(&[meta]), 4)
        .unwrap();

    let owned_writes = AtomicUsize::new(0);
    let shared_reads = AtomicUsize::new(0);
    let boid_ops = AtomicUsize::new(0);

    scheduler(4).frame(&mut world, |ppl| {
        let filter = ppl.filter().any::<Tuning>().any::<Position>().build();
        let pass = ppl.create_pass(&filter, ppl.params().write::<Tuning>().build(), &[]);
        assert_eq!(pass.entity_count(), 5);

        let (owned_writes, shared_reads, boid_ops) = (&owned_writes, &shared_reads, &boid_ops);
        ppl.schedule(pass, Some(1), move |op| {
            if let Some(tunings) = op.write::<Tuning>() {
                thread::sleep(Duration::from_millis(20));
                tunings[0].speed = 2.0;
                owned_writes.fetch_add(1, Ordering::SeqCst);
            } else {
                boid_ops.fetch_add(1, Ordering::SeqCst);
                if op.shared::<Tuning>().is_some() {
                    shared_reads.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
    });

    assert_eq!(owned_writes.load(Ordering::SeqCst), 1);
    assert_eq!(boid_ops.load(Ordering::SeqCst), 4);
    assert_eq!(shared_reads.load(Ordering::SeqCst), 0);
    assert_eq!(world.get_owned::<Tuning>(meta).unwrap().speed, 2.0);
}

// ============================================================================
// Slicing
// ============================================================================

#[test]
fn test_slicing_visits_every_entity_once() {
    for workers in [1, 2, 4] {
        let scheduler = scheduler(workers);
        for max_slice in [Some(1), Some(3), Some(7), Some(64), None] {
            let mut world = world(8);
            let counter = world.register::<Counter>();
            let marker = world.register::<Marker>();
            world.allocate(&EntityType::new(&[counter]), 30).unwrap();
            world.allocate(&EntityType::new(&[counter, marker]), 20).unwrap();

            let seen = Mutex::new(Vec::new());
            let tasks = AtomicUsize::new(0);

            scheduler.frame(&mut world, |ppl| {
                let filter = ppl.filter().all::<Counter>().build();
                let pass = ppl.create_pass(&filter, ppl.params().write::<Counter>().build(), &[]);
                assert_eq!(pass.entity_count(), 50);
                let (seen, tasks) = (&seen, &tasks);
                ppl.schedule(pass, max_slice, move |op| {
                    tasks.fetch_add(1, Ordering::Relaxed);
                    if let Some(limit) = max_slice {
                        assert!(op.count() <= limit);
                    }
                    for c in op.write::<Counter>().unwrap() {
                        c.0 += 1;
                    }
                    seen.lock().unwrap().extend(op.index()..op.index() + op.count());
                });
            });

            let mut seen = seen.into_inner().unwrap();
            seen.sort_unstable();
            assert_eq!(seen, (0..50).collect::<Vec<_>>(), "workers={workers} max_slice={max_slice:?}");
            assert!(tasks.load(Ordering::Relaxed) >= 7);

            let filter = chunkflow_ecs::Filter::builder(&world).all::<Counter>().build();
            for slice in world.matching_chunks(&filter) {
                assert!(world.slice::<Counter>(&slice).unwrap().iter().all(|c| c.0 == 1));
            }
        }
    }
}

// ============================================================================
// Change detection
// ============================================================================

#[test]
fn test_changed_since_round_trip() {
    let mut world = world(4);
    let pos = world.register::<Position>();
    let marker = world.register::<Marker>();
    world.allocate(&EntityType::new(&[pos]), 8).unwrap();
    world.allocate(&EntityType::new(&[pos, marker]), 3).unwrap();
    let scheduler = scheduler(2);

    let written_at = scheduler.frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().all::<Marker>().build();
        let pass = ppl.create_pass(&filter, ppl.params().write::<Position>().build(), &[]);
        ppl.schedule(pass, None, |op| {
            op.write::<Position>().unwrap().iter_mut().for_each(|p| p.y = 1.0);
        });
        ppl.timestamp()
    });

    scheduler.frame(&mut world, |ppl| {
        let changed = ppl.filter().changed::<Position>().since(written_at).build();
        let pass = ppl.create_pass(&changed, ppl.params().read::<Position>().build(), &[]);
        assert_eq!(pass.entity_count(), 3);

        let this_frame = ppl.filter().changed::<Position>().build();
        let pass = ppl.create_pass(&this_frame, ppl.params().read::<Position>().build(), &[]);
        assert_eq!(pass.entity_count(), 0);
    });
}

// ============================================================================
// Sync hook
// ============================================================================

#[test]
fn test_sync_hands_custom_passes_to_hook() {
    let mut world = world(8);
    world.register::<Position>();
    let table = SharedResource::new(Vec::<u32>::new());
    let hooked = Mutex::new(Vec::new());

    scheduler(2).frame(&mut world, |ppl| {
        let hooked = &hooked;
        ppl.set_on_sync(move |passes| {
            for sync in passes {
                hooked.lock().unwrap().push(sync.pass.index());
                sync.event.wait();
            }
        });

        let fill = ppl.create_custom_pass(&[table.write_access()]);
        let fill_index = fill.index();
        let handle = table.clone();
        ppl.schedule_custom(fill, move || {
            thread::sleep(Duration::from_millis(10));
            handle.write().extend([1, 2, 3]);
        });

        let unrelated = ppl.create_custom_pass(&[]);
        ppl.schedule_custom(unrelated, || {});

        ppl.sync(&[table.read_access()]);
        assert_eq!(*table.read(), vec![1, 2, 3]);
        assert_eq!(*hooked.lock().unwrap(), vec![fill_index]);
    });
}

#[test]
fn test_sync_waits_plain_passes_directly() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    world.allocate(&EntityType::new(&[pos]), 4).unwrap();
    let total = SharedResource::new(0.0f32);
    let hook_calls = AtomicUsize::new(0);

    scheduler(2).frame(&mut world, |ppl| {
        let hook_calls = &hook_calls;
        ppl.set_on_sync(move |_| {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        let filter = ppl.filter().all::<Position>().build();
        let pass = ppl.create_pass(
            &filter,
            ppl.params().read::<Position>().build(),
            &[total.write_access()],
        );
        let handle = total.clone();
        let event = ppl.schedule(pass, None, move |op| {
            thread::sleep(Duration::from_millis(5));
            *op.resource_mut(&handle).unwrap() += op.count() as f32;
        });

        ppl.sync(&[total.read_access()]);
        assert!(event.is_complete());
        assert_eq!(*total.read(), 4.0);
    });

    assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_without_hook_waits_custom_passes() {
    let mut world = world(8);
    world.register::<Position>();
    let table = SharedResource::new(Vec::<u32>::new());
    let other = SharedResource::new(0u32);

    scheduler(2).frame(&mut world, |ppl| {
        let fill = ppl.create_custom_pass(&[table.write_access()]);
        let handle = table.clone();
        let filled = ppl.schedule_custom(fill, move || {
            thread::sleep(Duration::from_millis(20));
            handle.write().extend([4, 5]);
        });

        let gate = ppl.create_custom_pass(&[other.write_access()]);
        let release = SharedResource::new(false);
        let release_handle = release.clone();
        let gated = ppl.schedule_custom(gate, move || {
            let started = Instant::now();
            while !*release_handle.read() && started.elapsed() < Duration::from_secs(5) {
                thread::sleep(Duration::from_millis(1));
            }
        });

        ppl.sync(&[table.read_access()]);
        assert!(filled.is_complete());
        assert_eq!(*table.read(), vec![4, 5]);
        // A custom pass on an unrelated resource is not waited on.
        assert!(!gated.is_complete());

        *release.write() = true;
        gated.wait();
    });
}

// ============================================================================
// Access checks and failures
// ============================================================================

#[test]
fn test_undeclared_access_reads_none() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    let vel = world.register::<Velocity>();
    world.allocate(&EntityType::new(&[pos, vel]), 2).unwrap();
    let other = SharedResource::new(0u8);
    let checked = AtomicUsize::new(0);

    scheduler(1).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().build();
        let pass = ppl.create_pass(&filter, ppl.params().read::<Position>().build(), &[]);
        let (other, checked) = (other.clone(), &checked);
        ppl.schedule(pass, None, move |op| {
            assert!(op.read::<Position>().is_some());
            assert!(op.write::<Position>().is_none());
            assert!(op.read::<Velocity>().is_none());
            assert!(op.shared::<Tuning>().is_none());
            assert!(op.resource(&other).is_none());
            checked.fetch_add(1, Ordering::SeqCst);
        });
    });

    assert_eq!(checked.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "already borrowed")]
fn test_double_mutable_borrow_panics() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    world.allocate(&EntityType::new(&[pos]), 1).unwrap();

    scheduler(1).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().build();
        let pass = ppl.create_pass(&filter, ppl.params().write::<Position>().build(), &[]);
        ppl.schedule(pass, None, |op| {
            let _first = op.write::<Position>();
            let _second = op.write::<Position>();
        });
    });
}

#[test]
#[should_panic(expected = "boom")]
fn test_task_panic_reaches_caller() {
    let mut world = world(8);
    let pos = world.register::<Position>();
    world.allocate(&EntityType::new(&[pos]), 3).unwrap();

    scheduler(2).frame(&mut world, |ppl| {
        let filter = ppl.filter().all::<Position>().build();
        let pass = ppl.create_pass(&filter, ppl.params().read::<Position>().build(), &[]);
        ppl.schedule(pass, None, |_| panic!("boom"));
    });
}

#[test]
fn test_frame_advances_timestamp() {
    let mut world = world(8);
    let scheduler = scheduler(1);
    let before = world.timestamp();

    let inside = scheduler.frame(&mut world, |ppl| ppl.timestamp());
    scheduler.frame(&mut world, |_| {});

    assert_eq!(inside, before + 1);
    assert_eq!(world.timestamp(), before + 2);
}
