// Jobs borrow the world for a frame and are handed to a 'static pool
#![allow(unsafe_code)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]

//! chunkflow tasks - a data-parallel job pipeline over `chunkflow-ecs`
//!
//! Callers describe work as passes: a filter over chunks plus the components
//! and shared resources the work reads or writes. Units are ordered against
//! each other purely from those declarations and run on a worker pool.
//!
//! # Key Concepts
//!
//! - **Pass**: a filter resolved to matched chunk ranges, with declared access
//! - **CustomPass**: a unit with no entity data, ordered only by resources
//! - **Pipeline**: one frame of work; orders units and owns their events
//! - **Event**: completion handle of a unit
//! - **SharedResource**: an external value with declared read/write access
//!
//! # Example
//!
//! ```
//! use chunkflow_ecs::{EntityType, World};
//! use chunkflow_tasks::{Scheduler, SchedulerConfig};
//!
//! #[derive(Default, Clone, Copy)]
//! struct Position(f32);
//! #[derive(Default, Clone, Copy)]
//! struct Velocity(f32);
//!
//! let mut world = World::new();
//! let pos = world.register::<Position>();
//! let vel = world.register::<Velocity>();
//! let slices = world.allocate(&EntityType::new(&[pos, vel]), 3).unwrap();
//! world.slice_mut::<Velocity>(&slices[0]).unwrap().fill(Velocity(1.0));
//!
//! let scheduler = Scheduler::new(SchedulerConfig::with_workers(2)).unwrap();
//! scheduler.frame(&mut world, |ppl| {
//!     let filter = ppl.filter().all::<Position>().all::<Velocity>().build();
//!     let params = ppl.params().write::<Position>().read::<Velocity>().build();
//!     let pass = ppl.create_pass(&filter, params, &[]);
//!     ppl.schedule(pass, None, |op| {
//!         let vel = op.read::<Velocity>().unwrap();
//!         for (p, v) in op.write::<Position>().unwrap().iter_mut().zip(vel) {
//!             p.0 += v.0;
//!         }
//!     });
//! });
//!
//! assert!(world.slice::<Position>(&slices[0]).unwrap().iter().all(|p| p.0 == 1.0));
//! ```

mod access;
mod config;
mod error;
mod event;
mod operation;
mod pass;
mod pipeline;
mod resource;
mod scheduler;
mod tracker;

pub use access::{Access, Param, Params, ParamsBuilder, SharedAccess};
pub use config::{SchedulerConfig, WORKERS_ENV};
pub use error::{TaskError, TaskResult};
pub use event::Event;
pub use operation::Operation;
pub use pass::{CustomPass, Pass, PassRange, TaskSlice};
pub use pipeline::{Pipeline, SyncPass};
pub use resource::{ResourceId, SharedResource};
pub use scheduler::Scheduler;
pub use tracker::{AccessKey, Dependencies, DependencyTracker};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Access, Event, Operation, Pipeline, Scheduler, SchedulerConfig, SharedAccess, SharedResource,
    };
}
