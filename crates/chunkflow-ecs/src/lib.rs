// Allow unsafe code in ECS - necessary for type-erased chunk storage
#![allow(unsafe_code)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::float_cmp)]

//! chunkflow ECS - archetype/chunk entity store
//!
//! Storage side of the chunkflow job pipeline.
//!
//! # Key Concepts
//!
//! - **Entity**: a generational handle `(index, generation)`
//! - **Component**: plain data registered with the world, stored column-wise
//! - **Archetype**: entities with the same component set and the same shared
//!   (meta) entities
//! - **Chunk**: a fixed-capacity block of rows inside an archetype, with a
//!   last-written timestamp per component
//! - **Filter**: `all`/`any`/`none` component lists, shared constraints and
//!   an optional change constraint
//!
//! # Example
//!
//! ```
//! use chunkflow_ecs::{EntityType, Filter, World};
//!
//! #[derive(Default)]
//! struct Position(f32);
//!
//! let mut world = World::new();
//! let pos = world.register::<Position>();
//! let slices = world.allocate(&EntityType::new(&[pos]), 3).unwrap();
//! world.slice_mut::<Position>(&slices[0]).unwrap()[0].0 = 1.0;
//!
//! let filter = Filter::builder(&world).all::<Position>().build();
//! assert_eq!(world.matching_chunks(&filter).len(), 1);
//! ```

mod archetype;
mod chunk;
mod component;
mod config;
mod entity;
mod error;
mod filter;
mod storage;
mod world;

pub use archetype::{Archetype, ArchetypeId, ArchetypeStorage, ComponentSet, EntityType, SharedSet};
pub use chunk::{Chunk, ChunkSlice};
pub use component::{Component, ComponentId, ComponentInfo, ComponentRegistry};
pub use config::{DEFAULT_CHUNK_BYTES, WorldConfig};
pub use entity::{Entity, EntityIndex, Generation};
pub use error::{EcsError, EcsResult};
pub use filter::{ChangedSince, Filter, FilterBuilder};
pub use storage::Column;
pub use world::{EntityLocation, World};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Component, Entity, EntityType, Filter, World};
}
