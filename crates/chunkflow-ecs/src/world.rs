//! World - the entity store.
//!
//! The World owns every archetype and chunk, the handle table mapping an
//! [`Entity`] to its chunk and row, the component registry, and the frame
//! timestamp used for change detection.
//!
//! Structural changes (allocate, free, migration) need `&mut World`. The
//! task pipeline only ever hands workers a shared borrow.

use smallvec::SmallVec;

use crate::{
    archetype::{Archetype, ArchetypeId, ArchetypeStorage, EntityType},
    chunk::{Chunk, ChunkSlice},
    component::{Component, ComponentId, ComponentRegistry},
    config::WorldConfig,
    entity::{Entity, EntityAllocator},
    error::{EcsError, EcsResult},
};

/// Location of an entity within the archetype storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    /// Chunk index within the archetype.
    pub chunk: usize,
    /// Row within the chunk.
    pub row: usize,
}

pub struct World {
    config: WorldConfig,
    entities: EntityAllocator,
    /// Location per entity index, `None` for free indices.
    entity_meta: Vec<Option<EntityLocation>>,
    components: ComponentRegistry,
    archetypes: ArchetypeStorage,
    timestamp: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            config,
            entities: EntityAllocator::new(),
            entity_meta: Vec::new(),
            components: ComponentRegistry::new(),
            archetypes: ArchetypeStorage::new(),
            timestamp: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ==================== Timestamps ====================

    /// Current frame timestamp. Writes stamp chunks with this value.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Advance the frame timestamp and return the new value.
    pub fn advance_timestamp(&mut self) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    // ==================== Components ====================

    /// Register a component type. Idempotent.
    pub fn register<T: Component + Default>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    #[must_use]
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.components.get_id::<T>()
    }

    /// Like [`Self::component_id`], but an unregistered type is an error.
    pub fn require_id<T: Component>(&self) -> EcsResult<ComponentId> {
        self.component_id::<T>()
            .ok_or(EcsError::UnregisteredComponent(std::any::type_name::<T>()))
    }

    #[must_use]
    pub const fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    #[must_use]
    pub const fn archetypes(&self) -> &ArchetypeStorage {
        &self.archetypes
    }

    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    #[must_use]
    pub fn chunk(&self, archetype: ArchetypeId, chunk: usize) -> Option<&Chunk> {
        self.archetypes.get(archetype)?.chunk(chunk)
    }

    // ==================== Entity Operations ====================

    /// Reserve `count` entities of the given type.
    ///
    /// Non-full chunks are filled first; new chunks are created as needed.
    /// Every new row is default-initialised. Returns the slices actually
    /// allocated, in allocation order.
    pub fn allocate(&mut self, entity_type: &EntityType, count: usize) -> EcsResult<Vec<ChunkSlice>> {
        for &meta in entity_type.shared() {
            if !self.entities.is_alive(meta) {
                return Err(EcsError::StaleEntity(meta));
            }
        }

        let arch_id = self.archetype_for(entity_type)?;
        let timestamp = self.timestamp;
        let archetype = self
            .archetypes
            .get_mut(arch_id)
            .ok_or(EcsError::UnknownArchetype(arch_id))?;

        let mut slices = Vec::new();
        let mut remaining = count;

        while remaining > 0 {
            let chunk_idx = archetype.chunk_with_space(timestamp);
            let Some(chunk) = archetype.chunk_mut(chunk_idx) else {
                break;
            };

            let start = chunk.len();
            let batch = remaining.min(chunk.free_rows());
            for _ in 0..batch {
                let entity = self.entities.allocate();
                let row = chunk.push_default(entity);
                set_location(
                    &mut self.entity_meta,
                    entity,
                    EntityLocation {
                        archetype: arch_id,
                        chunk: chunk_idx,
                        row,
                    },
                );
            }
            chunk.stamp_all(timestamp);

            slices.push(ChunkSlice {
                archetype: arch_id,
                chunk: chunk_idx,
                start,
                count: batch,
            });
            remaining -= batch;
        }

        Ok(slices)
    }

    /// Allocate a single default-initialised entity.
    pub fn spawn(&mut self, entity_type: &EntityType) -> EcsResult<Entity> {
        let slices = self.allocate(entity_type, 1)?;
        let slice = slices[0];
        Ok(self.slice_entities(&slice)[0])
    }

    /// Free an entity.
    ///
    /// The generation at its index is bumped and the chunk's last live row is
    /// moved into the freed slot.
    pub fn free(&mut self, entity: Entity) -> EcsResult<()> {
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        let timestamp = self.timestamp;

        let chunk = self
            .archetypes
            .get_mut(location.archetype)
            .and_then(|archetype| archetype.chunk_mut(location.chunk))
            .ok_or(EcsError::StaleEntity(entity))?;

        // SAFETY: the location is live; every column of the row is dropped
        let moved = unsafe { chunk.swap_remove_with(location.row, |_| true) };
        if let Some(moved) = moved {
            chunk.stamp_all(timestamp);
            set_location(&mut self.entity_meta, moved, location);
        }

        self.entities.deallocate(entity);
        self.entity_meta[entity.index() as usize] = None;
        Ok(())
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    #[must_use]
    pub fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    /// Chunk and row of a live entity.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.entity_meta.get(entity.index() as usize).copied().flatten()
    }

    // ==================== Component Access ====================

    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        let (Some(location), Some(id)) = (self.location(entity), self.component_id::<T>()) else {
            return false;
        };
        self.archetypes
            .get(location.archetype)
            .is_some_and(|archetype| archetype.contains(id))
    }

    /// Read an owned component of a live entity.
    pub fn get_owned<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let (location, column) = self.resolve::<T>(entity)?;
        let chunk = self.chunk(location.archetype, location.chunk).ok_or(EcsError::StaleEntity(entity))?;

        // SAFETY: the row is live, T matches the column, and `&self` rules
        // out concurrent structural changes
        Ok(unsafe { &chunk.columns()[column].slice::<T>(location.row, 1)[0] })
    }

    /// Mutably borrow an owned component. Stamps the component's column.
    pub fn get_owned_mut<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        let (location, column) = self.resolve::<T>(entity)?;
        let timestamp = self.timestamp;
        let chunk = self.chunk(location.archetype, location.chunk).ok_or(EcsError::StaleEntity(entity))?;
        chunk.stamp(column, timestamp);

        // SAFETY: `&mut self` guarantees no other reference into the chunk
        Ok(unsafe { &mut chunk.columns()[column].slice_mut::<T>(location.row, 1)[0] })
    }

    /// Read a component through the entity's shared meta entities.
    pub fn get_shared<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        let id = self.require_id::<T>()?;

        let (meta, _) = self
            .shared_source(location.archetype, id)
            .ok_or(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            })?;
        self.get_owned::<T>(meta)
    }

    /// The first live shared entity of `archetype` that owns `component`.
    #[must_use]
    pub fn shared_source(
        &self,
        archetype: ArchetypeId,
        component: ComponentId,
    ) -> Option<(Entity, EntityLocation)> {
        self.archetypes.get(archetype)?.shared().iter().find_map(|&meta| {
            let location = self.location(meta)?;
            self.archetypes
                .get(location.archetype)?
                .contains(component)
                .then_some((meta, location))
        })
    }

    /// Typed view of the rows of a slice.
    ///
    /// Returns `None` if the slice's archetype lacks `T` or is out of range.
    #[must_use]
    pub fn slice<T: Component>(&self, slice: &ChunkSlice) -> Option<&[T]> {
        let (chunk, column) = self.slice_column::<T>(slice)?;
        // SAFETY: the range is live and T matches the column
        Some(unsafe { chunk.columns()[column].slice::<T>(slice.start, slice.count) })
    }

    /// Mutable typed view of the rows of a slice. Stamps the column.
    pub fn slice_mut<T: Component>(&mut self, slice: &ChunkSlice) -> Option<&mut [T]> {
        let timestamp = self.timestamp;
        let (chunk, column) = self.slice_column::<T>(slice)?;
        chunk.stamp(column, timestamp);
        // SAFETY: `&mut self` guarantees exclusive access to the range
        Some(unsafe { chunk.columns()[column].slice_mut::<T>(slice.start, slice.count) })
    }

    /// Entity handles of the rows of a slice.
    #[must_use]
    pub fn slice_entities(&self, slice: &ChunkSlice) -> &[Entity] {
        self.chunk(slice.archetype, slice.chunk)
            .and_then(|chunk| chunk.entities().get(slice.start..slice.end()))
            .unwrap_or_default()
    }

    // ==================== Migration ====================

    /// Add or overwrite a component, moving the entity to a new archetype
    /// when it does not own `T` yet.
    pub fn insert<T: Component + Default>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        let id = self.register::<T>();
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        let archetype = self.archetype_ref(location.archetype)?;

        if !archetype.contains(id) {
            let mut components: SmallVec<[ComponentId; 8]> = archetype.components().into();
            components.push(id);
            let target = EntityType::from_sets(components, archetype.shared().into());
            self.migrate(entity, location, &target)?;
        }

        *self.get_owned_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Remove a component, moving the entity to the archetype without it.
    pub fn remove<T: Component + Default>(&mut self, entity: Entity) -> EcsResult<T> {
        let value = std::mem::take(self.get_owned_mut::<T>(entity)?);
        let id = self.require_id::<T>()?;
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        let archetype = self.archetype_ref(location.archetype)?;

        let components: SmallVec<[ComponentId; 8]> = archetype
            .components()
            .iter()
            .copied()
            .filter(|&c| c != id)
            .collect();
        let target = EntityType::from_sets(components, archetype.shared().into());
        self.migrate(entity, location, &target)?;

        Ok(value)
    }

    /// Replace the shared meta entities of an entity.
    pub fn set_shared(&mut self, entity: Entity, shared: &[Entity]) -> EcsResult<()> {
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        for &meta in shared {
            if !self.entities.is_alive(meta) {
                return Err(EcsError::StaleEntity(meta));
            }
        }

        let archetype = self.archetype_ref(location.archetype)?;
        let target = EntityType::from_sets(archetype.components().into(), shared.into());
        self.migrate(entity, location, &target)?;
        Ok(())
    }

    /// Move `entity` from `source` into the archetype for `target`.
    ///
    /// Components present in both archetypes are moved bit-for-bit, new ones
    /// are default-initialised and dropped ones are dropped. Every column of
    /// the destination chunk is stamped.
    fn migrate(
        &mut self,
        entity: Entity,
        source: EntityLocation,
        target: &EntityType,
    ) -> EcsResult<EntityLocation> {
        let dst_id = self.archetype_for(target)?;
        if dst_id == source.archetype {
            return Ok(source);
        }

        let timestamp = self.timestamp;
        let (src_arch, dst_arch) = self.archetypes.pair_mut(source.archetype, dst_id);

        // Source column feeding each destination column.
        let feeds: SmallVec<[Option<usize>; 8]> = dst_arch
            .components()
            .iter()
            .map(|&id| src_arch.column_index(id))
            .collect();
        // Source columns that survive the move.
        let kept: SmallVec<[bool; 8]> = src_arch
            .components()
            .iter()
            .map(|&id| dst_arch.contains(id))
            .collect();

        let dst_chunk_idx = dst_arch.chunk_with_space(timestamp);
        let (Some(src_chunk), Some(dst_chunk)) = (
            src_arch.chunk_mut(source.chunk),
            dst_arch.chunk_mut(dst_chunk_idx),
        ) else {
            return Err(EcsError::StaleEntity(entity));
        };

        // SAFETY: every destination column is initialised in the loop below
        let dst_row = unsafe { dst_chunk.push_uninit(entity) };
        for (dst_col, feed) in feeds.iter().enumerate() {
            let column = &mut dst_chunk.columns_mut()[dst_col];
            // SAFETY: dst_row was just reserved; source rows are live and of
            // the same component type
            unsafe {
                match feed {
                    Some(src_col) => src_chunk.columns()[*src_col].move_to(source.row, column, dst_row),
                    None => column.write_default(dst_row),
                }
            }
        }
        dst_chunk.stamp_all(timestamp);

        // SAFETY: kept columns were moved out above, the rest are dropped
        let moved = unsafe { src_chunk.swap_remove_with(source.row, |col| !kept[col]) };
        if moved.is_some() {
            src_chunk.stamp_all(timestamp);
        }

        let destination = EntityLocation {
            archetype: dst_id,
            chunk: dst_chunk_idx,
            row: dst_row,
        };
        if let Some(moved) = moved {
            set_location(&mut self.entity_meta, moved, source);
        }
        set_location(&mut self.entity_meta, entity, destination);

        tracing::trace!(%entity, from = ?source.archetype, to = ?dst_id, "migrated entity");
        Ok(destination)
    }

    // ==================== Internals ====================

    fn archetype_for(&mut self, entity_type: &EntityType) -> EcsResult<ArchetypeId> {
        let config = &self.config;
        self.archetypes
            .get_or_create(entity_type, &self.components, |infos| config.rows_for(infos))
    }

    fn archetype_ref(&self, id: ArchetypeId) -> EcsResult<&Archetype> {
        self.archetypes
            .get(id)
            .ok_or(EcsError::UnknownArchetype(id))
    }

    /// Location and column index of `T` for a live entity.
    fn resolve<T: Component>(&self, entity: Entity) -> EcsResult<(EntityLocation, usize)> {
        let location = self.location(entity).ok_or(EcsError::StaleEntity(entity))?;
        let id = self.require_id::<T>()?;
        let column = self
            .archetypes
            .get(location.archetype)
            .and_then(|archetype| archetype.column_index(id))
            .ok_or(EcsError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            })?;
        Ok((location, column))
    }

    fn slice_column<T: Component>(&self, slice: &ChunkSlice) -> Option<(&Chunk, usize)> {
        let id = self.component_id::<T>()?;
        let archetype = self.archetypes.get(slice.archetype)?;
        let column = archetype.column_index(id)?;
        let chunk = archetype.chunk(slice.chunk)?;
        (slice.end() <= chunk.len()).then_some((chunk, column))
    }
}

fn set_location(meta: &mut Vec<Option<EntityLocation>>, entity: Entity, location: EntityLocation) {
    let index = entity.index() as usize;
    if index >= meta.len() {
        meta.resize(index + 1, None);
    }
    meta[index] = Some(location);
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("archetype_count", &self.archetypes.len())
            .field("component_count", &self.components.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
