//! Archetype storage - groups of entities with identical layouts.
//!
//! An archetype is identified by its sorted component set together with its
//! sorted set of shared (meta) entities. Its rows live in a list of
//! fixed-capacity [`Chunk`]s; new chunks are created whenever the existing
//! ones are full.

use std::fmt;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::{
    chunk::Chunk,
    component::{ComponentId, ComponentInfo, ComponentRegistry},
    entity::Entity,
    error::EcsResult,
};

pub type ComponentSet = SmallVec<[ComponentId; 8]>;
pub type SharedSet = SmallVec<[Entity; 4]>;

/// Unique identifier for an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// The layout an entity is allocated with: owned components plus shared
/// meta entities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntityType {
    components: ComponentSet,
    shared: SharedSet,
}

impl EntityType {
    /// Build a type from component ids. Order and duplicates don't matter.
    #[must_use]
    pub fn new(components: &[ComponentId]) -> Self {
        Self {
            components: normalize(components.iter().copied()),
            shared: SharedSet::new(),
        }
    }

    /// Attach shared meta entities whose components every row will see.
    #[must_use]
    pub fn with_shared(mut self, shared: &[Entity]) -> Self {
        self.shared = normalize(shared.iter().copied());
        self
    }

    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    #[must_use]
    pub fn shared(&self) -> &[Entity] {
        &self.shared
    }

    pub(crate) fn from_sets(components: ComponentSet, shared: SharedSet) -> Self {
        Self {
            components: normalize(components),
            shared: normalize(shared),
        }
    }
}

fn normalize<T: Ord, A: smallvec::Array<Item = T>>(
    items: impl IntoIterator<Item = T>,
) -> SmallVec<A> {
    let mut set: SmallVec<A> = items.into_iter().collect();
    set.sort_unstable();
    set.dedup();
    set
}

pub struct Archetype {
    id: ArchetypeId,
    entity_type: EntityType,
    /// Component infos in the same order as `entity_type.components`.
    infos: Vec<ComponentInfo>,
    component_indices: HashMap<ComponentId, usize, FxBuildHasher>,
    chunks: Vec<Chunk>,
    chunk_capacity: usize,
}

impl Archetype {
    fn new(
        id: ArchetypeId,
        entity_type: EntityType,
        registry: &ComponentRegistry,
        chunk_capacity: usize,
    ) -> EcsResult<Self> {
        let infos = registry.infos_for(&entity_type.components)?;
        let component_indices = infos
            .iter()
            .enumerate()
            .map(|(column, info)| (info.id(), column))
            .collect();

        Ok(Self {
            id,
            entity_type,
            infos,
            component_indices,
            chunks: Vec::new(),
            chunk_capacity,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    #[must_use]
    pub const fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Owned component ids, sorted.
    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        &self.entity_type.components
    }

    /// Shared meta entities, sorted.
    #[must_use]
    pub fn shared(&self) -> &[Entity] {
        &self.entity_type.shared
    }

    #[must_use]
    pub fn contains(&self, component_id: ComponentId) -> bool {
        self.component_indices.contains_key(&component_id)
    }

    /// Column index of a component inside every chunk of this archetype.
    #[must_use]
    pub fn column_index(&self, component_id: ComponentId) -> Option<usize> {
        self.component_indices.get(&component_id).copied()
    }

    #[must_use]
    pub fn infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub(crate) fn chunk_mut(&mut self, index: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(index)
    }

    #[must_use]
    pub const fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Total number of live entities across all chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Chunk::is_empty)
    }

    /// Index of the first chunk with a free row, creating one if all are full.
    pub(crate) fn chunk_with_space(&mut self, timestamp: u64) -> usize {
        if let Some(index) = self.chunks.iter().position(|chunk| !chunk.is_full()) {
            return index;
        }

        tracing::debug!(
            archetype = ?self.id,
            chunk = self.chunks.len(),
            capacity = self.chunk_capacity,
            "allocating chunk"
        );
        self.chunks
            .push(Chunk::new(&self.infos, self.chunk_capacity, timestamp));
        self.chunks.len() - 1
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.entity_type.components)
            .field("shared", &self.entity_type.shared)
            .field("chunks", &self.chunks.len())
            .field("entity_count", &self.len())
            .finish()
    }
}

/// Storage for all archetypes in a world.
#[derive(Default)]
pub struct ArchetypeStorage {
    archetypes: Vec<Archetype>,
    archetype_map: HashMap<EntityType, ArchetypeId, FxBuildHasher>,
}

impl ArchetypeStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the archetype for a (normalised) entity type.
    pub(crate) fn get_or_create(
        &mut self,
        entity_type: &EntityType,
        registry: &ComponentRegistry,
        chunk_capacity: impl FnOnce(&[ComponentInfo]) -> usize,
    ) -> EcsResult<ArchetypeId> {
        if let Some(&id) = self.archetype_map.get(entity_type) {
            return Ok(id);
        }

        let id = ArchetypeId::from_raw(self.archetypes.len() as u32);
        let mut archetype = Archetype::new(id, entity_type.clone(), registry, 1)?;
        archetype.chunk_capacity = chunk_capacity(&archetype.infos).max(1);

        tracing::debug!(
            ?id,
            components = ?entity_type.components,
            shared = ?entity_type.shared,
            chunk_capacity = archetype.chunk_capacity,
            "created archetype"
        );

        self.archetypes.push(archetype);
        self.archetype_map.insert(entity_type.clone(), id);

        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.as_raw() as usize)
    }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.as_raw() as usize)
    }

    /// Borrow two distinct archetypes mutably at once.
    ///
    /// # Panics
    ///
    /// Panics if `a == b` or either id is out of range.
    pub(crate) fn pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        let (a, b) = (a.as_raw() as usize, b.as_raw() as usize);
        assert_ne!(a, b, "pair_mut needs two distinct archetypes");
        if a < b {
            let (low, high) = self.archetypes.split_at_mut(b);
            (&mut low[a], &mut high[0])
        } else {
            let (low, high) = self.archetypes.split_at_mut(a);
            (&mut high[0], &mut low[b])
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Find the archetype for an entity type, if it exists.
    #[must_use]
    pub fn find(&self, entity_type: &EntityType) -> Option<ArchetypeId> {
        self.archetype_map.get(entity_type).copied()
    }
}

impl fmt::Debug for ArchetypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeStorage")
            .field("archetype_count", &self.archetypes.len())
            .finish()
    }
}
