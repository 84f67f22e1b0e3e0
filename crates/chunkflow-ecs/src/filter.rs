//! Filters - which chunks a pass runs over.
//!
//! An archetype matches when it owns every `all` component, at least one
//! `any` component (if any are listed), none of the `none` components, and
//! satisfies the shared constraints. Inside a matching archetype, empty
//! chunks are skipped, and a `changed` constraint keeps only chunks where a
//! listed component was written at or after `since`.

use smallvec::SmallVec;

use crate::{
    archetype::{Archetype, ComponentSet, SharedSet},
    chunk::{Chunk, ChunkSlice},
    component::{Component, ComponentId},
    entity::Entity,
    world::World,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangedSince {
    pub components: ComponentSet,
    pub since: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub all: ComponentSet,
    pub any: ComponentSet,
    pub none: ComponentSet,
    /// Components that must be found on one of the archetype's shared entities.
    pub shared_all: ComponentSet,
    /// Meta entities the archetype's shared set must contain.
    pub shared_with: SharedSet,
    pub changed: Option<ChangedSince>,
    matches_nothing: bool,
}

impl Filter {
    /// Start building a filter whose types resolve through `world`.
    #[must_use]
    pub fn builder(world: &World) -> FilterBuilder<'_> {
        FilterBuilder {
            world,
            filter: Self::default(),
            since: world.timestamp(),
            wants_changed: false,
        }
    }

    /// A filter on raw component ids.
    #[must_use]
    pub fn from_ids(all: &[ComponentId], any: &[ComponentId], none: &[ComponentId]) -> Self {
        Self {
            all: all.into(),
            any: any.into(),
            none: none.into(),
            ..Self::default()
        }
    }

    /// Restrict to chunks where one of `components` changed at or after `since`.
    #[must_use]
    pub fn changed_since(mut self, components: &[ComponentId], since: u64) -> Self {
        self.changed = Some(ChangedSince {
            components: components.into(),
            since,
        });
        self
    }

    /// Whether the filter can never match, e.g. it requires an unregistered type.
    #[must_use]
    pub const fn matches_nothing(&self) -> bool {
        self.matches_nothing
    }

    #[must_use]
    pub fn matches_archetype(&self, world: &World, archetype: &Archetype) -> bool {
        if self.matches_nothing {
            return false;
        }

        self.all.iter().all(|&id| archetype.contains(id))
            && (self.any.is_empty() || self.any.iter().any(|&id| archetype.contains(id)))
            && !self.none.iter().any(|&id| archetype.contains(id))
            && self
                .shared_with
                .iter()
                .all(|meta| archetype.shared().binary_search(meta).is_ok())
            && self
                .shared_all
                .iter()
                .all(|&id| world.shared_source(archetype.id(), id).is_some())
    }

    #[must_use]
    pub fn matches_chunk(&self, archetype: &Archetype, chunk: &Chunk) -> bool {
        if chunk.is_empty() {
            return false;
        }

        let Some(changed) = &self.changed else {
            return true;
        };
        changed.components.iter().any(|&id| {
            archetype
                .column_index(id)
                .is_some_and(|column| chunk.last_written(column) >= changed.since)
        })
    }
}

pub struct FilterBuilder<'w> {
    world: &'w World,
    filter: Filter,
    since: u64,
    wants_changed: bool,
}

impl FilterBuilder<'_> {
    /// Require `T`. An unregistered type makes the filter match nothing.
    #[must_use]
    pub fn all<T: Component>(mut self) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.filter.all.push(id),
            None => self.filter.matches_nothing = true,
        }
        self
    }

    #[must_use]
    pub fn any<T: Component>(mut self) -> Self {
        if let Some(id) = self.world.component_id::<T>() {
            self.filter.any.push(id);
        }
        self
    }

    #[must_use]
    pub fn none<T: Component>(mut self) -> Self {
        if let Some(id) = self.world.component_id::<T>() {
            self.filter.none.push(id);
        }
        self
    }

    /// Require `T` to be readable as a shared component.
    #[must_use]
    pub fn shared<T: Component>(mut self) -> Self {
        match self.world.component_id::<T>() {
            Some(id) => self.filter.shared_all.push(id),
            None => self.filter.matches_nothing = true,
        }
        self
    }

    /// Require `meta` among the archetype's shared entities.
    #[must_use]
    pub fn shared_with(mut self, meta: Entity) -> Self {
        self.filter.shared_with.push(meta);
        self
    }

    /// Only keep chunks where `T` was written at or after the `since`
    /// timestamp (the world's current one unless [`Self::since`] is called).
    #[must_use]
    pub fn changed<T: Component>(mut self) -> Self {
        self.wants_changed = true;
        if let Some(id) = self.world.component_id::<T>() {
            self.filter
                .changed
                .get_or_insert_with(|| ChangedSince {
                    components: SmallVec::new(),
                    since: 0,
                })
                .components
                .push(id);
        }
        self
    }

    #[must_use]
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = timestamp;
        self
    }

    #[must_use]
    pub fn build(self) -> Filter {
        let Self {
            mut filter,
            since,
            wants_changed,
            ..
        } = self;

        for set in [&mut filter.all, &mut filter.any, &mut filter.none, &mut filter.shared_all] {
            set.sort_unstable();
            set.dedup();
        }
        filter.shared_with.sort_unstable();
        filter.shared_with.dedup();

        match &mut filter.changed {
            Some(changed) => changed.since = since,
            // Every listed type was unregistered, so nothing was ever written.
            None if wants_changed => filter.matches_nothing = true,
            None => {}
        }

        filter
    }
}

impl World {
    /// Every non-empty chunk matching `filter`, as whole-chunk slices.
    #[must_use]
    pub fn matching_chunks(&self, filter: &Filter) -> Vec<ChunkSlice> {
        if filter.matches_nothing() {
            return Vec::new();
        }

        let mut slices = Vec::new();
        for archetype in self.archetypes().iter() {
            if !filter.matches_archetype(self, archetype) {
                continue;
            }
            for (index, chunk) in archetype.chunks().iter().enumerate() {
                if filter.matches_chunk(archetype, chunk) {
                    slices.push(ChunkSlice {
                        archetype: archetype.id(),
                        chunk: index,
                        start: 0,
                        count: chunk.len(),
                    });
                }
            }
        }
        slices
    }
}
