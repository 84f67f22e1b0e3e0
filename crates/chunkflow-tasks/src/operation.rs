//! Per-range component access for task bodies.

use std::cell::RefCell;

use chunkflow_ecs::{Archetype, ArchetypeId, Chunk, Column, Component, ComponentId, Entity, World};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::{
    access::Access,
    pass::{Pass, PassRange},
    resource::{ResourceId, SharedResource},
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Borrow {
    Shared,
    Exclusive,
}

/// Typed view of one chunk range handed to a task body.
///
/// Only components declared in the pass's parameter list are reachable;
/// anything else reads as `None`. Borrowing a component mutably while it is
/// already borrowed from the same operation panics.
pub struct Operation<'a> {
    world: &'a World,
    pass: &'a Pass,
    archetype: &'a Archetype,
    chunk: &'a Chunk,
    range: PassRange,
    borrows: RefCell<SmallVec<[(ComponentId, Borrow); 8]>>,
}

impl<'a> Operation<'a> {
    pub(crate) fn new(world: &'a World, pass: &'a Pass, range: PassRange) -> Option<Self> {
        let archetype = world.archetype(range.slice.archetype)?;
        let chunk = archetype.chunk(range.slice.chunk)?;
        (range.slice.end() <= chunk.len()).then(|| Self {
            world,
            pass,
            archetype,
            chunk,
            range,
            borrows: RefCell::new(SmallVec::new()),
        })
    }

    /// Number of entities in this range.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.range.slice.count
    }

    /// Offset of the first row within the whole pass.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.range.offset
    }

    /// Index of the pass this operation belongs to.
    #[must_use]
    pub const fn pass_index(&self) -> usize {
        self.pass.index()
    }

    #[must_use]
    pub const fn archetype(&self) -> ArchetypeId {
        self.range.slice.archetype
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.chunk.entities()[self.range.slice.start..self.range.slice.end()]
    }

    /// Owned component `T` for every row, if declared and present.
    ///
    /// # Panics
    ///
    /// Panics if `T` is currently borrowed mutably from this operation.
    #[must_use]
    pub fn read<T: Component>(&self) -> Option<&[T]> {
        let (id, column) = self.column::<T>()?;
        self.borrow(id, Borrow::Shared);

        // SAFETY: the rows are live for the frame, the dependency graph
        // keeps writers of this column out, and the borrow flag above
        // rules out an aliasing `write` from this operation
        Some(unsafe { column.slice::<T>(self.range.slice.start, self.range.slice.count) })
    }

    /// Owned component `T` for every row, mutably. Requires a declared write.
    ///
    /// # Panics
    ///
    /// Panics if `T` is already borrowed from this operation.
    #[allow(clippy::mut_from_ref)]
    #[must_use]
    pub fn write<T: Component>(&self) -> Option<&mut [T]> {
        let (id, column) = self.column::<T>()?;
        if !self.pass.params().get(id)?.is_write() {
            return None;
        }
        self.borrow(id, Borrow::Exclusive);

        // SAFETY: no other task touches this range of the column (ranges of
        // one pass are disjoint, other passes are ordered by the graph) and
        // the borrow flag rules out a second view from this operation
        Some(unsafe { column.slice_mut::<T>(self.range.slice.start, self.range.slice.count) })
    }

    /// Shared component `T`, resolved through the archetype's meta entities.
    ///
    /// Only reachable when `T` is declared read-only: a pass writing `T` may
    /// also match the meta entity's own archetype, where a sibling task holds
    /// the column mutably.
    #[must_use]
    pub fn shared<T: Component>(&self) -> Option<&'a T> {
        let id = self.world.component_id::<T>()?;
        if self.pass.params().get(id)?.is_write() {
            return None;
        }
        let (meta, _) = self.world.shared_source(self.archetype.id(), id)?;
        self.world.get_owned::<T>(meta).ok()
    }

    /// Read a declared shared resource.
    #[must_use]
    pub fn resource<'r, T: Send + Sync>(
        &self,
        resource: &'r SharedResource<T>,
    ) -> Option<RwLockReadGuard<'r, T>> {
        self.declared(resource.id())?;
        Some(resource.read())
    }

    /// Write a shared resource declared with write access.
    #[must_use]
    pub fn resource_mut<'r, T: Send + Sync>(
        &self,
        resource: &'r SharedResource<T>,
    ) -> Option<RwLockWriteGuard<'r, T>> {
        self.declared(resource.id())?.is_write().then(|| resource.write())
    }

    fn declared(&self, resource: ResourceId) -> Option<Access> {
        self.pass
            .shared()
            .iter()
            .find(|s| s.resource == resource)
            .map(|s| s.access)
    }

    fn column<T: Component>(&self) -> Option<(ComponentId, &'a Column)> {
        let id = self.world.component_id::<T>()?;
        self.pass.params().get(id)?;
        let column = self.chunk.column(self.archetype.column_index(id)?)?;
        Some((id, column))
    }

    fn borrow(&self, id: ComponentId, borrow: Borrow) {
        let mut borrows = self.borrows.borrow_mut();
        let conflict = borrows
            .iter()
            .any(|&(held, kind)| held == id && (kind == Borrow::Exclusive || borrow == Borrow::Exclusive));
        assert!(!conflict, "component {id:?} already borrowed in this operation");
        borrows.push((id, borrow));
    }
}
