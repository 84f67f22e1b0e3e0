//! Declared data access of a unit of work.

use chunkflow_ecs::{Component, ComponentId, World};
use smallvec::SmallVec;

use crate::resource::ResourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// The stronger of two accesses.
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if self.is_write() || other.is_write() {
            Self::Write
        } else {
            Self::Read
        }
    }
}

/// Access to one component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param {
    pub component: ComponentId,
    pub access: Access,
}

/// Component parameter list of a pass.
///
/// Each component appears at most once; declaring the same component as
/// both read and write keeps the write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    params: SmallVec<[Param; 8]>,
}

impl Params {
    #[must_use]
    pub fn builder(world: &World) -> ParamsBuilder<'_> {
        ParamsBuilder {
            world,
            params: Self::default(),
        }
    }

    /// Add an access by raw id.
    pub fn push(&mut self, component: ComponentId, access: Access) {
        match self.params.iter_mut().find(|p| p.component == component) {
            Some(existing) => existing.access = existing.access.max(access),
            None => self.params.push(Param { component, access }),
        }
    }

    #[must_use]
    pub fn get(&self, component: ComponentId) -> Option<Access> {
        self.params
            .iter()
            .find(|p| p.component == component)
            .map(|p| p.access)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub fn writes(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.params
            .iter()
            .filter(|p| p.access.is_write())
            .map(|p| p.component)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

pub struct ParamsBuilder<'w> {
    world: &'w World,
    params: Params,
}

impl ParamsBuilder<'_> {
    /// Declare a read of `T`. Also covers reading `T` as a shared component.
    ///
    /// Unregistered types are skipped; no chunk can hold them.
    #[must_use]
    pub fn read<T: Component>(mut self) -> Self {
        if let Some(id) = self.world.component_id::<T>() {
            self.params.push(id, Access::Read);
        }
        self
    }

    #[must_use]
    pub fn write<T: Component>(mut self) -> Self {
        if let Some(id) = self.world.component_id::<T>() {
            self.params.push(id, Access::Write);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Params {
        self.params
    }
}

/// Declared access to a [`SharedResource`](crate::SharedResource).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SharedAccess {
    pub resource: ResourceId,
    pub access: Access,
}

impl SharedAccess {
    #[must_use]
    pub const fn read(resource: ResourceId) -> Self {
        Self {
            resource,
            access: Access::Read,
        }
    }

    #[must_use]
    pub const fn write(resource: ResourceId) -> Self {
        Self {
            resource,
            access: Access::Write,
        }
    }
}

/// Collapse repeated resources, keeping the strongest access.
pub(crate) fn merge_shared(shared: &[SharedAccess]) -> SmallVec<[SharedAccess; 4]> {
    let mut merged: SmallVec<[SharedAccess; 4]> = SmallVec::new();
    for entry in shared {
        match merged.iter_mut().find(|m| m.resource == entry.resource) {
            Some(existing) => existing.access = existing.access.max(entry.access),
            None => merged.push(*entry),
        }
    }
    merged
}
