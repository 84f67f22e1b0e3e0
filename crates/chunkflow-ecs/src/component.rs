//! Component types.
//!
//! A component is any `Send + Sync + Default` value. Chunks store components
//! without knowing their type, so registration captures what type-erased
//! storage needs: a layout, a way to build a default value in place and a
//! way to drop one.

use std::{alloc::Layout, any::TypeId, fmt};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::error::{EcsError, EcsResult};

/// Anything storable in a chunk column.
///
/// Task bodies read columns from worker threads, hence `Send + Sync`.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Dense per-world component identifier, handed out in registration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// In-place lifecycle of one concrete type, behind raw pointers.
#[derive(Clone, Copy)]
struct Lifecycle {
    construct: unsafe fn(*mut u8),
    destruct: Option<unsafe fn(*mut u8)>,
}

impl Lifecycle {
    fn of<T: Default>() -> Self {
        unsafe fn construct<T: Default>(slot: *mut u8) {
            unsafe { slot.cast::<T>().write(T::default()) };
        }
        unsafe fn destruct<T>(slot: *mut u8) {
            unsafe { slot.cast::<T>().drop_in_place() };
        }

        Self {
            construct: construct::<T>,
            destruct: std::mem::needs_drop::<T>().then_some(destruct::<T> as unsafe fn(*mut u8)),
        }
    }
}

/// Layout and lifecycle of a registered component type.
#[derive(Clone)]
pub struct ComponentInfo {
    id: ComponentId,
    type_id: TypeId,
    name: &'static str,
    layout: Layout,
    lifecycle: Lifecycle,
}

impl ComponentInfo {
    #[must_use]
    pub fn of<T: Component + Default>(id: ComponentId) -> Self {
        Self {
            id,
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            lifecycle: Lifecycle::of::<T>(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Rust type name, for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    #[must_use]
    pub const fn needs_drop(&self) -> bool {
        self.lifecycle.destruct.is_some()
    }

    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Construct the default value at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` is aligned and writable for this type and holds no live value.
    pub unsafe fn write_default(&self, slot: *mut u8) {
        unsafe { (self.lifecycle.construct)(slot) };
    }

    /// Drop the value at `slot`. It must not be read again afterwards.
    ///
    /// # Safety
    ///
    /// `slot` holds a live value of this type.
    pub unsafe fn drop_in_place(&self, slot: *mut u8) {
        if let Some(destruct) = self.lifecycle.destruct {
            unsafe { destruct(slot) };
        }
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} ({}b/{})", self.id, self.name, self.size(), self.align())
    }
}

/// Maps Rust types to component ids. Ids index straight into `infos`.
#[derive(Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentId, FxBuildHasher>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `T`, registering it first if needed.
    pub fn register<T: Component + Default>(&mut self) -> ComponentId {
        let next = ComponentId(self.infos.len() as u32);
        let id = *self.by_type.entry(TypeId::of::<T>()).or_insert(next);

        if id == next {
            let info = ComponentInfo::of::<T>(id);
            tracing::debug!(component = info.name(), ?id, size = info.size(), "registered component");
            self.infos.push(info);
        }
        id
    }

    #[must_use]
    pub fn get_id<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    #[must_use]
    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Infos for `ids`, in the same order.
    pub fn infos_for(&self, ids: &[ComponentId]) -> EcsResult<Vec<ComponentInfo>> {
        ids.iter()
            .map(|&id| self.get_info(id).cloned().ok_or(EcsError::UnknownComponentId(id)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.infos).finish()
    }
}
