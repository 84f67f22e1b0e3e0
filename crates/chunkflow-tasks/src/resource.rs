//! Shared resources - externally owned values with declared access.
//!
//! A resource id only feeds dependency bookkeeping. The value itself sits
//! behind a read-write lock, so a task that declared its access never
//! contends with another task: the dependency graph already orders them.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::access::SharedAccess;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a shared resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

struct Inner<T> {
    id: ResourceId,
    value: RwLock<T>,
}

/// A reference-counted value shared between tasks and the caller.
pub struct SharedResource<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedResource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync> SharedResource<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ResourceId::next(),
                value: RwLock::new(value),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Declaration for a pass that reads this resource.
    #[must_use]
    pub fn read_access(&self) -> SharedAccess {
        SharedAccess::read(self.inner.id)
    }

    /// Declaration for a pass that writes this resource.
    #[must_use]
    pub fn write_access(&self) -> SharedAccess {
        SharedAccess::write(self.inner.id)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.value.write()
    }

    /// Take the value out if this is the last handle.
    pub fn try_unwrap(self) -> Result<T, Self> {
        Arc::try_unwrap(self.inner)
            .map(|inner| inner.value.into_inner())
            .map_err(|inner| Self { inner })
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;

    #[test]
    fn test_ids_are_unique() {
        let a = SharedResource::new(0u32);
        let b = SharedResource::new(0u32);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_access_declarations() {
        let res = SharedResource::new(Vec::<f32>::new());

        assert_eq!(res.read_access().access, Access::Read);
        assert_eq!(res.write_access().access, Access::Write);
        assert_eq!(res.write_access().resource, res.id());
    }

    #[test]
    fn test_read_write_and_unwrap() {
        let res = SharedResource::new(vec![1, 2]);
        let handle = res.clone();

        handle.write().push(3);
        assert_eq!(*res.read(), vec![1, 2, 3]);

        let res = res.try_unwrap().unwrap_err();
        drop(handle);
        assert_eq!(res.try_unwrap().unwrap(), vec![1, 2, 3]);
    }
}
