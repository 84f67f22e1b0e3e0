//! Entity handles.
//!
//! A handle is `(index, generation)`. Freeing an entity bumps the
//! generation stored at its index, so every handle minted before the free
//! stops resolving, even once the index is handed out again.

use std::fmt;

/// Per-index reuse counter.
///
/// `u32::MAX` marks a retired index: no handle is minted with it, so a
/// stale handle can never come back to life by wrapping around.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(u32);

impl Generation {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    const RETIRED: Self = Self(u32::MAX);

    /// The following generation, saturating at the retired marker.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub const fn is_retired(self) -> bool {
        self.0 == Self::RETIRED.0
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

pub type EntityIndex = u32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: EntityIndex,
    generation: Generation,
}

impl Entity {
    #[must_use]
    pub const fn new(index: EntityIndex, generation: Generation) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> EntityIndex {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({self})")
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation.0)
    }
}

/// Hands out entity handles and recycles freed indices.
///
/// An index freed `u32::MAX` times is retired instead of recycled.
#[derive(Default)]
pub struct EntityAllocator {
    /// Live generation of every index ever handed out.
    generations: Vec<Generation>,
    /// Freed indices, reused last-in first-out.
    recycled: Vec<EntityIndex>,
    retired: usize,
}

impl EntityAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generations: Vec::new(),
            recycled: Vec::new(),
            retired: 0,
        }
    }

    pub fn allocate(&mut self) -> Entity {
        let index = self.recycled.pop().unwrap_or_else(|| {
            self.generations.push(Generation::new());
            (self.generations.len() - 1) as EntityIndex
        });
        Entity::new(index, self.generations[index as usize])
    }

    /// Retire `entity`. Returns `false` for a handle that was already stale.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        let Some(generation) = self
            .generations
            .get_mut(entity.index() as usize)
            .filter(|g| **g == entity.generation() && !g.is_retired())
        else {
            return false;
        };
        *generation = generation.next();
        if generation.is_retired() {
            self.retired += 1;
            tracing::debug!(index = entity.index(), "retired entity index");
        } else {
            self.recycled.push(entity.index());
        }
        true
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        !entity.generation().is_retired()
            && self.generations.get(entity.index() as usize) == Some(&entity.generation())
    }

    #[must_use]
    pub fn alive_count(&self) -> u32 {
        (self.generations.len() - self.recycled.len() - self.retired) as u32
    }

    /// Indices handed out so far, live, recycled or retired.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_indices_are_sequential() {
        let mut allocator = EntityAllocator::new();

        let handles: Vec<_> = (0..3).map(|_| allocator.allocate()).collect();

        assert_eq!(handles.iter().map(|e| e.index()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(handles.iter().all(|&e| allocator.is_alive(e)));
        assert_eq!(allocator.alive_count(), 3);
    }

    #[test]
    fn test_recycled_index_gets_newer_generation() {
        let mut allocator = EntityAllocator::new();

        let old = allocator.allocate();
        assert!(allocator.deallocate(old));
        assert!(!allocator.is_alive(old));
        assert!(!allocator.deallocate(old));
        assert_eq!(allocator.alive_count(), 0);

        let new = allocator.allocate();
        assert_eq!(new.index(), old.index());
        assert!(new.generation() > old.generation());
        assert_eq!(allocator.capacity(), 1);
    }

    #[test]
    fn test_generation_saturates() {
        assert_eq!(Generation(u32::MAX - 1).next(), Generation::RETIRED);
        assert_eq!(Generation::RETIRED.next(), Generation::RETIRED);
        assert!(!Generation(u32::MAX - 1).is_retired());
    }

    #[test]
    fn test_exhausted_index_is_retired() {
        let mut allocator = EntityAllocator::new();
        let first = allocator.allocate();
        allocator.generations[0] = Generation(u32::MAX - 1);
        let last = Entity::new(first.index(), Generation(u32::MAX - 1));

        assert!(allocator.is_alive(last));
        assert!(allocator.deallocate(last));
        assert!(!allocator.is_alive(last));
        assert!(!allocator.deallocate(last));
        assert!(!allocator.is_alive(Entity::new(first.index(), Generation::RETIRED)));
        assert!(!allocator.deallocate(Entity::new(first.index(), Generation::RETIRED)));
        assert_eq!(allocator.alive_count(), 0);

        let fresh = allocator.allocate();
        assert_eq!(fresh.index(), 1);
        assert_eq!(allocator.capacity(), 2);
        assert_eq!(allocator.alive_count(), 1);
    }
}
