//! Dependency tracking from declared access.
//!
//! Two units conflict when they touch the same key and at least one of them
//! writes it. For every key the tracker remembers the last writer and the
//! readers since that write: a read depends on the last writer, a write
//! depends on the last writer and on every reader since, then becomes the
//! last writer itself.

use chunkflow_ecs::{ArchetypeId, ComponentId};
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::trace;

use crate::{access::Access, resource::ResourceId};

/// What a unit touches: one component column family of one archetype, or
/// one shared resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessKey {
    Component(ArchetypeId, ComponentId),
    Resource(ResourceId),
}

pub type Dependencies = SmallVec<[usize; 8]>;

#[derive(Default, Debug)]
struct PreviousAccess {
    readers: Vec<usize>,
    last_writer: Option<usize>,
}

impl PreviousAccess {
    fn add_read(&mut self, unit: usize) -> Option<usize> {
        self.readers.push(unit);
        self.last_writer
    }

    fn add_write(&mut self, unit: usize) -> Vec<usize> {
        let mut dependencies = std::mem::take(&mut self.readers);
        if let Some(writer) = self.last_writer.replace(unit) {
            dependencies.push(writer);
        }
        dependencies
    }

    fn conflicts(&self, access: Access) -> impl Iterator<Item = usize> + '_ {
        let readers = access.is_write().then_some(self.readers.as_slice()).unwrap_or_default();
        self.last_writer.into_iter().chain(readers.iter().copied())
    }
}

#[derive(Default, Debug)]
pub struct DependencyTracker {
    accesses: HashMap<AccessKey, PreviousAccess, FxBuildHasher>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the access of `unit` and return its predecessors, sorted.
    pub fn register(&mut self, unit: usize, keys: &[(AccessKey, Access)]) -> Dependencies {
        let mut dependencies = Dependencies::new();

        for (key, access) in normalize(keys) {
            let previous = self.accesses.entry(key).or_default();
            match access {
                Access::Read => dependencies.extend(previous.add_read(unit)),
                Access::Write => dependencies.extend(previous.add_write(unit)),
            }
        }

        dependencies.sort_unstable();
        dependencies.dedup();
        dependencies.retain(|&mut dep| dep != unit);

        trace!(unit, ?dependencies, "computed dependencies");
        dependencies
    }

    /// Units that an access would have to wait for, without recording it.
    #[must_use]
    pub fn conflicts(&self, keys: &[(AccessKey, Access)]) -> Dependencies {
        let mut dependencies: Dependencies = normalize(keys)
            .into_iter()
            .filter_map(|(key, access)| self.accesses.get(&key).map(|prev| (prev, access)))
            .flat_map(|(previous, access)| previous.conflicts(access))
            .collect();

        dependencies.sort_unstable();
        dependencies.dedup();
        dependencies
    }
}

/// Sort keys and merge duplicates so a unit registers each key once, with
/// its strongest access.
fn normalize(keys: &[(AccessKey, Access)]) -> SmallVec<[(AccessKey, Access); 16]> {
    let mut keys: SmallVec<[(AccessKey, Access); 16]> = keys.into();
    keys.sort_unstable_by_key(|&(key, _)| key);
    keys.dedup_by(|next, kept| {
        if next.0 == kept.0 {
            kept.1 = kept.1.max(next.1);
            true
        } else {
            false
        }
    });
    keys
}
