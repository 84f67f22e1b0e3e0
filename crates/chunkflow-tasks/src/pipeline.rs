//! Pipeline - one frame of scheduled work.
//!
//! A pipeline resolves filters into passes, orders every scheduled unit
//! against the units before it from their declared access, and hands the
//! resulting jobs to the scheduler. Dropping the pipeline waits for every
//! unit it scheduled.

use std::{fmt, sync::Arc};

use chunkflow_ecs::{ArchetypeId, Filter, FilterBuilder, World};
use smallvec::SmallVec;
use tracing::{debug, trace, trace_span};

use crate::{
    access::{Access, Params, ParamsBuilder, SharedAccess, merge_shared},
    event::Event,
    operation::Operation,
    pass::{CustomPass, Pass},
    scheduler::{FrameState, Job, Node},
    tracker::{AccessKey, DependencyTracker},
};

/// A custom pass handed to the sync hook, with its completion handle.
#[derive(Clone, Debug)]
pub struct SyncPass {
    pub pass: CustomPass,
    pub event: Event,
}

type SyncHook<'w> = Box<dyn FnMut(&[SyncPass]) + 'w>;

pub struct Pipeline<'w> {
    world: &'w World,
    timestamp: u64,
    frame: Arc<FrameState>,
    tracker: DependencyTracker,
    /// Event per pass index, once the pass is scheduled.
    events: Vec<Option<Event>>,
    /// Custom passes by pass index.
    customs: Vec<Option<CustomPass>>,
    on_sync: Option<SyncHook<'w>>,
}

impl<'w> Pipeline<'w> {
    pub(crate) fn new(world: &'w World, timestamp: u64, frame: Arc<FrameState>) -> Self {
        Self {
            world,
            timestamp,
            frame,
            tracker: DependencyTracker::new(),
            events: Vec::new(),
            customs: Vec::new(),
            on_sync: None,
        }
    }

    /// Timestamp of this frame. Writes scheduled here stamp chunks with it.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Start a filter over this frame's world.
    #[must_use]
    pub fn filter(&self) -> FilterBuilder<'w> {
        Filter::builder(self.world)
    }

    /// Start a parameter list over this frame's world.
    #[must_use]
    pub fn params(&self) -> ParamsBuilder<'w> {
        Params::builder(self.world)
    }

    /// Resolve `filter` into a pass with the given access.
    pub fn create_pass(&mut self, filter: &Filter, params: Params, shared: &[SharedAccess]) -> Pass {
        let index = self.next_index();
        let pass = Pass::new(index, self.world.matching_chunks(filter), params, merge_shared(shared));
        trace!(
            pass = index,
            ranges = pass.ranges().len(),
            entities = pass.entity_count(),
            "created pass"
        );
        pass
    }

    /// A pass with no entity data, ordered only by `shared`.
    pub fn create_custom_pass(&mut self, shared: &[SharedAccess]) -> CustomPass {
        let shared = merge_shared(shared);
        let index = self.next_index();
        let custom = CustomPass { index, shared };
        self.customs[index] = Some(custom.clone());
        custom
    }

    /// Schedule `body` over every matched row of `pass`.
    ///
    /// The rows are split into tasks of at most `max_slice` entities (one
    /// task per chunk range when `None`). Each task calls `body` once per
    /// chunk range it covers. Write parameters stamp the matched chunks now.
    pub fn schedule<F>(&mut self, pass: Pass, max_slice: Option<usize>, body: F) -> Event
    where
        F: Fn(&Operation<'_>) + Send + Sync + 'w,
    {
        let index = pass.index();
        let keys = self.pass_keys(&pass);
        self.stamp_writes(&pass);

        let world = self.world;
        let slices = pass.split(max_slice);
        let pass = Arc::new(pass);
        let body = Arc::new(body);

        let jobs: Vec<Job<'w>> = slices
            .into_iter()
            .enumerate()
            .map(|(slice_index, slice)| {
                let pass = Arc::clone(&pass);
                let body = Arc::clone(&body);
                Box::new(move || {
                    let _span = trace_span!("task", pass = pass.index(), slice = slice_index).entered();
                    for range in slice {
                        if let Some(operation) = Operation::new(world, &pass, range) {
                            body(&operation);
                        }
                    }
                }) as Job<'w>
            })
            .collect();

        self.submit(index, &keys, jobs)
    }

    /// Schedule a single task for a custom pass.
    pub fn schedule_custom<F>(&mut self, custom: CustomPass, body: F) -> Event
    where
        F: FnOnce() + Send + 'w,
    {
        let keys = resource_keys(custom.shared());
        let index = custom.index();
        let job: Job<'w> = Box::new(move || {
            let _span = trace_span!("custom", pass = index).entered();
            body();
        });
        self.submit(index, &keys, vec![job])
    }

    /// Event of a scheduled pass.
    #[must_use]
    pub fn event(&self, pass_index: usize) -> Option<&Event> {
        self.events.get(pass_index)?.as_ref()
    }

    /// Block until every unit scheduled so far is complete.
    pub fn wait(&self) {
        for event in self.events.iter().flatten() {
            event.wait();
        }
    }

    /// Wait for everything, then borrow the world for synchronous reads.
    pub fn world(&mut self) -> &World {
        self.wait();
        self.world
    }

    /// Replace how conflicting custom passes are resolved by [`Self::sync`].
    ///
    /// The default waits on each pass's event.
    pub fn set_on_sync(&mut self, hook: impl FnMut(&[SyncPass]) + 'w) {
        self.on_sync = Some(Box::new(hook));
    }

    /// Prepare for a main-thread access to `shared`.
    ///
    /// Waits for every scheduled pass that conflicts with the access and
    /// hands conflicting custom passes to the sync hook.
    pub fn sync(&mut self, shared: &[SharedAccess]) {
        let conflicts = self.tracker.conflicts(&resource_keys(&merge_shared(shared)));

        let mut customs = Vec::new();
        for unit in conflicts {
            let Some(event) = self.event(unit).cloned() else {
                continue;
            };
            match self.customs.get(unit).cloned().flatten() {
                Some(pass) => customs.push(SyncPass { pass, event }),
                None => event.wait(),
            }
        }

        if customs.is_empty() {
            return;
        }
        trace!(customs = customs.len(), "syncing custom passes");
        match &mut self.on_sync {
            Some(hook) => hook(&customs),
            None => {
                for custom in &customs {
                    custom.event.wait();
                }
            }
        }
    }

    fn next_index(&mut self) -> usize {
        self.events.push(None);
        self.customs.push(None);
        self.events.len() - 1
    }

    fn submit(&mut self, index: usize, keys: &[(AccessKey, Access)], jobs: Vec<Job<'w>>) -> Event {
        assert!(
            self.events.get(index).is_some_and(Option::is_none),
            "pass {index} scheduled twice or created by another pipeline"
        );

        let dependencies = self.tracker.register(index, keys);
        let predecessors: SmallVec<[Event; 8]> = dependencies
            .iter()
            .filter_map(|&dep| self.event(dep).cloned())
            .collect();
        trace!(pass = index, tasks = jobs.len(), ?dependencies, "scheduling");

        let event = Event::new(index);
        self.events[index] = Some(event.clone());

        // SAFETY: the pipeline waits every event before it is dropped, and it
        // never outlives the `'w` borrows the jobs capture
        unsafe { Node::spawn(event.clone(), Arc::clone(&self.frame), jobs, &predecessors) };
        event
    }

    /// Tracker keys of a pass: every declared component of every matched
    /// archetype, shared components as reads of the meta entity's archetype,
    /// and declared resources.
    fn pass_keys(&self, pass: &Pass) -> Vec<(AccessKey, Access)> {
        let mut archetypes: SmallVec<[ArchetypeId; 8]> =
            pass.ranges().iter().map(|r| r.slice.archetype).collect();
        archetypes.sort_unstable();
        archetypes.dedup();

        let mut keys = resource_keys(pass.shared());
        for archetype_id in archetypes {
            let Some(archetype) = self.world.archetype(archetype_id) else {
                continue;
            };
            for param in pass.params().iter() {
                if archetype.contains(param.component) {
                    keys.push((
                        AccessKey::Component(archetype_id, param.component),
                        param.access,
                    ));
                } else if let Some((_, meta)) = self.world.shared_source(archetype_id, param.component) {
                    keys.push((
                        AccessKey::Component(meta.archetype, param.component),
                        Access::Read,
                    ));
                }
            }
        }
        keys
    }

    fn stamp_writes(&self, pass: &Pass) {
        for range in pass.ranges() {
            let Some(archetype) = self.world.archetype(range.slice.archetype) else {
                continue;
            };
            let Some(chunk) = archetype.chunk(range.slice.chunk) else {
                continue;
            };
            for component in pass.params().writes() {
                if let Some(column) = archetype.column_index(component) {
                    chunk.stamp(column, self.timestamp);
                }
            }
        }
    }
}

fn resource_keys(shared: &[SharedAccess]) -> Vec<(AccessKey, Access)> {
    shared
        .iter()
        .map(|s| (AccessKey::Resource(s.resource), s.access))
        .collect()
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        self.wait();
        debug!(
            timestamp = self.timestamp,
            units = self.events.iter().flatten().count(),
            "pipeline drained"
        );
    }
}

impl fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("timestamp", &self.timestamp)
            .field("passes", &self.events.len())
            .field("scheduled", &self.events.iter().flatten().count())
            .finish()
    }
}
