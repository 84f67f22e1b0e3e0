//! Scheduler and executor.
//!
//! Every scheduled unit becomes a [`Node`]: a list of jobs, a count of
//! unfinished predecessors and a count of unfinished jobs. A node's jobs
//! are handed to the worker pool only once its predecessor count drops to
//! zero, so no worker ever blocks on a dependency. The last job to finish
//! completes the node's [`Event`] and releases its dependents.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use chunkflow_ecs::World;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, trace};

use crate::{
    config::SchedulerConfig,
    error::{TaskError, TaskResult},
    event::Event,
    pipeline::Pipeline,
};

/// A unit of work borrowing data for the frame lifetime `'w`.
pub(crate) type Job<'w> = Box<dyn FnOnce() + Send + 'w>;

type ErasedJob = Box<dyn FnOnce() + Send + 'static>;

/// State shared by every node of one frame.
pub(crate) struct FrameState {
    pool: Arc<ThreadPool>,
    /// First panic payload raised by a task this frame.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl FrameState {
    pub(crate) fn new(pool: Arc<ThreadPool>) -> Self {
        Self {
            pool,
            panic: Mutex::new(None),
        }
    }

    pub(crate) fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }
}

pub(crate) struct Node {
    event: Event,
    frame: Arc<FrameState>,
    /// Unfinished predecessors, plus one guard held while the node is wired up.
    pending: AtomicUsize,
    /// Jobs not yet finished.
    remaining: AtomicUsize,
    jobs: Mutex<Vec<ErasedJob>>,
}

impl Node {
    /// Create a node and hook it behind `predecessors`. It is dispatched as
    /// soon as the last of them completes, or right away if none is pending.
    ///
    /// # Safety
    ///
    /// Every job must finish before the borrows it captures expire. The
    /// pipeline guarantees this by waiting all events before the frame ends.
    pub(crate) unsafe fn spawn(
        event: Event,
        frame: Arc<FrameState>,
        jobs: Vec<Job<'_>>,
        predecessors: &[Event],
    ) {
        let jobs: Vec<ErasedJob> = jobs
            .into_iter()
            // SAFETY: only the lifetime bound changes; the caller keeps the
            // borrows alive until the job has run
            .map(|job| unsafe { std::mem::transmute::<Job<'_>, ErasedJob>(job) })
            .collect();

        let node = Arc::new(Self {
            event,
            frame,
            pending: AtomicUsize::new(1),
            remaining: AtomicUsize::new(jobs.len()),
            jobs: Mutex::new(jobs),
        });

        for predecessor in predecessors {
            node.pending.fetch_add(1, Ordering::AcqRel);
            if !predecessor.add_dependent(Arc::clone(&node)) {
                // Already complete; the guard keeps the count above zero.
                node.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }

        node.release();
    }

    /// One predecessor (or the wiring guard) is done.
    pub(crate) fn release(self: &Arc<Self>) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            Self::dispatch(Arc::clone(self));
        }
    }

    /// Hand `ready`'s jobs to the pool. Nodes without jobs complete here, and
    /// the dependents they unblock are dispatched from the same loop, so a
    /// chain of empty units never grows the stack.
    fn dispatch(ready: Arc<Self>) {
        let mut ready = vec![ready];
        while let Some(node) = ready.pop() {
            let jobs = std::mem::take(&mut *node.jobs.lock());
            trace!(pass = node.event.pass_index(), tasks = jobs.len(), "dispatching");

            if jobs.is_empty() {
                ready.extend(
                    node.event
                        .complete()
                        .into_iter()
                        .filter(|dependent| dependent.pending.fetch_sub(1, Ordering::AcqRel) == 1),
                );
                continue;
            }

            for job in jobs {
                let task = Arc::clone(&node);
                node.frame.pool.spawn_fifo(move || task.run(job));
            }
        }
    }

    fn run(self: Arc<Self>, job: ErasedJob) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(pass = self.event.pass_index(), "task panicked");
            self.frame.panic.lock().get_or_insert(payload);
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            for dependent in self.event.complete() {
                dependent.release();
            }
        }
    }
}

/// Owns the worker pool and opens frames.
pub struct Scheduler {
    pool: Arc<ThreadPool>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> TaskResult<Self> {
        if config.worker_threads == 0 {
            return Err(TaskError::ZeroWorkers);
        }

        let prefix = config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()?;

        debug!(workers = config.worker_threads, "started worker pool");
        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run one frame over `world`.
    ///
    /// Advances the world's timestamp, hands `f` a fresh [`Pipeline`], and
    /// waits for every unit scheduled in it before returning, also when `f`
    /// unwinds.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic of any task, after the barrier.
    pub fn frame<'w, R>(&self, world: &'w mut World, f: impl FnOnce(&mut Pipeline<'w>) -> R) -> R {
        let timestamp = world.advance_timestamp();
        let world: &'w World = world;
        debug!(timestamp, "frame opened");

        let frame = Arc::new(FrameState::new(Arc::clone(&self.pool)));
        let mut pipeline = Pipeline::new(world, timestamp, Arc::clone(&frame));
        let result = f(&mut pipeline);
        drop(pipeline);

        debug!(timestamp, "frame closed");
        if let Some(payload) = frame.take_panic() {
            panic::resume_unwind(payload);
        }
        result
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.pool.current_num_threads())
            .field("config", &self.config)
            .finish()
    }
}
