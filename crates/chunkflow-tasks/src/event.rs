//! Completion handles.

use std::{fmt, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::scheduler::Node;

#[derive(Default)]
struct State {
    complete: bool,
    /// Units waiting for this one to finish.
    dependents: Vec<Arc<Node>>,
}

struct Inner {
    pass_index: usize,
    state: Mutex<State>,
    done: Condvar,
}

/// Completion handle of one scheduled unit.
///
/// Pending until every task of the unit has run, then complete forever.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

impl Event {
    pub(crate) fn new(pass_index: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pass_index,
                state: Mutex::new(State::default()),
                done: Condvar::new(),
            }),
        }
    }

    /// Index of the pass this event belongs to.
    #[must_use]
    pub fn pass_index(&self) -> usize {
        self.inner.pass_index
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().complete
    }

    /// Block until the unit has finished.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.complete {
            self.inner.done.wait(&mut state);
        }
    }

    /// Register `node` to be released on completion.
    ///
    /// Returns `false` if the event is already complete; nothing is
    /// registered then.
    pub(crate) fn add_dependent(&self, node: Arc<Node>) -> bool {
        let mut state = self.inner.state.lock();
        if state.complete {
            return false;
        }
        state.dependents.push(node);
        true
    }

    /// Mark complete, wake waiters, and return the dependents to release.
    pub(crate) fn complete(&self) -> Vec<Arc<Node>> {
        let dependents = {
            let mut state = self.inner.state.lock();
            debug_assert!(!state.complete, "event completed twice");
            state.complete = true;
            std::mem::take(&mut state.dependents)
        };
        self.inner.done.notify_all();
        dependents
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("pass_index", &self.inner.pass_index)
            .field("complete", &self.is_complete())
            .finish()
    }
}
