use crate::{
    executor::Shared,
    node::NodePtr,
    task::{TaskFuture, packaged},
    types::{TaskParams, Work},
};
use crossbeam_utils::Backoff;
use rayon::Yield;
use std::sync::Arc;

/// Context of a running task.
///
/// Tasks spawned through a runtime are children of the running task: they
/// are accounted on its join counter rather than on the executor, and the
/// running task is not torn down before all of them have been. Its own
/// successors therefore observe everything its children did.
#[derive(Debug)]
pub struct Runtime<'a> {
    shared: &'a Arc<Shared>,
    parent: NodePtr,
}

impl<'a> Runtime<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, parent: NodePtr) -> Self {
        Self { shared, parent }
    }

    /// Name of the running task.
    pub fn name(&self) -> &str {
        // SAFETY: the running node outlives its runtime.
        unsafe { self.parent.as_ref() }.params().name()
    }

    /// Index of the worker thread running the task.
    pub fn worker_index(&self) -> Option<usize> {
        self.shared.pool.current_thread_index()
    }

    /// Spawns a child task.
    pub fn silent_async<P, F>(&self, params: P, f: F)
    where
        P: Into<TaskParams>,
        F: FnOnce() + Send + 'static,
    {
        let work: Work = Box::new(move |_| f());
        self.shared.spawn_child(self.parent, params.into(), work);
    }

    /// Spawns a child task that has a runtime of its own.
    pub fn silent_async_with_runtime<P, F>(&self, params: P, f: F)
    where
        P: Into<TaskParams>,
        F: FnOnce(&Runtime<'_>) + Send + 'static,
    {
        self.shared
            .spawn_child(self.parent, params.into(), Box::new(f));
    }

    /// Spawns a child task and returns a future of its result.
    ///
    /// Blocking on the future from inside the running task stalls its
    /// worker; call [`Runtime::corun_all`] first.
    pub fn run_async<P, F, R>(&self, params: P, f: F) -> TaskFuture<R>
    where
        P: Into<TaskParams>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (work, future) = packaged(f);
        self.shared.spawn_child(self.parent, params.into(), work);
        future
    }

    /// Runs other pool work on this worker until every child spawned so far
    /// has been torn down.
    pub fn corun_all(&self) {
        // SAFETY: the running node outlives its runtime.
        let parent = unsafe { self.parent.as_ref() };
        let backoff = Backoff::new();
        while parent.join_counter() != 0 {
            match self.shared.pool.yield_now() {
                Some(Yield::Executed) => backoff.reset(),
                Some(Yield::Idle) | None => backoff.snooze(),
            }
        }
    }
}
