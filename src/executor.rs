mod execute;
mod runtime;
mod setup;

/// Context handed to callables submitted with runtime access.
pub use crate::executor::runtime::Runtime;
/// Error returned by [`ExecutorBuilder::build`] when the executor cannot be
/// started.
pub use crate::executor::setup::ExecutorBuildError;
use crate::{
    config::ExecutorBuilder,
    pool::NodePool,
    task::{AsyncTask, TaskFuture, packaged},
    topology::Topology,
    types::{TaskParams, Work},
};
use derive_more::Debug;
use std::sync::Arc;
use tracing::debug;

/// Dependency-driven task executor.
///
/// Key responsibilities:
/// - Accepts plain tasks (`run_async`, `silent_async`) that are scheduled
///   immediately.
/// - Accepts dependent tasks (`dependent_async`, `silent_dependent_async`)
///   that are scheduled exactly once, when the last of their predecessors
///   has finished.
/// - On completion of a dependent task, releases its successors and keeps
///   one ready successor on the completing worker.
/// - Tracks in-flight tasks so [`Executor::wait_for_all`] can detect
///   quiescence.
///
/// Dependencies are never checked for cycles; a cyclic set of dependent
/// tasks is never scheduled and keeps [`Executor::wait_for_all`] blocked.
///
/// Dropping the executor waits for all submitted tasks. The last handle must
/// therefore not be dropped inside one of its own tasks, which would wait on
/// itself forever.
#[must_use]
#[derive(Debug)]
pub struct Executor {
    shared: Arc<Shared>,
}

/// State shared between the executor handle and every pool job.
#[derive(Debug)]
pub(crate) struct Shared {
    #[debug(skip)]
    pool: rayon::ThreadPool,
    nodes: Arc<NodePool>,
    topology: Topology,
}

impl Executor {
    /// Executor with `num_workers` threads (zero selects the default) and
    /// default settings otherwise.
    ///
    /// # Errors
    /// If the worker threads cannot be spawned.
    pub fn new(num_workers: usize) -> Result<Self, ExecutorBuildError> {
        Self::builder().num_workers(num_workers).build()
    }

    /// Start configuring an executor.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.shared.pool.current_num_threads()
    }

    /// Number of submitted top-level tasks that have not been torn down.
    pub fn num_inflight(&self) -> usize {
        self.shared.topology.num_inflight()
    }

    /// Number of task nodes currently allocated, including finished dependent
    /// tasks still referenced by an [`AsyncTask`].
    pub fn live_nodes(&self) -> usize {
        self.shared.nodes.live()
    }

    /// Blocks until every submitted task, and every task they spawned, has
    /// been torn down.
    ///
    /// Must not be called from inside a task of this executor: the waiting
    /// worker counts as in flight itself, so the call never returns.
    pub fn wait_for_all(&self) {
        self.shared.topology.wait_for_quiescence();
    }

    /// Runs `f` on a worker and returns a future of its result.
    ///
    /// A panic inside `f` is captured and reported by the future.
    pub fn run_async<P, F, R>(&self, params: P, f: F) -> TaskFuture<R>
    where
        P: Into<TaskParams>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (work, future) = packaged(f);
        self.shared.spawn_async(params.into(), work);
        future
    }

    /// Runs `f` on a worker without reporting its result.
    pub fn silent_async<P, F>(&self, params: P, f: F)
    where
        P: Into<TaskParams>,
        F: FnOnce() + Send + 'static,
    {
        let work: Work = Box::new(move |_| f());
        self.shared.spawn_async(params.into(), work);
    }

    /// Runs `f` on a worker with access to a [`Runtime`], through which it
    /// can spawn child tasks. The task is not torn down before all of its
    /// children have been.
    pub fn silent_async_with_runtime<P, F>(&self, params: P, f: F)
    where
        P: Into<TaskParams>,
        F: FnOnce(&Runtime<'_>) + Send + 'static,
    {
        self.shared.spawn_async(params.into(), Box::new(f));
    }

    /// Runs `f` once every task in `predecessors` has finished, and returns
    /// a handle to chain further tasks on together with a future of the
    /// result.
    ///
    /// `predecessors` may be a fixed set (`[&a, &b]`) or any iterator of
    /// handles (`handles.iter()`). With no predecessors the task is scheduled
    /// before this call returns.
    ///
    /// # Panics
    /// If a predecessor was submitted to a different executor. The panic
    /// happens before anything is submitted.
    pub fn dependent_async<'a, P, F, R, I>(
        &self,
        params: P,
        f: F,
        predecessors: I,
    ) -> (AsyncTask, TaskFuture<R>)
    where
        P: Into<TaskParams>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
        I: IntoIterator<Item = &'a AsyncTask>,
    {
        let (work, future) = packaged(f);
        let task =
            self.shared
                .spawn_dependent_async(params.into(), work, predecessors.into_iter());
        (task, future)
    }

    /// Like [`Executor::dependent_async`] without reporting the result.
    ///
    /// # Panics
    /// If a predecessor was submitted to a different executor.
    pub fn silent_dependent_async<'a, P, F, I>(
        &self,
        params: P,
        f: F,
        predecessors: I,
    ) -> AsyncTask
    where
        P: Into<TaskParams>,
        F: FnOnce() + Send + 'static,
        I: IntoIterator<Item = &'a AsyncTask>,
    {
        let work: Work = Box::new(move |_| f());
        self.shared
            .spawn_dependent_async(params.into(), work, predecessors.into_iter())
    }

    /// Like [`Executor::silent_dependent_async`], with access to a
    /// [`Runtime`]. Successors of the returned task run only after every
    /// child it spawned has been torn down.
    ///
    /// # Panics
    /// If a predecessor was submitted to a different executor.
    pub fn silent_dependent_async_with_runtime<'a, P, F, I>(
        &self,
        params: P,
        f: F,
        predecessors: I,
    ) -> AsyncTask
    where
        P: Into<TaskParams>,
        F: FnOnce(&Runtime<'_>) + Send + 'static,
        I: IntoIterator<Item = &'a AsyncTask>,
    {
        self.shared
            .spawn_dependent_async(params.into(), Box::new(f), predecessors.into_iter())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.wait_for_all();
        debug!(live_nodes = self.live_nodes(), "executor shut down");
    }
}
