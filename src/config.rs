use crate::executor::{Executor, ExecutorBuildError};
use std::borrow::Cow;

/// Default capacity of the node free list.
pub const DEFAULT_NODE_POOL_CAPACITY: usize = 1024;

/// Configuration entry-point for building an [`Executor`].
///
/// ```no_run
/// let executor = depflow::Executor::builder()
///     .num_workers(4)
///     .thread_name("render")
///     .build()
///     .expect("executor");
/// # drop(executor);
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct ExecutorBuilder {
    pub(crate) num_workers: usize,
    pub(crate) thread_name: Cow<'static, str>,
    pub(crate) stack_size: Option<usize>,
    pub(crate) node_pool_capacity: usize,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            num_workers: 0,
            thread_name: Cow::Borrowed("depflow-worker"),
            stack_size: None,
            node_pool_capacity: DEFAULT_NODE_POOL_CAPACITY,
        }
    }
}

impl ExecutorBuilder {
    /// Number of worker threads. Zero selects the pool's default, which honours
    /// `RAYON_NUM_THREADS` and otherwise uses one thread per logical CPU.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Prefix of worker thread names; threads are named `{prefix}-{index}`.
    pub fn thread_name(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Stack size of each worker thread, in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// How many recycled node allocations are kept for reuse.
    pub fn node_pool_capacity(mut self, capacity: usize) -> Self {
        self.node_pool_capacity = capacity;
        self
    }

    /// Spawn the worker threads.
    ///
    /// # Errors
    /// If the node pool capacity is zero or the threads cannot be spawned.
    pub fn build(self) -> Result<Executor, ExecutorBuildError> {
        Executor::with_config(self)
    }
}
