use crate::{
    config::ExecutorBuilder,
    executor::{Executor, Shared},
    pool::NodePool,
    topology::Topology,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error kind for executor construction failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorBuildError {
    /// The node free list needs room for at least one allocation.
    #[error("node pool capacity must be non-zero")]
    ZeroPoolCapacity,
    /// The worker threads could not be spawned.
    #[error("failed to spawn worker threads")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Executor {
    pub(crate) fn with_config(config: ExecutorBuilder) -> Result<Self, ExecutorBuildError> {
        let ExecutorBuilder {
            num_workers,
            thread_name,
            stack_size,
            node_pool_capacity,
        } = config;
        if node_pool_capacity == 0 {
            return Err(ExecutorBuildError::ZeroPoolCapacity);
        }

        let mut builder = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(move |index| format!("{thread_name}-{index}"));
        if let Some(bytes) = stack_size {
            builder = builder.stack_size(bytes);
        }
        let pool = builder.build()?;

        debug!(
            num_workers = pool.current_num_threads(),
            node_pool_capacity, "executor started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                nodes: Arc::new(NodePool::new(node_pool_capacity)),
                topology: Topology::new(),
            }),
        })
    }
}
