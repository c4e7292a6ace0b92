use crate::node::NodePtr;

/// Execution context of one pool job.
///
/// Created at the top of every job the executor hands to the pool and lives
/// for as long as that job keeps running nodes. The single `cache` slot lets
/// the completion cascade pass one ready successor straight to this worker
/// instead of round-tripping it through the pool's queues.
#[derive(Debug, Default)]
pub(crate) struct Worker {
    /// Index of the pool thread, `None` outside the pool.
    index: Option<usize>,
    cache: Option<NodePtr>,
}

impl Worker {
    pub(crate) fn new(index: Option<usize>) -> Self {
        Self { index, cache: None }
    }

    pub(crate) fn index(&self) -> Option<usize> {
        self.index
    }

    /// Places `node` in the cache slot and returns the previous occupant.
    #[must_use]
    pub(crate) fn stash(&mut self, node: NodePtr) -> Option<NodePtr> {
        self.cache.replace(node)
    }

    pub(crate) fn take_cached(&mut self) -> Option<NodePtr> {
        self.cache.take()
    }

    #[cfg(all(test, not(feature = "loom")))]
    pub(crate) fn cached(&self) -> Option<NodePtr> {
        self.cache
    }
}
