use crate::{
    node::{Node, NodeKind, NodePtr},
    types::TaskParams,
};
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;
use derive_more::Debug;

/// Concurrent free list of node allocations.
///
/// `animate` reuses a parked allocation when one is available and falls back
/// to the global allocator otherwise; `recycle` parks the allocation again
/// unless the free list is full.
#[derive(Debug)]
pub(crate) struct NodePool {
    #[debug(skip)]
    free: ArrayQueue<Box<Node>>,
    /// Animated and not yet recycled.
    live: CachePadded<AtomicUsize>,
}

impl NodePool {
    /// # Panics
    /// If `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity),
            live: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Constructs a node in pooled storage with `join_counter` set to
    /// `num_dependents`.
    pub(crate) fn animate(
        &self,
        params: TaskParams,
        parent: Option<NodePtr>,
        num_dependents: usize,
        kind: NodeKind,
    ) -> NodePtr {
        let node = Node::new(params, parent, num_dependents, kind);
        let storage = match self.free.pop() {
            Some(mut storage) => {
                *storage = node;
                storage
            }
            None => Box::new(node),
        };
        self.live.fetch_add(1, Ordering::Relaxed);
        NodePtr::from_box(storage)
    }

    /// Returns the node's storage to the pool.
    ///
    /// # Safety
    ///
    /// `node` must come from [`NodePool::animate`] on a pool sharing this
    /// free list, and nothing may dereference it afterwards.
    pub(crate) unsafe fn recycle(&self, node: NodePtr) {
        // SAFETY: guaranteed by the caller.
        let mut storage = unsafe { node.into_box() };
        *storage = Node::vacant();
        let prev = self.live.fetch_sub(1, Ordering::Relaxed);
        assert_ne!(prev, 0, "NodePool::recycle: [1]");
        tracing::trace!(?node, "recycled node");
        // A full free list simply frees the allocation.
        let _ = self.free.push(storage);
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[cfg(all(test, not(feature = "loom")))]
    pub(crate) fn parked(&self) -> usize {
        self.free.len()
    }
}
