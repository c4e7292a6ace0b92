use crate::{
    sync::{AtomicU8, AtomicUsize, Ordering, UnsafeCell, spin},
    types::{TaskParams, Work},
};
use core::{fmt, ptr::NonNull};
use crossbeam_utils::Backoff;

/// Raw handle to a node living in pooled storage.
///
/// Copying a `NodePtr` does not retain the node. Whoever dereferences it must
/// know the node has not been recycled yet: a predecessor holds its
/// successors alive until it decrements them, the executor holds a running
/// node alive until teardown, and an [`AsyncTask`](crate::task::AsyncTask)
/// holds one unit of `use_count`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub(crate) struct NodePtr(NonNull<Node>);

// SAFETY: every field of `Node` is either atomic or guarded by the
// executor's protocol (state lock, single-consumer work slot).
unsafe impl Send for NodePtr {}
unsafe impl Sync for NodePtr {}

impl NodePtr {
    pub(crate) fn from_box(node: Box<Node>) -> Self {
        Self(NonNull::from(Box::leak(node)))
    }

    /// # Safety
    ///
    /// The pointer must come from [`NodePtr::from_box`] and must not be used
    /// again afterwards.
    pub(crate) unsafe fn into_box(self) -> Box<Node> {
        // SAFETY: guaranteed by the caller.
        unsafe { Box::from_raw(self.0.as_ptr()) }
    }

    /// # Safety
    ///
    /// The node must stay animated for the chosen lifetime.
    #[inline]
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a Node {
        // SAFETY: guaranteed by the caller.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for NodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePtr({:p})", self.0)
    }
}

/// State of a dependent node's successor list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AsyncState {
    /// Successors may be appended after acquiring `Locked`.
    Unfinished = 0,
    /// A registering or completing thread owns the successor list.
    Locked = 1,
    /// The successor list is closed.
    Finished = 2,
}

const UNFINISHED: u8 = AsyncState::Unfinished as u8;
const LOCKED: u8 = AsyncState::Locked as u8;
const FINISHED: u8 = AsyncState::Finished as u8;

/// The schedulable unit of work.
pub(crate) struct Node {
    params: TaskParams,
    /// Node whose runtime spawned this one; receives the completion
    /// decrement instead of the executor topology.
    parent: Option<NodePtr>,
    /// Unresolved predecessors before scheduling, live runtime children
    /// while running.
    join_counter: AtomicUsize,
    kind: NodeKind,
}

pub(crate) enum NodeKind {
    /// Storage parked in the pool.
    Vacant,
    Async(AsyncWork),
    DependentAsync(DependentAsync),
}

pub(crate) struct AsyncWork {
    work: UnsafeCell<Option<Work>>,
}

pub(crate) struct DependentAsync {
    work: UnsafeCell<Option<Work>>,
    state: AtomicU8,
    successors: UnsafeCell<Vec<NodePtr>>,
    /// One unit for the executor, one per live `AsyncTask` handle.
    use_count: AtomicUsize,
}

impl NodeKind {
    pub(crate) fn async_work(work: Work) -> Self {
        Self::Async(AsyncWork {
            work: UnsafeCell::new(Some(work)),
        })
    }

    /// Dependent payload owned by the executor and by the handle returned to
    /// the submitter.
    pub(crate) fn dependent_async(work: Work) -> Self {
        Self::DependentAsync(DependentAsync {
            work: UnsafeCell::new(Some(work)),
            state: AtomicU8::new(UNFINISHED),
            successors: UnsafeCell::new(Vec::new()),
            use_count: AtomicUsize::new(2),
        })
    }
}

impl Node {
    pub(crate) fn new(
        params: TaskParams,
        parent: Option<NodePtr>,
        num_dependents: usize,
        kind: NodeKind,
    ) -> Self {
        Self {
            params,
            parent,
            join_counter: AtomicUsize::new(num_dependents),
            kind,
        }
    }

    pub(crate) fn vacant() -> Self {
        Self::new(TaskParams::default(), None, 0, NodeKind::Vacant)
    }

    pub(crate) fn params(&self) -> &TaskParams {
        &self.params
    }

    pub(crate) fn parent(&self) -> Option<NodePtr> {
        self.parent
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn dependent(&self) -> &DependentAsync {
        match &self.kind {
            NodeKind::DependentAsync(dependent) => dependent,
            _ => panic!("Node::dependent: [1]"),
        }
    }

    pub(crate) fn join_counter(&self) -> usize {
        self.join_counter.load(Ordering::Acquire)
    }

    /// Takes the callable out of the node. Only the thread running the node
    /// may call this, and only once.
    pub(crate) fn take_work(&self) -> Option<Work> {
        let cell = match &self.kind {
            NodeKind::Async(AsyncWork { work })
            | NodeKind::DependentAsync(DependentAsync { work, .. }) => work,
            NodeKind::Vacant => return None,
        };
        // SAFETY: a node is run by exactly one worker, and nothing else
        // touches the work slot between animation and recycling.
        cell.with_mut(|ptr| unsafe { (*ptr).take() })
    }

    /// Resolves one predecessor. Returns `true` iff this was the last one,
    /// which makes the caller responsible for scheduling the node.
    #[inline]
    pub(crate) fn resolve_one(&self) -> bool {
        let prev = self.join_counter.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Node::resolve_one: [1]");
        prev == 1
    }

    /// Registers `this` as a successor of `predecessor`.
    ///
    /// Returns `None` if `this` was appended to the predecessor's successor
    /// list; the predecessor's teardown will resolve it later. Returns the
    /// join counter left after an immediate decrement if the predecessor had
    /// already finished.
    pub(crate) fn depend_on(this: NodePtr, predecessor: &Node) -> Option<usize> {
        if predecessor.dependent().try_push_successor(this) {
            return None;
        }
        // SAFETY: `this` is still being registered and cannot have been
        // scheduled, let alone recycled.
        let node = unsafe { this.as_ref() };
        let prev = node.join_counter.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Node::depend_on: [1]");
        Some(prev - 1)
    }

    /// Accounts for one more live runtime child of this (running) node.
    pub(crate) fn retain_child(&self) {
        self.join_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts for a finished runtime child.
    pub(crate) fn release_child(&self) {
        let prev = self.join_counter.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "Node::release_child: [1]");
    }
}

impl DependentAsync {
    pub(crate) fn state(&self) -> AsyncState {
        match self.state.load(Ordering::Acquire) {
            UNFINISHED => AsyncState::Unfinished,
            LOCKED => AsyncState::Locked,
            FINISHED => AsyncState::Finished,
            other => panic!("DependentAsync::state: [1] {other}"),
        }
    }

    pub(crate) fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Relaxed)
    }

    pub(crate) fn retain(&self) {
        self.use_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one unit of `use_count`. Returns `true` iff it was the last
    /// one, which makes the caller responsible for recycling the node.
    pub(crate) fn release(&self) -> bool {
        let prev = self.use_count.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(prev, 0, "DependentAsync::release: [1]");
        prev == 1
    }

    /// Appends `successor` unless the list is already closed.
    fn try_push_successor(&self, successor: NodePtr) -> bool {
        let backoff = Backoff::new();
        loop {
            match self.state.compare_exchange_weak(
                UNFINISHED,
                LOCKED,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(FINISHED) => return false,
                Err(LOCKED) => spin(&backoff),
                // Spurious failure.
                Err(_) => {}
            }
        }
        // SAFETY: holding `Locked` grants exclusive access to the list.
        self.successors
            .with_mut(|ptr| unsafe { (*ptr).push(successor) });
        self.state.store(UNFINISHED, Ordering::Release);
        true
    }

    /// Closes the successor list and hands it to the completing thread.
    pub(crate) fn finish(&self) -> Vec<NodePtr> {
        let backoff = Backoff::new();
        loop {
            match self.state.compare_exchange_weak(
                UNFINISHED,
                FINISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(LOCKED) => spin(&backoff),
                Err(FINISHED) => panic!("DependentAsync::finish: [1]"),
                Err(_) => {}
            }
        }
        // SAFETY: once `Finished` is published no registrar touches the list
        // again, and only the completing thread reaches this point.
        self.successors
            .with_mut(|ptr| unsafe { core::mem::take(&mut *ptr) })
    }

    fn num_successors(&self) -> Option<usize> {
        if self.state() != AsyncState::Unfinished {
            return None;
        }
        // SAFETY: a racy length read for diagnostics only; the vector header
        // is never freed while the node is animated.
        Some(self.successors.with(|ptr| unsafe { (*ptr).len() }))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("name", &self.params.name())
            .field("priority", &self.params.priority())
            .field("parent", &self.parent)
            .field("join_counter", &self.join_counter.load(Ordering::Relaxed));
        match &self.kind {
            NodeKind::Vacant => s.field("kind", &"Vacant"),
            NodeKind::Async(_) => s.field("kind", &"Async"),
            NodeKind::DependentAsync(dependent) => s
                .field("kind", &"DependentAsync")
                .field("state", &dependent.state())
                .field("successors", &dependent.num_successors())
                .field("use_count", &dependent.use_count()),
        };
        s.finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    fn dependent(num_dependents: usize) -> NodePtr {
        NodePtr::from_box(Box::new(Node::new(
            TaskParams::default(),
            None,
            num_dependents,
            NodeKind::dependent_async(Box::new(|_| {})),
        )))
    }

    fn free(nodes: &[NodePtr]) {
        for &node in nodes {
            drop(unsafe { node.into_box() });
        }
    }

    #[test]
    fn unfinished_predecessor_records_successor() {
        let pred = dependent(0);
        let succ = dependent(1);
        let (p, s) = unsafe { (pred.as_ref(), succ.as_ref()) };

        assert_eq!(Node::depend_on(succ, p), None);
        assert_eq!(s.join_counter(), 1);
        assert_eq!(p.dependent().state(), AsyncState::Unfinished);

        let successors = p.dependent().finish();
        assert_eq!(successors, vec![succ]);
        assert_eq!(p.dependent().state(), AsyncState::Finished);
        assert!(s.resolve_one());
        assert_eq!(s.join_counter(), 0);
        free(&[pred, succ]);
    }

    #[test]
    fn finished_predecessor_decrements_immediately() {
        let pred = dependent(0);
        let succ = dependent(2);
        let (p, s) = unsafe { (pred.as_ref(), succ.as_ref()) };

        assert!(p.dependent().finish().is_empty());
        assert_eq!(Node::depend_on(succ, p), Some(1));
        assert_eq!(Node::depend_on(succ, p), Some(0));
        assert_eq!(s.join_counter(), 0);
        // The closed list never grew.
        assert_eq!(p.dependent().state(), AsyncState::Finished);
        assert_eq!(p.dependent().num_successors(), None);
        free(&[pred, succ]);
    }

    #[test]
    fn use_count_starts_with_executor_and_handle() {
        let node = dependent(0);
        let d = unsafe { node.as_ref() }.dependent();
        assert_eq!(d.use_count(), 2);
        d.retain();
        assert!(!d.release());
        assert!(!d.release());
        assert!(d.release());
        free(&[node]);
    }

    #[test]
    fn work_is_taken_once() {
        let node = dependent(0);
        let n = unsafe { node.as_ref() };
        assert!(n.take_work().is_some());
        assert!(n.take_work().is_none());
        free(&[node]);
    }

    #[test]
    fn runtime_children_are_counted_on_join_counter() {
        let node = dependent(0);
        let n = unsafe { node.as_ref() };
        n.retain_child();
        n.retain_child();
        assert_eq!(n.join_counter(), 2);
        n.release_child();
        n.release_child();
        assert_eq!(n.join_counter(), 0);
        free(&[node]);
    }
}
