use crate::{
    executor::{Runtime, Shared},
    node::{Node, NodeKind, NodePtr},
    task::{AsyncTask, panic_message},
    types::{Priority, TaskParams, Work},
    worker::Worker,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{error, trace};

/// Hands ready nodes to the worker pool.
pub(crate) trait Scheduler {
    /// Schedule from any thread.
    fn schedule(&self, node: NodePtr);
    /// Schedule from the job currently running on `worker`.
    ///
    /// The pool implementation forwards to [`Scheduler::schedule`]: called
    /// from a pool thread, `rayon::ThreadPool::spawn` already pushes onto
    /// that thread's local deque, so `worker` only feeds the trace.
    fn schedule_local(&self, worker: &Worker, node: NodePtr);
}

impl Scheduler for Arc<Shared> {
    fn schedule(&self, node: NodePtr) {
        // SAFETY: a ready node stays animated until it has run.
        let priority = unsafe { node.as_ref() }.params().priority();
        trace!(?node, %priority, "schedule");
        let shared = Arc::clone(self);
        match priority {
            Priority::Low => self.pool.spawn_fifo(move || shared.run(node)),
            Priority::High | Priority::Normal => self.pool.spawn(move || shared.run(node)),
        }
    }

    fn schedule_local(&self, worker: &Worker, node: NodePtr) {
        trace!(?node, worker = worker.index(), "schedule on worker");
        self.schedule(node);
    }
}

impl Shared {
    /// Submits a plain task with no dependencies.
    pub(super) fn spawn_async(self: &Arc<Self>, params: TaskParams, work: Work) {
        self.topology.increment();
        let node = self
            .nodes
            .animate(params, None, 0, NodeKind::async_work(work));
        self.schedule(node);
    }

    /// Spawns a plain task owned by the running node `parent`.
    pub(super) fn spawn_child(self: &Arc<Self>, parent: NodePtr, params: TaskParams, work: Work) {
        // SAFETY: the parent is running and cannot retire before its
        // children, so it is animated.
        unsafe { parent.as_ref() }.retain_child();
        let node = self
            .nodes
            .animate(params, Some(parent), 0, NodeKind::async_work(work));
        self.schedule(node);
    }

    /// Submits a dependent task and links it behind `predecessors`.
    ///
    /// Every predecessor is checked before the node is animated, so a
    /// rejected submission leaves no trace on the topology or the pool.
    pub(super) fn spawn_dependent_async<'a>(
        self: &Arc<Self>,
        params: TaskParams,
        work: Work,
        predecessors: impl Iterator<Item = &'a AsyncTask>,
    ) -> AsyncTask {
        let predecessors: Vec<&AsyncTask> = predecessors
            .inspect(|predecessor| {
                assert!(
                    Arc::ptr_eq(predecessor.pool(), &self.nodes),
                    "predecessor `{}` belongs to another executor",
                    predecessor.name(),
                );
            })
            .collect();
        self.topology.increment();
        let node = self.nodes.animate(
            params,
            None,
            predecessors.len(),
            NodeKind::dependent_async(work),
        );
        let task = AsyncTask::adopt(node, Arc::clone(&self.nodes));
        if link_predecessors(node, &predecessors) {
            self.schedule(node);
        }
        task
    }

    /// Entry point of every pool job.
    ///
    /// Runs `node`, then whatever successor its completion left in this
    /// job's cache slot, until the slot stays empty.
    fn run(self: &Arc<Self>, node: NodePtr) {
        let mut worker = Worker::new(self.pool.current_thread_index());
        let mut next = Some(node);
        while let Some(node) = next {
            self.invoke(&mut worker, node);
            next = worker.take_cached();
            if let Some(cached) = next {
                trace!(node = ?cached, worker = worker.index(), "run cached successor");
            }
        }
    }

    fn invoke(self: &Arc<Self>, worker: &mut Worker, node: NodePtr) {
        // SAFETY: a scheduled node stays animated until its teardown below.
        let node_ref = unsafe { node.as_ref() };
        let _span = tracing::trace_span!(
            "task",
            name = node_ref.params().name(),
            worker = worker.index()
        )
        .entered();

        let work = node_ref.take_work().expect("Executor::invoke: [1]");
        let runtime = Runtime::new(self, node);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(&runtime))) {
            // Tasks with a future report their own panics; this only sees
            // silent ones.
            error!(
                task = node_ref.params().name(),
                panic = panic_message(&*payload),
                "silent task panicked"
            );
        }
        // Children hold a pointer to this node.
        runtime.corun_all();

        match node_ref.kind() {
            NodeKind::Async(_) => self.tear_down_async(node),
            NodeKind::DependentAsync(_) => self.tear_down_dependent_async(worker, node),
            NodeKind::Vacant => unreachable!("Executor::invoke: [2]"),
        }
    }

    fn tear_down_async(&self, node: NodePtr) {
        // SAFETY: the node has run and is only referenced from here.
        let parent = unsafe { node.as_ref() }.parent();
        unsafe { self.nodes.recycle(node) };
        self.release(parent);
    }

    fn tear_down_dependent_async(self: &Arc<Self>, worker: &mut Worker, node: NodePtr) {
        // SAFETY: the executor's `use_count` unit keeps the node animated
        // until the release below.
        let node_ref = unsafe { node.as_ref() };
        let dependent = node_ref.dependent();
        let successors = dependent.finish();
        cascade(worker, &successors, self);

        let parent = node_ref.parent();
        if dependent.release() {
            // SAFETY: no handle is left.
            unsafe { self.nodes.recycle(node) };
        }
        self.release(parent);
    }

    /// Routes a teardown to the parent's join counter, or to the topology
    /// for top-level tasks.
    fn release(&self, parent: Option<NodePtr>) {
        match parent {
            // SAFETY: the parent waits for this decrement before retiring.
            Some(parent) => unsafe { parent.as_ref() }.release_child(),
            None => self.topology.decrement(),
        }
    }
}

/// Registers `node` behind every predecessor.
///
/// `node` must have been animated with a join counter equal to
/// `predecessors.len()`. Returns `true` iff every predecessor had already
/// finished, in which case the caller must schedule `node`. Otherwise the
/// last predecessor to finish schedules it.
pub(crate) fn link_predecessors(node: NodePtr, predecessors: &[&AsyncTask]) -> bool {
    let mut remaining = predecessors.len();
    for predecessor in predecessors {
        // SAFETY: the borrowed handle keeps the predecessor animated.
        let predecessor = unsafe { predecessor.node().as_ref() };
        if let Some(left) = Node::depend_on(node, predecessor) {
            remaining = left;
        }
    }
    remaining == 0
}

/// Releases the successors of a finished node.
///
/// Each successor whose last predecessor this was becomes ready. The most
/// recently found one is kept in the worker's cache slot; a node it displaces
/// is scheduled. At most one node is ever cached.
pub(crate) fn cascade(worker: &mut Worker, successors: &[NodePtr], scheduler: &impl Scheduler) {
    for &successor in successors {
        // SAFETY: a successor cannot run before this decrement.
        if unsafe { successor.as_ref() }.resolve_one() {
            if let Some(displaced) = worker.stash(successor) {
                scheduler.schedule_local(worker, displaced);
            }
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{node::AsyncState, pool::NodePool};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<NodePtr>>);

    impl Scheduler for Recorder {
        fn schedule(&self, node: NodePtr) {
            self.0.lock().unwrap().push(node);
        }

        fn schedule_local(&self, _worker: &Worker, node: NodePtr) {
            self.schedule(node);
        }
    }

    impl Recorder {
        fn scheduled(&self) -> Vec<NodePtr> {
            self.0.lock().unwrap().clone()
        }
    }

    fn dependent(pool: &Arc<NodePool>, num_dependents: usize) -> AsyncTask {
        let node = pool.animate(
            TaskParams::default(),
            None,
            num_dependents,
            NodeKind::dependent_async(Box::new(|_| {})),
        );
        AsyncTask::adopt(node, Arc::clone(pool))
    }

    /// Drops the executor's `use_count` unit the way teardown would.
    fn retire(task: &AsyncTask) {
        let node = unsafe { task.node().as_ref() };
        if node.dependent().state() != AsyncState::Finished {
            drop(node.dependent().finish());
        }
        assert!(!node.dependent().release());
    }

    #[test]
    fn no_predecessors_is_ready_immediately() {
        let pool = Arc::new(NodePool::new(8));
        let a = dependent(&pool, 0);
        assert!(link_predecessors(a.node(), &[]));
        assert_eq!(unsafe { a.node().as_ref() }.join_counter(), 0);
        retire(&a);
        drop(a);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn unfinished_predecessor_defers_scheduling() {
        let pool = Arc::new(NodePool::new(8));
        let recorder = Recorder::default();
        let a = dependent(&pool, 0);
        let b = dependent(&pool, 1);
        assert!(!link_predecessors(b.node(), &[&a]));
        let b_node = unsafe { b.node().as_ref() };
        assert_eq!(b_node.join_counter(), 1);

        let mut worker = Worker::new(None);
        let successors = unsafe { a.node().as_ref() }.dependent().finish();
        cascade(&mut worker, &successors, &recorder);
        assert_eq!(b_node.join_counter(), 0);
        assert_eq!(worker.cached(), Some(b.node()));
        assert!(recorder.scheduled().is_empty());

        assert!(!unsafe { a.node().as_ref() }.dependent().release());
        retire(&b);
        drop((a, b));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn finished_predecessor_is_not_appended() {
        let pool = Arc::new(NodePool::new(8));
        let a = dependent(&pool, 0);
        let a_dependent = unsafe { a.node().as_ref() }.dependent();
        assert!(a_dependent.finish().is_empty());

        let b = dependent(&pool, 1);
        assert!(link_predecessors(b.node(), &[&a]));
        assert_eq!(unsafe { b.node().as_ref() }.join_counter(), 0);
        assert_eq!(a_dependent.state(), AsyncState::Finished);

        assert!(!a_dependent.release());
        retire(&b);
        drop((a, b));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn fan_out_caches_one_and_schedules_the_other() {
        let pool = Arc::new(NodePool::new(8));
        let recorder = Recorder::default();
        let a = dependent(&pool, 0);
        let b = dependent(&pool, 1);
        let c = dependent(&pool, 1);
        assert!(!link_predecessors(b.node(), &[&a]));
        assert!(!link_predecessors(c.node(), &[&a]));

        let mut worker = Worker::new(Some(0));
        let successors = unsafe { a.node().as_ref() }.dependent().finish();
        assert_eq!(successors, vec![b.node(), c.node()]);
        cascade(&mut worker, &successors, &recorder);

        let cached = worker.take_cached().expect("one successor is cached");
        let scheduled = recorder.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_ne!(cached, scheduled[0]);
        for node in [cached, scheduled[0]] {
            assert!(node == b.node() || node == c.node());
        }

        assert!(!unsafe { a.node().as_ref() }.dependent().release());
        retire(&b);
        retire(&c);
        drop((a, b, c));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn shared_successor_waits_for_every_predecessor() {
        let pool = Arc::new(NodePool::new(8));
        let recorder = Recorder::default();
        let a = dependent(&pool, 0);
        let b = dependent(&pool, 0);
        let c = dependent(&pool, 2);
        assert!(!link_predecessors(c.node(), &[&a, &b]));

        let mut worker = Worker::new(Some(0));
        let from_a = unsafe { a.node().as_ref() }.dependent().finish();
        cascade(&mut worker, &from_a, &recorder);
        assert_eq!(worker.cached(), None);
        assert_eq!(unsafe { c.node().as_ref() }.join_counter(), 1);

        let from_b = unsafe { b.node().as_ref() }.dependent().finish();
        cascade(&mut worker, &from_b, &recorder);
        assert_eq!(worker.take_cached(), Some(c.node()));
        assert!(recorder.scheduled().is_empty());

        for task in [&a, &b] {
            assert!(!unsafe { task.node().as_ref() }.dependent().release());
        }
        retire(&c);
        drop((a, b, c));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn mixed_finished_and_unfinished_predecessors() {
        let pool = Arc::new(NodePool::new(8));
        let done = dependent(&pool, 0);
        drop(unsafe { done.node().as_ref() }.dependent().finish());
        let pending = dependent(&pool, 0);

        let c = dependent(&pool, 2);
        assert!(!link_predecessors(c.node(), &[&done, &pending]));
        assert_eq!(unsafe { c.node().as_ref() }.join_counter(), 1);

        let recorder = Recorder::default();
        let mut worker = Worker::new(None);
        let successors = unsafe { pending.node().as_ref() }.dependent().finish();
        cascade(&mut worker, &successors, &recorder);
        assert_eq!(worker.take_cached(), Some(c.node()));

        for task in [&done, &pending] {
            assert!(!unsafe { task.node().as_ref() }.dependent().release());
        }
        retire(&c);
        drop((done, pending, c));
        assert_eq!(pool.live(), 0);
    }
}
