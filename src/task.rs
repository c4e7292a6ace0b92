use crate::{
    node::{AsyncState, NodePtr},
    pool::NodePool,
    types::Work,
};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use futures::channel::oneshot;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};
use thiserror::Error;

/// Handle to a dependent task, used to express dependencies of later tasks.
///
/// Handles are reference counted together with the executor: the task's node
/// is recycled once it has finished and every handle has been dropped.
/// Cloning is cheap and does not duplicate the task.
pub struct AsyncTask {
    node: NodePtr,
    pool: Arc<NodePool>,
}

// SAFETY: the handle only touches the node through atomics.
unsafe impl Send for AsyncTask {}
unsafe impl Sync for AsyncTask {}

impl AsyncTask {
    /// Adopts the `use_count` unit reserved for the handle at animation.
    pub(crate) fn adopt(node: NodePtr, pool: Arc<NodePool>) -> Self {
        Self { node, pool }
    }

    pub(crate) fn node(&self) -> NodePtr {
        self.node
    }

    pub(crate) fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Name the task was submitted with.
    pub fn name(&self) -> &str {
        // SAFETY: this handle keeps the node animated.
        unsafe { self.node.as_ref() }.params().name()
    }

    /// Whether the task has run and its successors have been released.
    pub fn is_done(&self) -> bool {
        // SAFETY: this handle keeps the node animated.
        let node = unsafe { self.node.as_ref() };
        node.dependent().state() == AsyncState::Finished
    }

    /// Number of owners of the task: live handles, plus one while the
    /// executor has not retired it.
    pub fn use_count(&self) -> usize {
        // SAFETY: this handle keeps the node animated.
        let node = unsafe { self.node.as_ref() };
        node.dependent().use_count()
    }
}

impl Clone for AsyncTask {
    fn clone(&self) -> Self {
        // SAFETY: this handle keeps the node animated.
        unsafe { self.node.as_ref() }.dependent().retain();
        Self {
            node: self.node,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for AsyncTask {
    fn drop(&mut self) {
        // SAFETY: this handle keeps the node animated until the release.
        let last = unsafe { self.node.as_ref() }.dependent().release();
        if last {
            // SAFETY: the executor and every other handle have let go.
            unsafe { self.pool.recycle(self.node) };
        }
    }
}

impl PartialEq for AsyncTask {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for AsyncTask {}

impl fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("name", &self.name())
            .field("done", &self.is_done())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// Failure observed through a [`TaskFuture`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The callable panicked; carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was destroyed without running.
    #[error("task was dropped before producing a result")]
    Abandoned,
}

impl TaskError {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(&*payload).to_owned())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&'static str>().copied())
        .unwrap_or("<non-string panic payload>")
}

/// Result of a task submitted with a future.
///
/// Can be blocked on with [`TaskFuture::wait`], polled with
/// [`TaskFuture::try_get`], or `.await`ed.
#[must_use = "dropping a TaskFuture discards the task's result"]
#[derive(Debug)]
pub struct TaskFuture<R> {
    receiver: oneshot::Receiver<thread::Result<R>>,
}

impl<R> TaskFuture<R> {
    /// Blocks the current thread until the task has run.
    ///
    /// Must not be called from inside a task of the same executor: the
    /// blocked worker cannot run anything else meanwhile.
    ///
    /// # Errors
    /// If the callable panicked or the task was dropped unrun.
    pub fn wait(self) -> Result<R, TaskError> {
        futures::executor::block_on(self)
    }

    /// Returns the result if the task has already run.
    ///
    /// Yields `Some` at most once with a value; subsequent calls return
    /// `Some(Err(TaskError::Abandoned))`.
    pub fn try_get(&mut self) -> Option<Result<R, TaskError>> {
        match self.receiver.try_recv() {
            Ok(None) => None,
            Ok(Some(result)) => Some(result.map_err(TaskError::from_panic)),
            Err(oneshot::Canceled) => Some(Err(TaskError::Abandoned)),
        }
    }
}

impl<R> Future for TaskFuture<R> {
    type Output = Result<R, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| match received {
            Ok(result) => result.map_err(TaskError::from_panic),
            Err(oneshot::Canceled) => Err(TaskError::Abandoned),
        })
    }
}

/// Wraps `f` so its result, or its panic, is delivered to the returned
/// future.
pub(crate) fn packaged<F, R>(f: F) -> (Work, TaskFuture<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let work: Work = Box::new(move |_| {
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        // The caller may have dropped the future.
        let _ = sender.send(result);
    });
    (work, TaskFuture { receiver })
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let owned = TaskError::from_panic(Box::new(String::from("owned")));
        assert_eq!(owned, TaskError::Panicked("owned".into()));
        let borrowed = TaskError::from_panic(Box::new("borrowed"));
        assert_eq!(borrowed, TaskError::Panicked("borrowed".into()));
        let other = TaskError::from_panic(Box::new(7_u32));
        assert!(matches!(other, TaskError::Panicked(message) if message.contains("non-string")));
    }

    #[test]
    fn dropped_work_abandons_future() {
        let (work, mut future) = packaged(|| 1);
        assert_eq!(future.try_get(), None);
        drop(work);
        assert_eq!(future.wait(), Err(TaskError::Abandoned));
    }
}
