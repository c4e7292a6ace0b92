//! Dependency-driven task executor with reference-counted completion
//! tracking.
//!
//! This crate runs tasks on a work-stealing thread pool. It:
//! - Schedules plain tasks immediately and returns a future of their result,
//!   or nothing at all for "silent" tasks.
//! - Chains dependent tasks through [`AsyncTask`] handles. A dependent task
//!   is scheduled exactly once, when its last predecessor finishes, with no
//!   lock beyond a three-state spin flag per predecessor.
//! - Keeps one newly-ready successor on the worker that released it, so
//!   chains run back to back without a trip through the pool's queues.
//! - Recycles task storage through a concurrent free list once the executor
//!   and every handle have let go of it.
//!
//! Key modules:
//! - `config`: the [`ExecutorBuilder`] used to size and name the pool.
//! - `executor`: submission APIs, the dependency protocol, the completion
//!   cascade and the [`Runtime`] handed to running tasks.
//! - `task`: the [`AsyncTask`] handle and [`TaskFuture`] result type.
//! - `types`: per-task [`TaskParams`] and [`Priority`].
//!
//! Quick start:
//!
//! ```no_run
//! use depflow::Executor;
//!
//! let executor = Executor::new(4).expect("executor");
//! let (a, _) = executor.dependent_async("load", || 1, []);
//! let (b, _) = executor.dependent_async("parse", || 2, []);
//! let (_, sum) = executor.dependent_async("merge", || 3, [&a, &b]);
//! assert_eq!(sum.wait(), Ok(3));
//! executor.wait_for_all();
//! ```
//!
//! Dependencies are not checked for cycles: tasks in a cycle are never
//! scheduled.

/// Executor configuration.
///
/// Exposes the [`ExecutorBuilder`] that sizes the worker pool and the node
/// free list.
pub mod config;
/// The dependent-task executor.
///
/// Contains task submission, predecessor registration, the completion
/// cascade that schedules newly ready successors, and the [`Runtime`] of
/// running tasks.
pub mod executor;
mod node;
mod pool;
mod sync;
/// User-facing task handles.
///
/// Defines [`AsyncTask`], used to chain dependent tasks, and [`TaskFuture`],
/// used to observe a task's result or panic.
pub mod task;
mod topology;
/// Task parameters passed opaquely through the executor.
pub mod types;
mod worker;

pub use crate::{
    config::ExecutorBuilder,
    executor::{Executor, ExecutorBuildError, Runtime},
    task::{AsyncTask, TaskError, TaskFuture},
    types::{Priority, TaskParams},
};
