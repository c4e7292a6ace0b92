use crate::executor::Runtime;
use derive_more::Display;
use std::borrow::Cow;

/// Type-erased callable stored in a node.
///
/// Every callable receives the [`Runtime`] of the node it runs in; callables
/// submitted without runtime access simply ignore it.
pub(crate) type Work = Box<dyn FnOnce(&Runtime<'_>) + Send + 'static>;

/// Scheduling hint attached to a task.
#[derive(Debug, Display, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Pushed LIFO, so it tends to run before older work on the same worker.
    #[display("high")]
    High,
    /// Same dispatch path as `High`.
    #[default]
    #[display("normal")]
    Normal,
    /// Pushed FIFO behind work that is already queued.
    #[display("low")]
    Low,
}

/// Per-task parameters, carried opaquely by the node for its whole lifetime.
///
/// Anything that converts into `TaskParams` can be passed to the submission
/// methods, so `"name"` or `String::from("name")` work as shorthands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TaskParams {
    name: Cow<'static, str>,
    priority: Priority,
}

impl TaskParams {
    /// Parameters with the given human-readable name and default priority.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::default(),
        }
    }

    /// Replace the priority hint.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Task name; empty when none was given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Priority hint.
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl From<&'static str> for TaskParams {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskParams {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<Priority> for TaskParams {
    fn from(priority: Priority) -> Self {
        Self::default().with_priority(priority)
    }
}
