//! The host executor abstraction (spec.md §6): `execute(task)` must arrange
//! for `task` to run and must not silently drop it.

use std::sync::Arc;

/// A unit of work submitted by [`super::subscriber::Subscriber::dispatch_event`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Injected per event bus.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs `task` synchronously, on the calling thread. This is the "direct
/// inline executor" spec.md §5 calls out as the one case where
/// `dispatchEvent` blocks its caller.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns each task on a dedicated OS thread.
///
/// This is the simplest executor that genuinely does not block the poster,
/// for hosts with no async runtime in scope.
#[derive(Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        std::thread::spawn(task);
    }
}

/// Spawns each task onto a [`tokio`] runtime via `spawn_blocking`, since
/// subscriber handlers are plain synchronous closures.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    /// Bind to the runtime the caller is currently inside of.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime context, same as
    /// [`tokio::runtime::Handle::current`].
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}

pub(crate) fn default_executor() -> Arc<dyn Executor> {
    Arc::new(InlineExecutor)
}
