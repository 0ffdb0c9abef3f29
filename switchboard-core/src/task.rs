//! Task spawning abstraction for single-threaded runtimes.

use async_trait::async_trait;
use std::future::Future;

/// Provider for spawning local tasks in a single-threaded context.
///
/// The runtime is a cooperative single-threaded reactor: connection I/O
/// loops, timeout sweepers, and endpoint handlers all run as local tasks
/// on the same thread, so no state needs locking.
#[async_trait(?Send)]
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    ///
    /// The name is used for diagnostics only.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;

    /// Yield control to allow other tasks to run.
    async fn yield_now(&self);
}

/// Production task provider using `tokio::task::spawn_local`.
///
/// Requires running inside a `LocalSet` (or other local task context).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskProvider;

#[async_trait(?Send)]
impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, _name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        tokio::task::spawn_local(future)
    }

    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}
