//! Bounded worker pool for offloaded long-running work.
//!
//! The gateway's event handling must never be starved by long-running
//! work (probe artifact generation and similar out-of-band jobs). Such
//! work goes through [`BoundedWorkerPool::execute`]: concurrency is
//! capped by a semaphore and each task gets a hard execution-time
//! ceiling of 5 minutes, after which it is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

/// Hard ceiling on one offloaded task's execution time.
pub const MAX_EXECUTE_TIME: Duration = Duration::from_secs(5 * 60);

/// Default pool concurrency.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Errors from offloaded execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The task exceeded [`MAX_EXECUTE_TIME`] and was cancelled.
    #[error("worker task exceeded execution ceiling of {}s", MAX_EXECUTE_TIME.as_secs())]
    ExecutionTimeout,

    /// The pool is shutting down and no longer accepts work.
    #[error("worker pool closed")]
    Closed,
}

/// Semaphore-bounded executor with an execution-time ceiling.
#[derive(Clone)]
pub struct BoundedWorkerPool {
    permits: Arc<Semaphore>,
}

impl Default for BoundedWorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl BoundedWorkerPool {
    /// Create a pool allowing `size` concurrent tasks.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    /// Run `task` under a pool permit with the execution-time ceiling.
    ///
    /// Waits for a permit if the pool is saturated; the ceiling applies
    /// to execution only, not to the wait.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::ExecutionTimeout`] if the task exceeds
    /// [`MAX_EXECUTE_TIME`], or [`WorkerError::Closed`] if the pool was
    /// shut down.
    pub async fn execute<F, T>(&self, task: F) -> Result<T, WorkerError>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| WorkerError::Closed)?;

        match tokio::time::timeout(MAX_EXECUTE_TIME, task).await {
            Ok(output) => Ok(output),
            Err(_) => {
                warn!("offloaded task cancelled at execution ceiling");
                Err(WorkerError::ExecutionTimeout)
            },
        }
    }

    /// Stop accepting new work. In-flight tasks run to completion.
    pub fn close(&self) {
        self.permits.close();
    }
}
