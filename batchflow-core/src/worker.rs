use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// WorkerPool owns the OS threads that run the transforms of one pipeline run. The transforms are
/// CPU bound, so they run on a dedicated runtime and never block the task that drives the source and
/// the commits. The threads are shut down when the pool is dropped, on success and on error.
pub(crate) struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    num_workers: usize,
}

impl WorkerPool {
    pub(crate) fn new(num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(Error::Config(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(num_workers)
            .thread_name("batchflow-worker")
            .enable_time()
            .build()
            .map_err(|e| Error::WorkerPool(format!("failed to start worker pool: {e}")))?;
        let handle = runtime.handle().clone();
        info!(num_workers, "Started worker pool");

        Ok(Self {
            runtime: Some(runtime),
            handle,
            num_workers,
        })
    }

    /// Runs the closure on one of the pool's threads.
    pub(crate) fn submit<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn(async move { work() })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // dropping a runtime from within an async context panics, shutdown_background does not
            runtime.shutdown_background();
            debug!(num_workers = self.num_workers, "Worker pool shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_work_runs_on_pool_threads() {
        let pool = WorkerPool::new(2).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                pool.submit(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    (i * 2, std::thread::current().name().map(str::to_string))
                })
            })
            .collect();

        let mut names = HashSet::new();
        for (i, handle) in handles.into_iter().enumerate() {
            let (doubled, name) = handle.await.unwrap();
            assert_eq!(doubled, i * 2);
            names.insert(name);
        }
        assert_eq!(names, HashSet::from([Some("batchflow-worker".to_string())]));
    }

    #[tokio::test]
    async fn test_zero_workers_is_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let pool = WorkerPool::new(1).unwrap();
        let answer = pool.submit(|| 42).await.unwrap();
        assert_eq!(answer, 42);
        // must not panic although we are inside a runtime
        drop(pool);
    }
}
