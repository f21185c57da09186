use std::convert::identity;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::{FutureExt, TryFutureExt};
use tessera_error::{TesseraError, TesseraExpect, TesseraResult, tessera_err};
use tokio::runtime::{Builder, Handle, Runtime};

/// An executor for the decode units of a scan.
///
/// Scans hand each unit to an executor and await its result, so a unit may run on another
/// thread while the caller keeps polling the stream.
pub trait TaskExecutor: 'static + Send + Sync {
    fn do_spawn(
        &self,
        fut: BoxFuture<'static, TesseraResult<()>>,
    ) -> BoxFuture<'static, TesseraResult<()>>;
}

impl<T: TaskExecutor + ?Sized> TaskExecutor for Arc<T> {
    fn do_spawn(
        &self,
        fut: BoxFuture<'static, TesseraResult<()>>,
    ) -> BoxFuture<'static, TesseraResult<()>> {
        self.as_ref().do_spawn(fut)
    }
}

pub trait TaskExecutorExt: TaskExecutor {
    fn spawn<T>(
        &self,
        fut: impl Future<Output = TesseraResult<T>> + Send + 'static,
    ) -> BoxFuture<'static, TesseraResult<T>>
    where
        T: 'static + Send;
}

impl<E: TaskExecutor + ?Sized> TaskExecutorExt for E {
    fn spawn<T>(
        &self,
        fut: impl Future<Output = TesseraResult<T>> + Send + 'static,
    ) -> BoxFuture<'static, TesseraResult<T>>
    where
        T: 'static + Send,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped = async move {
            let result = fut.await;
            // The receiver is gone when the scan was dropped, so the result is not wanted.
            let _ = tx.send(result);
            Ok(())
        };

        let handle = self.do_spawn(wrapped.boxed());
        handle
            .and_then(|()| {
                rx.map_err(|e| tessera_err!("task was cancelled before completing: {e}"))
            })
            .map(|result| result.and_then(identity))
            .boxed()
    }
}

impl TaskExecutor for Handle {
    fn do_spawn(
        &self,
        f: BoxFuture<'static, TesseraResult<()>>,
    ) -> BoxFuture<'static, TesseraResult<()>> {
        Handle::spawn(self, f)
            .map_err(TesseraError::from)
            .map(|result| result.and_then(identity))
            .boxed()
    }
}

/// Runs every unit on the task that polls the scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn do_spawn(
        &self,
        fut: BoxFuture<'static, TesseraResult<()>>,
    ) -> BoxFuture<'static, TesseraResult<()>> {
        fut
    }
}

/// A dedicated multi-threaded runtime for decoding.
pub struct WorkerPool {
    runtime: Option<Runtime>,
}

impl WorkerPool {
    /// Start a pool with `worker_threads` threads, or one per core when `None`.
    pub fn new(worker_threads: Option<usize>) -> TesseraResult<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name("tessera-worker").enable_all();
        if let Some(threads) = worker_threads {
            if threads == 0 {
                return Err(tessera_err!(
                    InvalidConfiguration: "a worker pool needs at least one thread"
                ));
            }
            builder.worker_threads(threads);
        }
        Ok(Self {
            runtime: Some(builder.build()?),
        })
    }

    pub fn handle(&self) -> Option<&Handle> {
        self.runtime.as_ref().map(Runtime::handle)
    }
}

impl TaskExecutor for WorkerPool {
    fn do_spawn(
        &self,
        fut: BoxFuture<'static, TesseraResult<()>>,
    ) -> BoxFuture<'static, TesseraResult<()>> {
        match self.handle() {
            Some(handle) => handle.do_spawn(fut),
            None => futures::future::ready(Err(tessera_err!("worker pool has shut down"))).boxed(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // A runtime may be dropped from within another runtime, where blocking is not allowed.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

static DEFAULT_POOL: LazyLock<Arc<WorkerPool>> = LazyLock::new(|| {
    Arc::new(WorkerPool::new(None).tessera_expect("failed to start the default worker pool"))
});

/// The process-wide worker pool used by scans that were not given an executor.
pub fn default_executor() -> Arc<dyn TaskExecutor> {
    DEFAULT_POOL.clone()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn inline_executor_returns_the_value() {
        let value = InlineExecutor.spawn(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn errors_are_propagated() {
        let err = InlineExecutor
            .spawn(async { Err::<(), _>(tessera_err!("boom")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn worker_pool_runs_on_named_threads() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let name = pool
            .spawn(async { Ok(std::thread::current().name().map(str::to_string)) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("tessera-worker"));
    }

    #[tokio::test]
    async fn dropping_a_pool_inside_a_runtime() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(Some(1)).unwrap();
        let c = counter.clone();
        pool.spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(WorkerPool::new(Some(0)).is_err());
    }

    #[tokio::test]
    async fn tokio_handle_executor() {
        let executor: Arc<dyn TaskExecutor> = Arc::new(Handle::current());
        assert_eq!(executor.spawn(async { Ok("done") }).await.unwrap(), "done");
    }
}
