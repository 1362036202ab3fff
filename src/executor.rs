//! Background execution of pairing operations.
//!
//! Pairing can block for over a minute while the user reads a PIN off the
//! device, so operations never run on the caller's thread. Each operation
//! gets a dedicated OS thread with its own [`ExecutionContext`] (a
//! multi-threaded tokio runtime), which is torn down when the operation
//! finishes. The result comes back through an [`OperationHandle`].

use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Runtime owned by one background operation.
#[derive(Debug)]
pub struct ExecutionContext {
    runtime: tokio::runtime::Runtime,
    label: String,
}

impl ExecutionContext {
    /// Build a multi-threaded context for the operation `label`.
    pub fn multi_threaded(label: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("ble-{}", label))
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to start runtime for {}: {}", label, e)))?;

        debug!("Execution context for {} ready", label);
        Ok(Self {
            runtime,
            label: label.to_string(),
        })
    }

    /// Run `future` to completion inside this context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        debug!("Tearing down execution context for {}", self.label);
    }
}

/// Pending result of a background operation.
///
/// Resolves to [`Error::Internal`] if the operation dies without
/// producing a result.
#[derive(Debug)]
#[must_use = "the operation result is lost if the handle is dropped"]
pub struct OperationHandle<T> {
    label: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> OperationHandle<T> {
    /// A handle that is already resolved.
    pub fn ready(label: &str, result: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self {
            label: label.to_string(),
            rx,
        }
    }

    /// The operation label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the result if the operation has finished.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.aborted())),
        }
    }

    /// Block the current thread until the operation finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }

    fn aborted(&self) -> Error {
        Error::Internal(format!("{} operation aborted", self.label))
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.aborted())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Spawns each operation on its own thread and execution context.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundExecutor;

impl BackgroundExecutor {
    /// Create an executor.
    pub fn new() -> Self {
        Self
    }

    /// Run the future built by `make` on a fresh background thread.
    ///
    /// `make` is called on the background thread, so the future itself
    /// need not be `Send`.
    pub fn spawn<T, F, Fut>(&self, label: &str, make: F) -> OperationHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>>,
    {
        let (tx, rx) = oneshot::channel();
        let thread_label = label.to_string();

        let spawned = std::thread::Builder::new()
            .name(format!("ble-op-{}", label))
            .spawn(move || {
                let context = match ExecutionContext::multi_threaded(&thread_label) {
                    Ok(context) => context,
                    Err(e) => {
                        error!("{}", e);
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                let result = context.block_on(make());
                if tx.send(result).is_err() {
                    debug!("{} finished after its handle was dropped", thread_label);
                }
            });

        match spawned {
            Ok(_) => OperationHandle {
                label: label.to_string(),
                rx,
            },
            Err(e) => OperationHandle::ready(
                label,
                Err(Error::Internal(format!("Failed to spawn {} thread: {}", label, e))),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_is_delivered() {
        let handle = BackgroundExecutor::new().spawn("answer", || async { Ok(42) });
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_runs_on_its_own_thread() {
        let handle = BackgroundExecutor::new().spawn("named", || async {
            Ok(std::thread::current().name().map(str::to_string))
        });

        let name = handle.await.unwrap();
        assert!(name.is_some_and(|n| n.starts_with("ble-")));
    }

    #[tokio::test]
    async fn test_error_is_propagated() {
        let handle: OperationHandle<()> = BackgroundExecutor::new()
            .spawn("failing", || async { Err(Error::NotConnected) });
        assert_eq!(handle.await.unwrap_err().code(), "NOT_CONNECTED");
    }

    async fn explode() -> Result<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_resolves_to_internal() {
        let handle = BackgroundExecutor::new().spawn("panicking", explode);

        let err = handle.await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
        assert!(err.to_string().contains("panicking"));
    }

    #[test]
    fn test_handle_pending_until_operation_finishes() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handle = BackgroundExecutor::new().spawn("gated", move || async move {
            let _ = release_rx.recv();
            Ok(5)
        });

        let mut task = tokio_test::task::spawn(handle);
        tokio_test::assert_pending!(task.poll());

        release_tx.send(()).unwrap();
        let result = loop {
            if let Poll::Ready(result) = task.poll() {
                break result;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn test_ready_handle_and_blocking_wait() {
        let mut ready = OperationHandle::ready("ready", Ok(7));
        assert_eq!(ready.try_result().unwrap().unwrap(), 7);

        let handle = BackgroundExecutor::new().spawn("blocking", || async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok("done")
        });
        assert_eq!(handle.wait().unwrap(), "done");
    }
}
