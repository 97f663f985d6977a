//! Event loop context, blocking offload and the blocking-read guard.
//!
//! The client never touches process-wide runtimes. Every client is bound to an
//! [`EventLoop`]: either a dedicated multi-thread tokio runtime it owns, or a
//! handle to a runtime owned by the application. Connection I/O is spawned onto
//! it; blocking work (reading caller-supplied body sources, optional response
//! decoding) goes through an [`OffloadExecutor`].

use crate::error::HttpError;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

thread_local! {
    static EVENT_LOOP_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Runs blocking closures away from the event loop.
pub trait OffloadExecutor: Send + Sync + 'static {
    /// Schedule `task` on a thread that may block.
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

impl OffloadExecutor for Handle {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        drop(self.spawn_blocking(task));
    }
}

/// Run `f` on `executor` and await its result.
///
/// # Errors
///
/// Returns `HttpError::Offload` if the closure panics or the executor drops it.
pub async fn offload<T, F>(executor: &dyn OffloadExecutor, f: F) -> Result<T, HttpError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    executor.execute(Box::new(move || {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
        if tx.send(outcome).is_err() {
            tracing::trace!("offloaded task finished after its caller went away");
        }
    }));

    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(panic)) => Err(HttpError::Offload(panic_message(panic.as_ref()))),
        Err(_) => Err(HttpError::Offload(
            "executor dropped the task before it ran".to_owned(),
        )),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_owned()
    }
}

fn mark_event_loop_thread() {
    EVENT_LOOP_THREAD.with(|flag| flag.set(true));
}

/// Whether the current thread drives connection I/O for an event loop.
///
/// Worker threads of a dedicated loop are marked whenever they park or wake.
/// Threads of a borrowed runtime are marked the first time they poll
/// connection I/O, which on a current-thread runtime is the thread calling
/// `block_on`. Blocking-pool threads are never marked.
#[must_use]
pub fn on_event_loop_thread() -> bool {
    EVENT_LOOP_THREAD.with(Cell::get)
}

/// Reject blocking waits on a thread that drives connection I/O.
///
/// Parking that thread would stop the very I/O the waiter depends on.
///
/// # Errors
///
/// Returns `HttpError::BlockingReadOnEventLoop` when called on such a thread.
pub fn check_not_on_event_loop() -> Result<(), HttpError> {
    if on_event_loop_thread() {
        return Err(HttpError::BlockingReadOnEventLoop);
    }
    Ok(())
}

pin_project! {
    /// Future wrapper that marks every thread polling it as an event loop thread.
    pub struct IoScoped<F> {
        #[pin]
        inner: F,
    }
}

impl<F> IoScoped<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: Future> Future for IoScoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        mark_event_loop_thread();
        self.project().inner.poll(cx)
    }
}

/// Explicit I/O context shared by clients.
///
/// Created once by the application (or implicitly by
/// [`crate::HttpClientBuilder::build`]) and passed to every client that should
/// share it. A dedicated runtime is shut down by [`EventLoop::shutdown`] or when
/// the last reference is dropped; a borrowed handle is never shut down here.
pub struct EventLoop {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl EventLoop {
    /// Start a dedicated multi-thread runtime.
    ///
    /// `worker_threads == 0` uses tokio's default (one per CPU).
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Runtime` if the runtime cannot be started.
    pub fn new(worker_threads: usize) -> Result<Self, HttpError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_name("rawhttp-event-loop")
            .on_thread_park(mark_event_loop_thread)
            .on_thread_unpark(mark_event_loop_thread);
        if worker_threads > 0 {
            builder.worker_threads(worker_threads);
        }
        let runtime = builder.build().map_err(HttpError::Runtime)?;
        tracing::debug!(worker_threads, "started dedicated event loop");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Drive I/O on a runtime owned elsewhere.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: Mutex::new(None),
        }
    }

    /// Runtime handle used for connection I/O
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Default offload executor: the runtime's blocking pool
    #[must_use]
    pub fn offload_executor(&self) -> Arc<dyn OffloadExecutor> {
        Arc::new(self.handle.clone())
    }

    /// Spawn connection I/O; threads polling it are refused blocking body reads.
    pub fn spawn_io<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(IoScoped::new(future))
    }

    /// Stop a dedicated runtime without waiting for in-flight tasks.
    ///
    /// Pending exchanges fail and open streams report end-of-data or an error.
    /// Calling this more than once, or on a borrowed handle, does nothing.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            tracing::debug!("shutting down dedicated event loop");
            runtime.shutdown_background();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("dedicated", &self.runtime.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_io_scope_marks_polling_thread() {
        assert!(check_not_on_event_loop().is_ok());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(IoScoped::new(async {}));

        // Marking outlives the poll: the thread keeps driving this runtime
        assert!(on_event_loop_thread());
        assert!(matches!(
            check_not_on_event_loop(),
            Err(HttpError::BlockingReadOnEventLoop)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_io_marks_workers_not_blocking_pool() {
        let event_loop = EventLoop::with_handle(Handle::current());
        let marked = event_loop.spawn_io(async { on_event_loop_thread() }).await.unwrap();
        assert!(marked);

        let blocking = tokio::task::spawn_blocking(on_event_loop_thread).await.unwrap();
        assert!(!blocking);
    }

    #[tokio::test]
    async fn test_offload_returns_value() {
        let handle = Handle::current();
        let value = offload(&handle, || 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_offload_reports_panic() {
        let handle = Handle::current();
        let err = offload(&handle, || -> u8 { panic!("boom") })
            .await
            .unwrap_err();
        match err {
            HttpError::Offload(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_dedicated_event_loop_runs_and_shuts_down() {
        let event_loop = EventLoop::new(1).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        drop(event_loop.spawn_io(async move {
            tx.send(on_event_loop_thread()).unwrap();
        }));
        assert!(rx.recv().unwrap());

        let (tx, rx) = std::sync::mpsc::channel();
        drop(event_loop.handle().spawn(async move {
            tx.send(on_event_loop_thread()).unwrap();
        }));
        assert!(rx.recv().unwrap());

        let (tx, rx) = std::sync::mpsc::channel();
        event_loop
            .offload_executor()
            .execute(Box::new(move || tx.send(on_event_loop_thread()).unwrap()));
        assert!(!rx.recv().unwrap());

        event_loop.shutdown();
        event_loop.shutdown();
    }
}
