//! Deferred actions and their normalization into a single future shape.
//!
//! An action may be a future that already exists, a synchronous closure, or
//! a closure producing a future. [`Deferrable::into_future`] invokes closures
//! immediately and turns every failure, including panics, into an error
//! carried by the returned future.

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::future::{self, BoxFuture, FutureExt};
use tracing::Instrument;

use crate::errors::PanicError;

/// The uniform shape every deferred action is normalized into.
pub type DeferredFuture = BoxFuture<'static, anyhow::Result<()>>;

type SyncFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type AsyncFn = Box<dyn FnOnce() -> DeferredFuture + Send>;

const ORIGIN: &str = "deferred action";

/// A unit of deferred work.
pub enum Deferrable {
    /// A future that is awaited as-is.
    Future(DeferredFuture),
    /// A closure that runs to completion when invoked.
    Sync(SyncFn),
    /// A closure that returns a future when invoked.
    Async(AsyncFn),
}

impl Deferrable {
    /// Wraps an existing future.
    pub fn future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Future(fut.boxed())
    }

    /// Wraps a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Wraps a closure returning a future.
    pub fn lazy<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Box::new(move || f().boxed()))
    }

    /// Returns true if the action has no suspension points.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    /// Short label used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Future(_) => "future",
            Self::Sync(_) => "sync",
            Self::Async(_) => "async",
        }
    }

    /// Normalizes the action.
    ///
    /// Closures are invoked before this returns. A synchronous failure or
    /// panic never escapes; it comes back as an already-failed future.
    pub fn into_future(self) -> DeferredFuture {
        match self {
            Self::Future(fut) => catch_poll_panics(fut),
            Self::Sync(f) => {
                let outcome = catch_unwind(AssertUnwindSafe(f))
                    .unwrap_or_else(|payload| Err(PanicError::from_payload(ORIGIN, &*payload).into()));
                future::ready(outcome).boxed()
            }
            Self::Async(f) => match catch_unwind(AssertUnwindSafe(f)) {
                Ok(fut) => catch_poll_panics(fut),
                Err(payload) => {
                    future::ready(Err(PanicError::from_payload(ORIGIN, &*payload).into())).boxed()
                }
            },
        }
    }
}

impl fmt::Debug for Deferrable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferrable").field(&self.kind()).finish()
    }
}

fn catch_poll_panics(fut: DeferredFuture) -> DeferredFuture {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|outcome| {
            outcome.unwrap_or_else(|payload| Err(PanicError::from_payload(ORIGIN, &*payload).into()))
        })
        .boxed()
}

/// Polls a normalized action once.
///
/// Runs everything up to the first suspension point. Returns `None` if the
/// action is still pending afterwards.
pub(crate) fn poll_once(fut: &mut DeferredFuture) -> Option<anyhow::Result<()>> {
    fut.now_or_never()
}

/// Drives a partially polled action to completion in the background.
///
/// Uses the current tokio runtime when there is one, otherwise a helper
/// thread. `report` receives the outcome.
pub(crate) fn spawn_remainder<R>(fut: DeferredFuture, report: R)
where
    R: FnOnce(anyhow::Result<()>) + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut.map(report).in_current_span());
        }
        Err(_) => {
            std::thread::spawn(move || report(futures::executor::block_on(fut)));
        }
    }
}
