//! Runs the main operation, drains deferred actions, and resolves the outcome.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn, Instrument};

use super::defer::{Defer, Registry};
use crate::action::{poll_once, spawn_remainder, DeferredFuture};
use crate::config::DeferConfig;
use crate::errors::{AggregateError, DeferError, PanicError};
use crate::lifecycle::{HostLifecycle, ProcessLifecycle};
use crate::options::DeferOptions;

const MAIN_ORIGIN: &str = "main operation";

/// Runs `main` with a `defer` handle bound to the process-wide lifecycle.
///
/// See [`DeferScope::provide`].
pub async fn provide_defer<T, E, F, Fut>(main: F) -> Result<T, DeferError>
where
    F: FnOnce(Defer) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    DeferScope::new().provide(main).await
}

/// Configured entry point for scoped deferred execution.
///
/// A scope is reusable; each [`DeferScope::provide`] call owns its own list
/// of deferred actions.
#[derive(Clone)]
pub struct DeferScope {
    lifecycle: Arc<dyn ProcessLifecycle>,
    config: Arc<DeferConfig>,
}

impl Default for DeferScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferScope {
    /// Creates a scope on [`HostLifecycle::global`] with default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: HostLifecycle::global(),
            config: Arc::new(DeferConfig::default()),
        }
    }

    /// Uses `lifecycle` for `also_on_exit` hooks.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn ProcessLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DeferConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    /// Runs `main`, then every action it deferred, last registered first.
    ///
    /// Resolves to the main value when nothing failed. If only the main
    /// operation failed its error comes back as [`DeferError::Main`]. Any
    /// surviving deferred failure yields [`DeferError::Aggregate`], led by
    /// the main error when there is one.
    ///
    /// Panics in `main` or in a deferred action are caught and reported as
    /// [`PanicError`]s.
    pub async fn provide<T, E, F, Fut>(&self, main: F) -> Result<T, DeferError>
    where
        F: FnOnce(Defer) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let registry = Arc::new(Registry::new(
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.config),
        ));
        let span = tracing::debug_span!("defer_scope", invocation_id = %registry.id());
        let _abandon = AbandonOnDrop(Arc::clone(&registry));

        async move {
            let main_result = run_main(main, Defer::new(Arc::clone(&registry))).await;
            let errors = drain(&registry).await;
            resolve(main_result, errors)
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for DeferScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferScope")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Closes the registry if the invocation is dropped before its drain ran,
/// releasing any exit listeners it still holds.
struct AbandonOnDrop(Arc<Registry>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        let leftover = self.0.begin_drain();
        if !leftover.is_empty() {
            warn!(
                invocation_id = %self.0.id(),
                abandoned = leftover.len(),
                "Invocation dropped before drain; deferred actions discarded"
            );
        }
    }
}

async fn run_main<T, E, F, Fut>(main: F, defer: Defer) -> anyhow::Result<T>
where
    F: FnOnce(Defer) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let fut = match catch_unwind(AssertUnwindSafe(move || main(defer))) {
        Ok(fut) => fut,
        Err(payload) => return Err(PanicError::from_payload(MAIN_ORIGIN, &*payload).into()),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => Err(PanicError::from_payload(MAIN_ORIGIN, &*payload).into()),
    }
}

/// Runs every registered action, last registered first.
///
/// Failures never stop the loop. Returns the failures to report, in drain
/// order.
async fn drain(registry: &Registry) -> Vec<anyhow::Error> {
    let entries = registry.begin_drain();
    let started = Instant::now();
    let mut errors = Vec::new();

    debug!(actions = entries.len(), "Drain started");

    for (index, entry) in entries.into_iter().enumerate().rev() {
        let options = entry.options;
        let Some(action) = entry.take_action() else {
            debug!(index, "Deferred action already ran on exit");
            continue;
        };

        let kind = action.kind();
        let fut = action.into_future();

        if options.no_wait {
            detach(fut, index, options, registry.config().log_detached_failures);
            continue;
        }

        if let Err(error) = fut.await {
            if options.no_throw {
                debug!(index, kind, error = %error, "Suppressed deferred error");
            } else {
                debug!(index, kind, error = %error, "Deferred action failed");
                errors.push(error);
            }
        }
    }

    debug!(
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        failed = errors.len(),
        "Drain finished"
    );
    errors
}

/// Starts a `no_wait` action without waiting for it.
///
/// The part before its first suspension point runs inline, in drain order;
/// the remainder is spawned. Failures are only ever logged, at `debug`.
fn detach(mut fut: DeferredFuture, index: usize, options: DeferOptions, log_failures: bool) {
    let report = move |outcome: anyhow::Result<()>| {
        if let Err(error) = outcome {
            if log_failures && !options.no_throw {
                debug!(index, error = %error, "Detached deferred action failed");
            }
        }
    };

    match poll_once(&mut fut) {
        Some(outcome) => report(outcome),
        None => spawn_remainder(fut, report),
    }
}

fn resolve<T>(main: anyhow::Result<T>, errors: Vec<anyhow::Error>) -> Result<T, DeferError> {
    match (main, errors.is_empty()) {
        (Ok(value), true) => Ok(value),
        (Err(main), true) => Err(DeferError::Main(main)),
        (Ok(_), false) => Err(AggregateError::from_deferred(errors).into()),
        (Err(main), false) => Err(AggregateError::with_main(main, errors).into()),
    }
}
