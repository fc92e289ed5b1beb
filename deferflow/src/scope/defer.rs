//! The `defer` handle and the per-invocation registry behind it.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::exit_guard::ExitGuard;
use crate::action::Deferrable;
use crate::config::DeferConfig;
use crate::lifecycle::ProcessLifecycle;
use crate::options::DeferOptions;

/// Where a registered action lives until drain.
pub(crate) enum Slot {
    Plain(Deferrable),
    Guarded(Arc<ExitGuard>),
}

/// One registered action.
pub(crate) struct Registered {
    pub(crate) slot: Slot,
    pub(crate) options: DeferOptions,
}

impl Registered {
    /// Takes the action for the drain, unless the exit path already ran it.
    pub(crate) fn take_action(self) -> Option<Deferrable> {
        match self.slot {
            Slot::Plain(action) => Some(action),
            Slot::Guarded(guard) => guard.claim(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Registered>,
    draining: bool,
}

/// The ordered list of actions owned by one invocation.
pub(crate) struct Registry {
    id: Uuid,
    state: Mutex<RegistryState>,
    lifecycle: Arc<dyn ProcessLifecycle>,
    config: Arc<DeferConfig>,
}

impl Registry {
    pub(crate) fn new(lifecycle: Arc<dyn ProcessLifecycle>, config: Arc<DeferConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(RegistryState::default()),
            lifecycle,
            config,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn config(&self) -> &DeferConfig {
        &self.config
    }

    fn register(&self, action: Deferrable, options: DeferOptions) {
        let mut state = self.state.lock();
        if state.draining {
            warn!(
                invocation_id = %self.id,
                kind = action.kind(),
                "Ignoring deferred action registered after drain started"
            );
            return;
        }

        let index = state.entries.len();
        debug!(invocation_id = %self.id, index, kind = action.kind(), ?options, "Deferred action registered");

        let slot = if options.also_on_exit {
            Slot::Guarded(ExitGuard::arm(action, options, Arc::clone(&self.lifecycle)))
        } else {
            Slot::Plain(action)
        };
        state.entries.push(Registered { slot, options });
    }

    /// Freezes the list and hands it to the drain in registration order.
    pub(crate) fn begin_drain(&self) -> Vec<Registered> {
        let mut state = self.state.lock();
        state.draining = true;
        std::mem::take(&mut state.entries)
    }

    fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn is_draining(&self) -> bool {
        self.state.lock().draining
    }
}

/// Registers deferred actions for the invocation it was handed to.
///
/// Cloning is cheap; every clone feeds the same ordered list. Registration
/// never fails. Once the drain has started, further registrations are
/// ignored.
#[derive(Clone)]
pub struct Defer {
    registry: Arc<Registry>,
}

impl Defer {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Registers an action with default options.
    pub fn defer(&self, action: Deferrable) {
        self.defer_with(action, DeferOptions::default());
    }

    /// Registers an action.
    ///
    /// With `also_on_exit`, a non-synchronous action only runs up to its first
    /// suspension point when the process exits; prefer
    /// [`Defer::defer_on_exit`] for exit hooks.
    pub fn defer_with(&self, action: Deferrable, options: DeferOptions) {
        if options.also_on_exit && !action.is_sync() && self.registry.config().warn_async_on_exit {
            warn!(
                invocation_id = %self.registry.id(),
                kind = action.kind(),
                "Asynchronous action registered with also_on_exit; only its pre-suspension portion runs on exit"
            );
        }
        self.registry.register(action, options);
    }

    /// Registers a synchronous closure.
    pub fn defer_sync<F>(&self, f: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.defer_sync_with(f, DeferOptions::default());
    }

    /// Registers a synchronous closure with `options`.
    pub fn defer_sync_with<F>(&self, f: F, options: DeferOptions)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.defer_with(Deferrable::sync(f), options);
    }

    /// Registers a closure returning a future.
    ///
    /// The closure is called at drain time.
    pub fn defer_async<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.defer_async_with(f, DeferOptions::default());
    }

    /// Registers a closure returning a future, with `options`.
    pub fn defer_async_with<F, Fut>(&self, f: F, options: DeferOptions)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.defer_with(Deferrable::lazy(f), options);
    }

    /// Registers a future to await.
    ///
    /// Futures are inert until polled, so none of `fut`'s work happens at
    /// registration: it starts when the drain (or an exit listener) first
    /// polls it. Work that must already be in flight belongs in a spawned
    /// task whose handle is deferred instead.
    pub fn defer_future<Fut>(&self, fut: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.defer_future_with(fut, DeferOptions::default());
    }

    /// Registers a future to await with `options`.
    ///
    /// See [`Defer::defer_future`] for when its work starts.
    pub fn defer_future_with<Fut>(&self, fut: Fut, options: DeferOptions)
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.defer_with(Deferrable::future(fut), options);
    }

    /// Registers a synchronous closure that also runs on process exit.
    pub fn defer_on_exit<F>(&self, f: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.defer_on_exit_with(f, DeferOptions::default());
    }

    /// Like [`Defer::defer_on_exit`]; `also_on_exit` is forced on.
    pub fn defer_on_exit_with<F>(&self, f: F, options: DeferOptions)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.registry
            .register(Deferrable::sync(f), options.also_on_exit(true));
    }

    /// Returns the number of actions waiting for the drain.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Returns true once the drain has started.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.registry.is_draining()
    }

    /// Returns the id of the owning invocation.
    #[must_use]
    pub fn invocation_id(&self) -> Uuid {
        self.registry.id()
    }
}

impl std::fmt::Debug for Defer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Defer")
            .field("invocation_id", &self.registry.id())
            .field("pending_count", &self.pending_count())
            .field("draining", &self.is_draining())
            .finish()
    }
}
