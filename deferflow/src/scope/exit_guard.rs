//! Take-once slot shared between the drain and the exit listeners.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::action::{poll_once, spawn_remainder, Deferrable};
use crate::lifecycle::{ExitListener, ExitSignal, ListenerId, ProcessLifecycle};
use crate::options::DeferOptions;

/// An `also_on_exit` action armed on a lifecycle.
///
/// Whoever claims the action first runs it: the drain or an exit listener.
/// Claiming deregisters every listener; dropping the guard does too.
pub(crate) struct ExitGuard {
    action: Mutex<Option<Deferrable>>,
    listeners: Mutex<Vec<ListenerId>>,
    lifecycle: Arc<dyn ProcessLifecycle>,
    options: DeferOptions,
}

impl ExitGuard {
    /// Registers before-exit and exit listeners for `action`.
    pub(crate) fn arm(
        action: Deferrable,
        options: DeferOptions,
        lifecycle: Arc<dyn ProcessLifecycle>,
    ) -> Arc<Self> {
        let guard = Arc::new(Self {
            action: Mutex::new(Some(action)),
            listeners: Mutex::new(Vec::with_capacity(2)),
            lifecycle,
            options,
        });

        let before_exit = guard
            .lifecycle
            .on_before_exit(Self::listener(&guard, ExitSignal::BeforeExit));
        let exit = guard
            .lifecycle
            .on_exit(Self::listener(&guard, ExitSignal::Exit));
        guard.listeners.lock().extend([before_exit, exit]);

        // A listener may have fired between registration and recording the ids.
        if guard.action.lock().is_none() {
            guard.disarm();
        }

        guard
    }

    fn listener(guard: &Arc<Self>, signal: ExitSignal) -> ExitListener {
        let weak: Weak<Self> = Arc::downgrade(guard);
        Arc::new(move || {
            if let Some(guard) = weak.upgrade() {
                guard.fire(signal);
            }
        })
    }

    /// Takes the action if nobody ran it yet.
    pub(crate) fn claim(&self) -> Option<Deferrable> {
        let action = self.action.lock().take();
        self.disarm();
        action
    }

    /// Returns true if the action was already claimed.
    pub(crate) fn is_spent(&self) -> bool {
        self.action.lock().is_none()
    }

    fn disarm(&self) {
        let ids = std::mem::take(&mut *self.listeners.lock());
        for id in ids {
            self.lifecycle.remove_listener(id);
        }
    }

    /// Runs the action from an exit listener.
    ///
    /// On [`ExitSignal::BeforeExit`] the process keeps running, so whatever
    /// is left after the first suspension point is handed to the runtime.
    /// On [`ExitSignal::Exit`] nothing after that point can run and the
    /// remainder is dropped. No caller awaits either path, so `no_wait` has
    /// no meaning here.
    fn fire(&self, signal: ExitSignal) {
        let Some(action) = self.claim() else {
            return;
        };

        let kind = action.kind();
        let no_throw = self.options.no_throw;
        let report = move |outcome: anyhow::Result<()>| match outcome {
            Ok(()) => debug!(kind, ?signal, "Deferred action ran on exit"),
            Err(e) if no_throw => {
                debug!(kind, ?signal, error = %e, "Suppressed deferred error on exit");
            }
            Err(e) => error!(kind, ?signal, error = %e, "Deferred action failed on exit"),
        };

        let mut fut = action.into_future();
        match (poll_once(&mut fut), signal) {
            (Some(outcome), _) => report(outcome),
            (None, ExitSignal::BeforeExit) => spawn_remainder(fut, report),
            (None, ExitSignal::Exit) => {
                warn!(kind, "Deferred action suspended during exit; remainder dropped");
            }
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for ExitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitGuard")
            .field("spent", &self.is_spent())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ManualLifecycle, MockProcessLifecycle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_action(counter: &Arc<AtomicUsize>) -> Deferrable {
        let counter = counter.clone();
        Deferrable::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_exit_fires_once_and_disarms() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = ExitGuard::arm(counting_action(&counter), DeferOptions::new(), lifecycle.clone());
        assert_eq!(lifecycle.listener_count(), 2);

        lifecycle.emit_before_exit();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.listener_count(), 0);

        lifecycle.emit_exit();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(guard.claim().is_none());
    }

    #[test]
    fn test_claim_prevents_exit_run() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = ExitGuard::arm(counting_action(&counter), DeferOptions::new(), lifecycle.clone());

        assert!(guard.claim().is_some());
        assert!(guard.is_spent());
        assert_eq!(lifecycle.listener_count(), 0);

        assert_eq!(lifecycle.emit_exit(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases_listeners() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = ExitGuard::arm(counting_action(&counter), DeferOptions::new(), lifecycle.clone());

        drop(guard);
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn test_failing_action_on_exit_does_not_panic() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let _guard = ExitGuard::arm(
            Deferrable::sync(|| Err(anyhow::anyhow!("disk gone"))),
            DeferOptions::new().no_throw(true),
            lifecycle.clone(),
        );
        assert_eq!(lifecycle.emit_exit(), 1);
    }

    #[tokio::test]
    async fn test_before_exit_finishes_async_action() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let (b, a) = (before.clone(), after.clone());

        let _guard = ExitGuard::arm(
            Deferrable::lazy(move || async move {
                b.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            DeferOptions::new(),
            lifecycle.clone(),
        );

        assert_eq!(lifecycle.emit_before_exit(), 1);
        assert_eq!(before.load(Ordering::SeqCst), 1);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_exit_drops_async_remainder() {
        let lifecycle = Arc::new(ManualLifecycle::new());
        let after = Arc::new(AtomicUsize::new(0));
        let a = after.clone();

        let _guard = ExitGuard::arm(
            Deferrable::lazy(move || async move {
                tokio::task::yield_now().await;
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            DeferOptions::new(),
            lifecycle.clone(),
        );

        assert_eq!(lifecycle.emit_exit(), 1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_pairs_with_mock() {
        let mut mock = MockProcessLifecycle::new();
        mock.expect_on_before_exit()
            .times(1)
            .returning(|_| ListenerId::new());
        mock.expect_on_exit().times(1).returning(|_| ListenerId::new());
        mock.expect_remove_listener().times(2).returning(|_| true);

        let guard = ExitGuard::arm(Deferrable::sync(|| Ok(())), DeferOptions::new(), Arc::new(mock));
        assert!(guard.claim().is_some());
        drop(guard);
    }
}
