//! In-memory lifecycle driven by explicit `emit` calls.

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ExitListener, ExitSignal, ListenerId, ProcessLifecycle};

struct Registration {
    id: ListenerId,
    signal: ExitSignal,
    listener: ExitListener,
}

/// A lifecycle whose signals are fired by calling [`ManualLifecycle::emit`].
///
/// Listeners are removed before they are invoked, so a listener may call
/// back into the lifecycle, and repeated signals never re-fire it.
#[derive(Default)]
pub struct ManualLifecycle {
    registrations: Mutex<Vec<Registration>>,
}

impl ManualLifecycle {
    /// Creates an empty lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, signal: ExitSignal, listener: ExitListener) -> ListenerId {
        let id = ListenerId::new();
        self.registrations.lock().push(Registration {
            id,
            signal,
            listener,
        });
        id
    }

    /// Fires every listener registered for `signal`.
    ///
    /// Listeners run in registration order. A panicking listener is logged
    /// and the rest still run. Returns the number of listeners fired.
    pub fn emit(&self, signal: ExitSignal) -> usize {
        let fired: Vec<Registration> = {
            let mut registrations = self.registrations.lock();
            let (fired, kept) = std::mem::take(&mut *registrations)
                .into_iter()
                .partition(|r| r.signal == signal);
            *registrations = kept;
            fired
        };

        debug!(?signal, listeners = fired.len(), "Emitting exit signal");

        for registration in &fired {
            let listener = &registration.listener;
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener())) {
                warn!(?signal, "Exit listener panicked: {:?}", e);
            }
        }

        fired.len()
    }

    /// Fires [`ExitSignal::BeforeExit`].
    pub fn emit_before_exit(&self) -> usize {
        self.emit(ExitSignal::BeforeExit)
    }

    /// Fires [`ExitSignal::Exit`].
    pub fn emit_exit(&self) -> usize {
        self.emit(ExitSignal::Exit)
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Returns the number of listeners registered for `signal`.
    #[must_use]
    pub fn listener_count_for(&self, signal: ExitSignal) -> usize {
        self.registrations
            .lock()
            .iter()
            .filter(|r| r.signal == signal)
            .count()
    }
}

impl ProcessLifecycle for ManualLifecycle {
    fn on_before_exit(&self, listener: ExitListener) -> ListenerId {
        self.add(ExitSignal::BeforeExit, listener)
    }

    fn on_exit(&self, listener: ExitListener) -> ListenerId {
        self.add(ExitSignal::Exit, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.lock();
        let initial_len = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() < initial_len
    }
}

impl std::fmt::Debug for ManualLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualLifecycle")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
