//! Process lifecycle notifications.
//!
//! This module provides:
//! - `ProcessLifecycle`, the seam a scope uses to hook process exit
//! - `ManualLifecycle` for in-process and test use
//! - `HostLifecycle`, the process-wide notifier bridged to termination signals
//! - `NoOpLifecycle` for scopes that never hook exit

mod host;
mod manual;

pub use host::HostLifecycle;
pub use manual::ManualLifecycle;

use std::sync::Arc;
use uuid::Uuid;

/// A listener invoked when an exit signal fires.
pub type ExitListener = Arc<dyn Fn() + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a fresh listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The exit-like signals a lifecycle can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitSignal {
    /// The process is about to exit normally.
    BeforeExit,
    /// The process is exiting now; no further suspension points will run.
    Exit,
}

/// Subscription surface for process exit.
///
/// Listeners are one-shot: once fired they are removed. Removing a listener
/// that already fired returns `false`.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLifecycle: Send + Sync {
    /// Registers a listener for [`ExitSignal::BeforeExit`].
    fn on_before_exit(&self, listener: ExitListener) -> ListenerId;

    /// Registers a listener for [`ExitSignal::Exit`].
    fn on_exit(&self, listener: ExitListener) -> ListenerId;

    /// Removes a listener. Returns true if it was still registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// A lifecycle that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLifecycle;

impl ProcessLifecycle for NoOpLifecycle {
    fn on_before_exit(&self, _listener: ExitListener) -> ListenerId {
        ListenerId::new()
    }

    fn on_exit(&self, _listener: ExitListener) -> ListenerId {
        ListenerId::new()
    }

    fn remove_listener(&self, _id: ListenerId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_ids_are_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn test_noop_lifecycle() {
        let lifecycle = NoOpLifecycle;
        let id = lifecycle.on_exit(Arc::new(|| {}));
        assert!(!lifecycle.remove_listener(id));
    }
}
