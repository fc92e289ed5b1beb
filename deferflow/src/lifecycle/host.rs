//! The process-wide lifecycle, bridged to real termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use super::{ExitListener, ListenerId, ManualLifecycle, ProcessLifecycle};
use crate::config::DeferConfig;

static HOST: OnceLock<Arc<HostLifecycle>> = OnceLock::new();

/// The lifecycle used by [`provide_defer`](crate::provide_defer).
///
/// Nothing fires on its own: the host application either calls
/// [`HostLifecycle::exit`] / [`HostLifecycle::shutdown`], or installs the
/// Ctrl-C bridge with [`HostLifecycle::install_signal_handler`].
#[derive(Debug, Default)]
pub struct HostLifecycle {
    inner: ManualLifecycle,
    exiting: AtomicBool,
    signal_exit_code: OnceLock<i32>,
}

impl HostLifecycle {
    /// Returns the process-wide instance.
    pub fn global() -> Arc<Self> {
        HOST.get_or_init(|| Arc::new(Self::default())).clone()
    }

    /// Announces a normal exit. Fires before-exit listeners.
    pub fn shutdown(&self) -> usize {
        self.inner.emit_before_exit()
    }

    /// Fires exit listeners. Only the first call has any effect.
    pub fn run_exit_hooks(&self) -> usize {
        if self.exiting.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.inner.emit_exit()
    }

    /// Runs exit hooks and terminates the process.
    pub fn exit(&self, code: i32) -> ! {
        let fired = self.run_exit_hooks();
        info!(code, listeners = fired, "Exiting process");
        std::process::exit(code)
    }

    /// Bridges Ctrl-C to [`HostLifecycle::exit`] with
    /// `config.signal_exit_code`.
    ///
    /// A signal is a forced exit: only exit listeners fire, never
    /// before-exit ones. Must be called from within a tokio runtime. Returns
    /// false if the bridge was already installed.
    pub fn install_signal_handler(self: &Arc<Self>, config: &DeferConfig) -> bool {
        let exit_code = config.signal_exit_code;
        if self.signal_exit_code.set(exit_code).is_err() {
            return false;
        }

        let host = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => host.exit(exit_code),
                Err(e) => warn!("Failed to listen for termination signal: {}", e),
            }
        });
        true
    }

    /// Returns the exit code the Ctrl-C bridge uses, if it is installed.
    #[must_use]
    pub fn signal_exit_code(&self) -> Option<i32> {
        self.signal_exit_code.get().copied()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }
}

impl ProcessLifecycle for HostLifecycle {
    fn on_before_exit(&self, listener: ExitListener) -> ListenerId {
        self.inner.on_before_exit(listener)
    }

    fn on_exit(&self, listener: ExitListener) -> ListenerId {
        self.inner.on_exit(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}
