//! # Deferflow
//!
//! Scoped deferred cleanup for async workflows.
//!
//! A main operation receives a [`Defer`] handle and registers cleanup actions
//! on it. Once the main operation settles, the actions run last-registered
//! first, with per-action policy:
//!
//! - **`no_throw`**: discard the action's error
//! - **`no_wait`**: start the action and move on without waiting for it
//! - **`also_on_exit`**: also run the action if the process exits first
//!
//! Deferred failures never stop the drain. They are reported together in an
//! [`AggregateError`] after every action has run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deferflow::prelude::*;
//!
//! let report = provide_defer(|defer| async move {
//!     let conn = pool.acquire().await?;
//!     defer.defer_async(move || async move { conn.release().await });
//!
//!     let lock = lockfile::create("run.lock")?;
//!     defer.defer_on_exit_with(move || lock.remove(), DeferOptions::new().no_throw(true));
//!
//!     build_report().await
//! })
//! .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod action;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod options;
pub mod scope;

pub use action::{Deferrable, DeferredFuture};
pub use config::DeferConfig;
pub use errors::{AggregateError, DeferError, PanicError};
pub use lifecycle::{
    ExitListener, ExitSignal, HostLifecycle, ListenerId, ManualLifecycle, NoOpLifecycle,
    ProcessLifecycle,
};
pub use options::DeferOptions;
pub use scope::{provide_defer, Defer, DeferScope};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::Deferrable;
    pub use crate::config::DeferConfig;
    pub use crate::errors::{AggregateError, DeferError};
    pub use crate::lifecycle::{HostLifecycle, ManualLifecycle, ProcessLifecycle};
    pub use crate::options::DeferOptions;
    pub use crate::scope::{provide_defer, Defer, DeferScope};
}
