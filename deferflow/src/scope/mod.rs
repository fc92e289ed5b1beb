//! Scoped deferred execution.
//!
//! This module provides:
//! - `provide_defer` / `DeferScope` to run a main operation and drain its
//!   deferred actions in LIFO order
//! - `Defer`, the registration handle passed to the main operation
//!
//! `also_on_exit` actions are additionally armed on a `ProcessLifecycle`
//! behind a take-once guard, so they run exactly once whichever path
//! reaches them first.

mod defer;
mod engine;
mod exit_guard;

pub use defer::Defer;
pub use engine::{provide_defer, DeferScope};
