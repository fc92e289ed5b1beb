//! Error types for scoped deferred execution.
//!
//! User-supplied main operations and deferred actions report failures as
//! [`anyhow::Error`]. The scope surfaces either the main error untouched or
//! an [`AggregateError`] folding together every failure that survived the
//! per-action policy.

use std::any::Any;
use thiserror::Error;

/// The error returned by a scoped invocation.
#[derive(Debug, Error)]
pub enum DeferError {
    /// The main operation failed and no deferred action error survived.
    ///
    /// The original error is passed through without wrapping.
    #[error(transparent)]
    Main(anyhow::Error),

    /// At least one deferred action failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl DeferError {
    /// Returns the aggregate, if this is one.
    #[must_use]
    pub fn as_aggregate(&self) -> Option<&AggregateError> {
        match self {
            Self::Aggregate(aggregate) => Some(aggregate),
            Self::Main(_) => None,
        }
    }

    /// Returns true if deferred failures were folded into this error.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate(_))
    }

    /// Returns the unwrapped main error, if this is one.
    #[must_use]
    pub fn as_main(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Main(error) => Some(error),
            Self::Aggregate(_) => None,
        }
    }

    /// Consumes the error and returns every underlying failure in order.
    ///
    /// A main-only failure yields a single element.
    #[must_use]
    pub fn into_errors(self) -> Vec<anyhow::Error> {
        match self {
            Self::Main(error) => vec![error],
            Self::Aggregate(aggregate) => aggregate.into_errors(),
        }
    }
}

/// Several failures collected across one invocation.
///
/// Ordering is `[main (if any), deferred errors in drain order]`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AggregateError {
    message: String,
    errors: Vec<anyhow::Error>,
    has_main_error: bool,
}

impl AggregateError {
    /// Builds an aggregate from deferred failures only.
    ///
    /// The message reads `"<N> deferred error(s)."`.
    #[must_use]
    pub fn from_deferred(errors: Vec<anyhow::Error>) -> Self {
        Self {
            message: format!("{} deferred error(s).", errors.len()),
            errors,
            has_main_error: false,
        }
    }

    /// Builds an aggregate led by the main operation's failure.
    ///
    /// The message reads `"<main message> and <N> deferred error(s)."`, where
    /// `N` counts only the deferred failures.
    #[must_use]
    pub fn with_main(main: anyhow::Error, deferred: Vec<anyhow::Error>) -> Self {
        let message = format!("{main} and {} deferred error(s).", deferred.len());
        let mut errors = Vec::with_capacity(deferred.len() + 1);
        errors.push(main);
        errors.extend(deferred);
        Self {
            message,
            errors,
            has_main_error: true,
        }
    }

    /// Returns the summary message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the underlying errors in order.
    #[must_use]
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Consumes the aggregate and returns the underlying errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<anyhow::Error> {
        self.errors
    }

    /// Returns true if the first error came from the main operation.
    #[must_use]
    pub fn has_main_error(&self) -> bool {
        self.has_main_error
    }

    /// Returns the main operation's error, if present.
    #[must_use]
    pub fn main_error(&self) -> Option<&anyhow::Error> {
        if self.has_main_error {
            self.errors.first()
        } else {
            None
        }
    }

    /// Returns the number of deferred failures.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.errors.len() - usize::from(self.has_main_error)
    }
}

/// A panic caught inside a main operation or deferred action.
#[derive(Debug, Clone, Error)]
#[error("{origin} panicked: {message}")]
pub struct PanicError {
    /// What was running when the panic happened.
    pub origin: &'static str,
    /// The panic payload rendered as text.
    pub message: String,
}

impl PanicError {
    /// Creates a panic error from a caught payload.
    #[must_use]
    pub fn from_payload(origin: &'static str, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        Self { origin, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deferred_only_message() {
        let err = AggregateError::from_deferred(vec![anyhow!("close failed")]);
        assert_eq!(err.to_string(), "1 deferred error(s).");
        assert_eq!(err.deferred_count(), 1);
        assert!(!err.has_main_error());
        assert!(err.main_error().is_none());
    }

    #[test]
    fn test_main_and_deferred_message() {
        let err = AggregateError::with_main(
            anyhow!("request failed"),
            vec![anyhow!("flush failed"), anyhow!("unlock failed")],
        );
        assert_eq!(err.message(), "request failed and 2 deferred error(s).");
        assert_eq!(err.deferred_count(), 2);

        let messages: Vec<String> = err.errors().iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["request failed", "flush failed", "unlock failed"]);
        assert_eq!(err.main_error().map(ToString::to_string).as_deref(), Some("request failed"));
    }

    #[test]
    fn test_main_message_uses_outermost_context() {
        let main = anyhow!("socket closed").context("request failed");
        let err = AggregateError::with_main(main, vec![anyhow!("x")]);
        assert_eq!(err.to_string(), "request failed and 1 deferred error(s).");
    }

    #[test]
    fn test_defer_error_main_is_transparent() {
        let err = DeferError::Main(anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_aggregate());
        assert!(err.as_aggregate().is_none());
        assert_eq!(err.into_errors().len(), 1);
    }

    #[test]
    fn test_panic_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(PanicError::from_payload("deferred action", &*static_str).message, "static");
        assert_eq!(PanicError::from_payload("deferred action", &*owned).message, "owned");
        assert_eq!(
            PanicError::from_payload("main operation", &*other).to_string(),
            "main operation panicked: <non-string panic payload>"
        );
    }
}
