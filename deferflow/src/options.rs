//! Per-action policy flags.

use serde::{Deserialize, Serialize};

/// Options controlling how a single deferred action is drained.
///
/// Every flag defaults to `false`. Unknown fields are ignored when
/// deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeferOptions {
    /// Discard errors raised by this action.
    pub no_throw: bool,
    /// Start the action but do not wait for it; its outcome is never reported.
    pub no_wait: bool,
    /// Also run the action when the process is about to exit.
    pub also_on_exit: bool,
}

impl DeferOptions {
    /// Creates options with every flag off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `no_throw`.
    #[must_use]
    pub fn no_throw(mut self, value: bool) -> Self {
        self.no_throw = value;
        self
    }

    /// Sets `no_wait`.
    #[must_use]
    pub fn no_wait(mut self, value: bool) -> Self {
        self.no_wait = value;
        self
    }

    /// Sets `also_on_exit`.
    #[must_use]
    pub fn also_on_exit(mut self, value: bool) -> Self {
        self.also_on_exit = value;
        self
    }

    /// Parses options from a JSON object such as `{"noThrow": true}`.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_off() {
        let opts = DeferOptions::new();
        assert!(!opts.no_throw);
        assert!(!opts.no_wait);
        assert!(!opts.also_on_exit);
    }

    #[test]
    fn test_builder() {
        let opts = DeferOptions::new().no_throw(true).also_on_exit(true);
        assert_eq!(
            opts,
            DeferOptions {
                no_throw: true,
                no_wait: false,
                also_on_exit: true,
            }
        );
    }

    #[test]
    fn test_json_ignores_unknown_flags() {
        let opts = DeferOptions::from_json(r#"{"noWait": true, "retries": 3}"#).unwrap();
        assert_eq!(opts, DeferOptions::new().no_wait(true));
    }

    #[test]
    fn test_json_empty_object() {
        let opts = DeferOptions::from_json("{}").unwrap();
        assert_eq!(opts, DeferOptions::default());
    }
}
