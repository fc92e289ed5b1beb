//! Scope-wide configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration shared by every invocation of a [`DeferScope`](crate::DeferScope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferConfig {
    /// Warn when an asynchronous action is registered with `also_on_exit`.
    #[serde(default = "default_warn_async_on_exit")]
    pub warn_async_on_exit: bool,
    /// Log failures of `no_wait` actions that are not also `no_throw`.
    #[serde(default = "default_log_detached_failures")]
    pub log_detached_failures: bool,
    /// Exit code used by the host signal handler after exit hooks ran.
    #[serde(default = "default_signal_exit_code")]
    pub signal_exit_code: i32,
}

fn default_warn_async_on_exit() -> bool {
    true
}

fn default_log_detached_failures() -> bool {
    true
}

fn default_signal_exit_code() -> i32 {
    130 // 128 + SIGINT
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            warn_async_on_exit: default_warn_async_on_exit(),
            log_detached_failures: default_log_detached_failures(),
            signal_exit_code: default_signal_exit_code(),
        }
    }
}

impl DeferConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether async exit registrations are warned about.
    #[must_use]
    pub fn with_warn_async_on_exit(mut self, value: bool) -> Self {
        self.warn_async_on_exit = value;
        self
    }

    /// Sets whether detached failures are logged.
    #[must_use]
    pub fn with_log_detached_failures(mut self, value: bool) -> Self {
        self.log_detached_failures = value;
        self
    }

    /// Sets the exit code used after a termination signal.
    #[must_use]
    pub fn with_signal_exit_code(mut self, code: i32) -> Self {
        self.signal_exit_code = code;
        self
    }

    /// Loads configuration from `DEFERFLOW_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("DEFERFLOW_WARN_ASYNC_ON_EXIT") {
            config.warn_async_on_exit = parse_bool(&raw)
                .with_context(|| format!("DEFERFLOW_WARN_ASYNC_ON_EXIT={raw}"))?;
        }
        if let Some(raw) = lookup("DEFERFLOW_LOG_DETACHED_FAILURES") {
            config.log_detached_failures = parse_bool(&raw)
                .with_context(|| format!("DEFERFLOW_LOG_DETACHED_FAILURES={raw}"))?;
        }
        if let Some(raw) = lookup("DEFERFLOW_SIGNAL_EXIT_CODE") {
            config.signal_exit_code = raw
                .trim()
                .parse()
                .with_context(|| format!("DEFERFLOW_SIGNAL_EXIT_CODE={raw}"))?;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DeferConfig::default();
        assert!(config.warn_async_on_exit);
        assert!(config.log_detached_failures);
        assert_eq!(config.signal_exit_code, 130);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = DeferConfig::from_lookup(lookup_from(&[
            ("DEFERFLOW_WARN_ASYNC_ON_EXIT", "off"),
            ("DEFERFLOW_SIGNAL_EXIT_CODE", " 2 "),
        ]))
        .unwrap();

        assert!(!config.warn_async_on_exit);
        assert!(config.log_detached_failures);
        assert_eq!(config.signal_exit_code, 2);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = DeferConfig::from_lookup(lookup_from(&[(
            "DEFERFLOW_LOG_DETACHED_FAILURES",
            "maybe",
        )]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("DEFERFLOW_LOG_DETACHED_FAILURES"));
    }

    #[test]
    fn test_serde_defaults() {
        let config: DeferConfig = serde_json::from_str(r#"{"signal_exit_code": 1}"#).unwrap();
        assert_eq!(config, DeferConfig::new().with_signal_exit_code(1));
    }
}
