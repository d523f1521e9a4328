//! Coordinator settings: defaults, LSP initialization options, environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment override for the default wait timeout (milliseconds)
pub const TIMEOUT_ENV: &str = "ANALYSIS_COORDINATOR_TIMEOUT_MS";

/// Environment override enabling debug-level trace logging
pub const TRACE_ENV: &str = "ANALYSIS_COORDINATOR_TRACE";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Timeout applied when a caller does not pick one
    pub default_timeout_ms: u64,
    /// Log at debug level instead of info
    pub trace_logging: bool,
    /// Emit an informational event every time a result is published
    pub analysis_updates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            trace_logging: false,
            analysis_updates: true,
        }
    }
}

impl Config {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Defaults, then environment overrides
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Merge an LSP `initializationOptions` object over the current values.
    ///
    /// Unknown keys are ignored; a malformed object leaves the config untouched.
    pub fn merge_json(&mut self, options: &serde_json::Value) {
        if !options.is_object() {
            return;
        }
        let mut merged = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };
        if let (Some(target), Some(source)) = (merged.as_object_mut(), options.as_object()) {
            for (key, value) in source {
                if target.contains_key(key) {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        match serde_json::from_value::<Config>(merged) {
            Ok(config) => *self = config,
            Err(e) => warn!("ignoring invalid initialization options: {e}"),
        }
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.default_timeout_ms = ms,
                Err(_) => warn!("ignoring {TIMEOUT_ENV}={raw:?}: not a number of milliseconds"),
            }
        }
        if let Some(raw) = lookup(TRACE_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.trace_logging = true,
                "0" | "false" | "no" | "off" | "" => self.trace_logging = false,
                _ => warn!("ignoring {TRACE_ENV}={raw:?}: expected a boolean"),
            }
        }
    }

    /// Default `tracing` filter directive for this config
    pub fn log_directive(&self) -> &'static str {
        if self.trace_logging {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert!(!config.trace_logging);
        assert!(config.analysis_updates);
        assert_eq!(config.log_directive(), "info");
    }

    #[test]
    fn merges_initialization_options() {
        let mut config = Config::default();
        config.merge_json(&json!({ "defaultTimeoutMs": 500, "traceLogging": true, "other": 1 }));
        assert_eq!(config.default_timeout_ms, 500);
        assert!(config.trace_logging);
        assert!(config.analysis_updates);
    }

    #[test]
    fn invalid_options_are_ignored() {
        let mut config = Config::default();
        config.merge_json(&json!({ "defaultTimeoutMs": "soon" }));
        assert_eq!(config, Config::default());
        config.merge_json(&json!(null));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            TIMEOUT_ENV => Some("1200".to_string()),
            TRACE_ENV => Some("yes".to_string()),
            _ => None,
        });
        assert_eq!(config.default_timeout_ms, 1200);
        assert_eq!(config.log_directive(), "debug");
    }

    #[test]
    fn bad_env_values_keep_previous() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            TIMEOUT_ENV => Some("fast".to_string()),
            TRACE_ENV => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }
}
