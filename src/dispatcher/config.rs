//! Dispatcher configuration.
//!
//! Defaults are usable as-is; `DispatcherConfig::new().with_*()` overrides
//! individual knobs. The struct also deserializes from host configuration
//! files, with `drain_timeout` given in milliseconds.

use super::conversion::MAX_VALUE_DEPTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_THREAD_NAME: &str = "runtime-dispatch-owner";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("owner thread name cannot be empty")]
    EmptyThreadName,
    #[error("max_value_depth must be at least 1")]
    ZeroDepth,
}

/// Settings for one [`Dispatcher`](super::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name given to the owner OS thread.
    pub thread_name: String,
    /// How long shutdown waits for outstanding work and async callbacks
    /// before destroying the runtime anyway. `None` waits forever.
    #[serde(with = "millis", rename = "drain_timeout_ms")]
    pub drain_timeout: Option<Duration>,
    /// Deepest composite nesting the marshaler will convert.
    pub max_value_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            drain_timeout: None,
            max_value_depth: MAX_VALUE_DEPTH,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn without_drain_timeout(mut self) -> Self {
        self.drain_timeout = None;
        self
    }

    pub fn with_max_value_depth(mut self, depth: usize) -> Self {
        self.max_value_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        if self.max_value_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_some(&ms)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
