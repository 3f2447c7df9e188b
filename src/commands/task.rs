use serde::{Deserialize, Serialize};

/// Task execution settings forwarded to the workflow engine
///
/// Values are passed through as configured; range checks are left to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskConfig {
    pub retries: i64,
    pub retry_interval: i64,
    pub thread_pool_size: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            retries: 0,
            retry_interval: 1,
            thread_pool_size: 1,
        }
    }
}

/// A partial [`TaskConfig`], as written in the `task` section of the config or a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskOverride {
    pub retries: Option<i64>,
    pub retry_interval: Option<i64>,
    pub thread_pool_size: Option<i64>,
}

impl TaskOverride {
    fn apply(&self, config: TaskConfig) -> TaskConfig {
        TaskConfig {
            retries: self.retries.unwrap_or(config.retries),
            retry_interval: self.retry_interval.unwrap_or(config.retry_interval),
            thread_pool_size: self.thread_pool_size.unwrap_or(config.thread_pool_size),
        }
    }
}

impl TaskConfig {
    /// Fold `layers` left to right over the built-in defaults; later layers win per key.
    #[must_use]
    pub fn resolve(layers: &[&TaskOverride]) -> TaskConfig {
        Self::resolve_from(TaskConfig::default(), layers)
    }

    /// Like [`TaskConfig::resolve`], starting from explicit defaults.
    #[must_use]
    pub fn resolve_from(defaults: TaskConfig, layers: &[&TaskOverride]) -> TaskConfig {
        layers
            .iter()
            .fold(defaults, |config, layer| layer.apply(config))
    }
}
