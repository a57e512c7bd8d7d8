//! Host runtime configuration types and defaults.
//!
//! This module defines the tunables of the in-process host runtime: context
//! task queue capacity, worker context pool sizing, and shutdown behavior.
//! It deliberately does not provide a configuration-file system; callers
//! construct a [`HostConfig`] programmatically or deserialize one from
//! whatever source they already have.

use serde::{Deserialize, Serialize};

/// Default bound for a context's pending task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 16 * 1024;

/// Default number of worker contexts for worker verticles
pub const DEFAULT_WORKER_CONTEXTS: usize = 4;

/// Default grace period for context shutdown in milliseconds
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;

/// Default prefix for context thread names
pub const DEFAULT_CONTEXT_NAME_PREFIX: &str = "eventide-loop";

/// Configuration for the host runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Maximum pending tasks per context queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of contexts reserved for worker verticles
    #[serde(default = "default_worker_contexts")]
    pub worker_contexts: usize,

    /// Grace period when joining context threads at shutdown, in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Prefix for context thread names
    #[serde(default = "default_context_name_prefix")]
    pub context_name_prefix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_contexts: DEFAULT_WORKER_CONTEXTS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            context_name_prefix: DEFAULT_CONTEXT_NAME_PREFIX.to_string(),
        }
    }
}

impl HostConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the worker context count
    pub fn with_worker_contexts(mut self, count: usize) -> Self {
        self.worker_contexts = count;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.shutdown_grace_ms = ms;
        self
    }

    /// Set the context thread name prefix
    pub fn with_context_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.context_name_prefix = prefix.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.worker_contexts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_contexts".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.context_name_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "context_name_prefix".into(),
                reason: "must not be empty".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_worker_contexts() -> usize {
    DEFAULT_WORKER_CONTEXTS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

fn default_context_name_prefix() -> String {
    DEFAULT_CONTEXT_NAME_PREFIX.to_string()
}
