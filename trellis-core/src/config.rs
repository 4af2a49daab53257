//! Runtime Configuration
//!
//! A `Config` is handed to [`crate::install`] and lives in the thread's
//! host runtime for as long as it stays installed. The plain fields can be
//! loaded from JSON; the warning handler can only be set in code.
//!
//! # Warnings
//!
//! Misuse of the API is reported through [`warn`]. In development builds
//! every warning is emitted as a `tracing` event under the `trellis`
//! target and, when a handler is configured, forwarded to it. Production
//! configurations (`dev = false`) drop warnings entirely.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::host::{self, Instance};

/// Callback receiving every development warning.
///
/// The second argument is the component instance the warning concerns,
/// when there is one.
pub type WarnHandler = Arc<dyn Fn(&str, Option<&Instance>) + Send + Sync>;

/// Host runtime configuration.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Emit development warnings.
    pub dev: bool,

    /// Keep warnings out of the log. A configured handler still runs.
    pub silent: bool,

    /// Flush queued watchers on the deferred tick. When false, every queued
    /// watcher flushes synchronously at the point it is queued.
    pub async_updates: bool,

    /// Optional sink for development warnings.
    #[serde(skip)]
    pub warn_handler: Option<WarnHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev: cfg!(debug_assertions),
            silent: false,
            async_updates: true,
            warn_handler: None,
        }
    }
}

impl Config {
    /// Parse the plain configuration fields from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Enable misuse warnings.
    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Keep warnings out of the log. A warn handler still receives them.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Flush queued watchers on the deferred tick.
    pub fn async_updates(mut self, async_updates: bool) -> Self {
        self.async_updates = async_updates;
        self
    }

    /// Route warnings to `handler`.
    pub fn warn_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Option<&Instance>) + Send + Sync + 'static,
    {
        self.warn_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dev", &self.dev)
            .field("silent", &self.silent)
            .field("async_updates", &self.async_updates)
            .field("warn_handler", &self.warn_handler.is_some())
            .finish()
    }
}

/// Report API misuse.
///
/// Never interrupts control flow. Without an installed host the warning
/// still reaches the log, using the default configuration.
pub fn warn(message: &str, instance: Option<&Instance>) {
    let config = host::config().unwrap_or_default();
    if !config.dev {
        return;
    }

    if !config.silent {
        match instance {
            Some(vm) => tracing::warn!(target: "trellis", component = %vm.name(), "{message}"),
            None => tracing::warn!(target: "trellis", "{message}"),
        }
    }

    if let Some(handler) = &config.warn_handler {
        handler(message, instance);
    }
}
