//! Error types for the engine.

use thiserror::Error;

/// Errors raised while loading an arena configuration.
///
/// These only occur before a run starts. Inconsistent values inside a
/// parsed configuration are not errors; `ArenaConfig::sanitized` replaces
/// them with safe fallbacks.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `ArenaConfig`
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config describes an arena that cannot be built
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates an invalid-config error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
