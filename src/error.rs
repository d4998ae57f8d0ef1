//! Error types for the Warden plugin loader

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the plugin host
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A code unit could not be loaded from its path
    #[error("failed to load {}: {reason}", path.display())]
    Load {
        /// Path that failed to load
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// A load produced zero usable units or zero plugins
    #[error("no plugins found in {}", .0.display())]
    NoPluginsFound(PathBuf),

    /// A plugin type matched but could not be constructed
    #[error("failed to instantiate plugin {type_name}: {reason}")]
    Instantiation {
        /// Type identity of the plugin
        type_name: String,
        /// Underlying failure
        reason: String,
    },

    /// Remote controller presented a wrong shared secret
    #[error("authentication failed")]
    Auth,

    /// Remote command payload could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a load error for `path`
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
