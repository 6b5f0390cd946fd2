//! Configuration errors.

use thiserror::Error;

/// Errors raised while loading or validating the control configuration.
///
/// These are always detected before any file under the data directory is
/// written.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unsupported secrets-encryption provider.
    #[error("unsupported secrets-encryption-key-type {0}")]
    UnsupportedProvider(String),

    /// Unknown egress selector mode.
    #[error("unsupported egress-selector-mode {0}")]
    UnsupportedEgressMode(String),

    /// Data directory missing or not absolute.
    #[error("invalid data directory: {0}")]
    InvalidDataDir(String),

    /// Invalid value for a field.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
