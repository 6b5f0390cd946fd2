//! Errors raised while generating control plane dependencies.

use std::path::PathBuf;

use kubeseed_core::ConfigError;
use thiserror::Error;

/// Broad classification of a [`DepsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File missing, unreadable or unwritable.
    Io,
    /// Malformed key or certificate material, or signing failure.
    Crypto,
    /// Rejected configuration.
    Config,
}

/// Errors that can occur while bootstrapping credentials.
#[derive(Debug, Error)]
pub enum DepsError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse private key {}: {reason}", .path.display())]
    ParseKey { path: PathBuf, reason: String },

    #[error("failed to parse certificate {}: {reason}", .path.display())]
    ParseCert { path: PathBuf, reason: String },

    #[error("no certificates found in {}", .path.display())]
    EmptyBundle { path: PathBuf },

    #[error("failed to generate key: {0}")]
    KeyGen(String),

    #[error("failed to sign certificate for {common_name}: {reason}")]
    Sign { common_name: String, reason: String },

    #[error("invalid credential table {}: {reason}", .path.display())]
    Passwd { path: PathBuf, reason: String },

    #[error("invalid credential: {0}")]
    Credential(String),

    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("cannot rotate {authority} CA: {reason}")]
    RotateCa { authority: String, reason: String },

    #[error("failed to serialize {what}: {reason}")]
    Serialize { what: &'static str, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DepsError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Passwd { .. } | Self::Serialize { .. } => ErrorKind::Io,
            Self::ParseKey { .. }
            | Self::ParseCert { .. }
            | Self::EmptyBundle { .. }
            | Self::KeyGen(_)
            | Self::Sign { .. } => ErrorKind::Crypto,
            Self::Config(_)
            | Self::Credential(_)
            | Self::UnknownService(_)
            | Self::RotateCa { .. } => ErrorKind::Config,
        }
    }
}

/// Result alias for dependency generation.
pub type Result<T> = std::result::Result<T, DepsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let io = DepsError::io(
            "read",
            "/data/tls/client-ca.crt",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("/data/tls/client-ca.crt"));

        assert_eq!(DepsError::KeyGen("boom".into()).kind(), ErrorKind::Crypto);
        assert_eq!(
            DepsError::from(ConfigError::UnsupportedProvider("kms".into())).kind(),
            ErrorKind::Config
        );
    }
}
