//! Kubeseed Core Types
//!
//! This crate contains the configuration and layout types shared by the
//! control plane and the admin CLI. It has no dependencies on:
//! - Filesystem access beyond loading a config file
//! - Cryptography
//!
//! Everything here is a pure function of the control configuration.

pub mod config;
pub mod error;
pub mod layout;

// Re-export commonly used types
pub use config::{ControlConfig, EgressSelectorMode, EncryptionProvider};
pub use error::ConfigError;
pub use layout::{CertKeyPaths, RuntimeLayout};
