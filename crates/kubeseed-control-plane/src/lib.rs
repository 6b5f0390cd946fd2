//! Kubeseed control plane library
//!
//! Generates and maintains the credentials a control plane node needs before
//! any component starts: certificate authorities, client and serving
//! certificates, kubeconfigs, the credential table, service account keys and
//! auxiliary configuration files.

pub mod admin;
pub mod args;
pub mod auxconfig;
pub mod crypto;
pub mod deps;
pub mod encryption;
pub mod error;
pub mod fsutil;
pub mod kubeconfig;
pub mod passwd;
pub mod runtime;

pub use args::ConfigArgs;
pub use deps::gen_server_deps;
pub use error::{DepsError, ErrorKind, Result};
pub use runtime::ControlRuntime;
