//! Key and certificate management for the control plane trust domains.

pub mod bundle;
pub mod ca;
pub mod drift;
pub mod inspect;
pub mod keys;
pub mod leaf;
pub mod token;

pub use ca::CertificateAuthority;
pub use drift::RegenReason;
pub use inspect::CertInfo;
pub use leaf::{AltNames, SigningFactory};
