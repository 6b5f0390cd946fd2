//! Deciding whether an issued certificate must be replaced.
//!
//! A certificate is reissued when it is missing, close to expiry, or when its
//! identity no longer matches what would be issued now. Identity comparison
//! uses two different set semantics:
//!
//! - organizations must match exactly (order and duplicates ignored)
//! - the existing alternative names must cover every desired name; extra
//!   names on the existing certificate never trigger reissue
//!
//! A certificate that cannot be read is not treated as drifted. The caller
//! notices missing files on its own and a transiently unreadable file must not
//! cause a rotation.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::crypto::inspect::{self, CertInfo};
use crate::crypto::leaf::AltNames;
use crate::fsutil;

/// Certificates expiring within this many days are renewed.
pub const CERTIFICATE_RENEW_DAYS: i64 = 90;

/// Identity a certificate should carry.
#[derive(Debug, Clone, Copy)]
pub struct DesiredCert<'a> {
    pub common_name: &'a str,
    pub organization: &'a [String],
    pub alt_names: &'a AltNames,
}

/// Why a certificate is being (re)issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenReason {
    /// Certificate or key file absent.
    Missing,
    /// Caller requested rotation.
    Forced,
    /// Within the renewal window.
    Expiring { not_after: DateTime<Utc> },
    CommonName { existing: String },
    Organization { existing: BTreeSet<String> },
    DnsNames { missing: Vec<String> },
    IpAddresses { missing: Vec<IpAddr> },
    /// Signed by a different key than the current authority.
    AuthorityChanged,
}

impl RegenReason {
    /// Whether the existing private key should be discarded too.
    pub fn replaces_key(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

impl fmt::Display for RegenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Forced => write!(f, "rotation requested"),
            Self::Expiring { not_after } => write!(f, "expires {}", not_after.to_rfc3339()),
            Self::CommonName { existing } => write!(f, "common name was {existing}"),
            Self::Organization { existing } => {
                let orgs: Vec<&str> = existing.iter().map(String::as_str).collect();
                write!(f, "organization was [{}]", orgs.join(","))
            }
            Self::DnsNames { missing } => write!(f, "missing DNS names {}", missing.join(",")),
            Self::IpAddresses { missing } => {
                let ips: Vec<String> = missing.iter().map(IpAddr::to_string).collect();
                write!(f, "missing IP addresses {}", ips.join(","))
            }
            Self::AuthorityChanged => write!(f, "issuing authority changed"),
        }
    }
}

/// Same members, ignoring order and duplicates.
fn same_members(existing: &BTreeSet<String>, desired: &[String]) -> bool {
    let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    existing.len() == desired.len() && existing.iter().all(|e| desired.contains(e.as_str()))
}

/// Members of `desired` absent from `existing`.
fn uncovered<T: Ord + Clone>(existing: &BTreeSet<T>, desired: &[T]) -> Vec<T> {
    let mut missing: Vec<T> = desired
        .iter()
        .filter(|d| !existing.contains(d))
        .cloned()
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

/// Renewal check against a fixed clock.
pub fn expiring_at(cert: &CertInfo, now: DateTime<Utc>) -> Option<RegenReason> {
    if cert.not_after - now <= Duration::days(CERTIFICATE_RENEW_DAYS) {
        return Some(RegenReason::Expiring {
            not_after: cert.not_after,
        });
    }
    None
}

/// Identity comparison. `authority` is the first certificate of the CA file.
pub fn identity_drift(
    cert: &CertInfo,
    desired: &DesiredCert<'_>,
    authority: Option<&CertInfo>,
) -> Option<RegenReason> {
    if cert.common_name != desired.common_name {
        return Some(RegenReason::CommonName {
            existing: cert.common_name.clone(),
        });
    }
    if !same_members(&cert.organizations, desired.organization) {
        return Some(RegenReason::Organization {
            existing: cert.organizations.clone(),
        });
    }
    let missing = uncovered(&cert.dns_names, &desired.alt_names.dns_names);
    if !missing.is_empty() {
        return Some(RegenReason::DnsNames { missing });
    }
    let missing = uncovered(&cert.ip_addresses, &desired.alt_names.ips);
    if !missing.is_empty() {
        return Some(RegenReason::IpAddresses { missing });
    }
    if let Some(authority) = authority {
        if cert.authority_key_id != authority.subject_key_id {
            return Some(RegenReason::AuthorityChanged);
        }
    }
    None
}

/// Full decision for a certificate and key on disk.
pub fn check(
    cert_path: &Path,
    key_path: &Path,
    desired: &DesiredCert<'_>,
    ca_cert_path: &Path,
    now: DateTime<Utc>,
) -> Option<RegenReason> {
    if !fsutil::exists(&[cert_path, key_path]) {
        return Some(RegenReason::Missing);
    }

    let cert = match inspect::first_cert(cert_path) {
        Ok(cert) => cert,
        Err(err) => {
            debug!(path = %cert_path.display(), error = %err, "Unreadable certificate, keeping it");
            return None;
        }
    };

    if let Some(reason) = expiring_at(&cert, now) {
        return Some(reason);
    }

    let authority = match inspect::first_cert(ca_cert_path) {
        Ok(ca) => Some(ca),
        Err(err) => {
            debug!(path = %ca_cert_path.display(), error = %err, "Unreadable authority, skipping linkage check");
            None
        }
    };

    identity_drift(&cert, desired, authority.as_ref())
}
