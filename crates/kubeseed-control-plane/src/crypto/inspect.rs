//! Certificate parsing.
//!
//! Decodes the subject, alternative names, validity window and key
//! identifiers of an existing certificate so that drift detection and the
//! admin commands can compare it against what would be issued today.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use crate::crypto::bundle;
use crate::error::{DepsError, Result};

/// Fields of an X.509 certificate relevant to reissue decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub common_name: String,
    pub organizations: BTreeSet<String>,
    pub dns_names: BTreeSet<String>,
    pub ip_addresses: BTreeSet<IpAddr>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_key_id: Option<Vec<u8>>,
    pub authority_key_id: Option<Vec<u8>>,
    /// Raw subject public key bytes.
    pub public_key: Vec<u8>,
    pub is_ca: bool,
    /// Issuer equals subject and the signature verifies with its own key.
    pub self_signed: bool,
}

impl CertInfo {
    /// Days until expiry, negative once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

/// Parse a DER-encoded certificate. `origin` is only used for error context.
pub fn parse_der(der: &[u8], origin: &Path) -> Result<CertInfo> {
    let parse_err = |reason: String| DepsError::ParseCert {
        path: origin.to_path_buf(),
        reason,
    };

    let (_, cert) = X509Certificate::from_der(der).map_err(|e| parse_err(format!("{e:?}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let organizations = cert
        .subject()
        .iter_organization()
        .filter_map(|attr| attr.as_str().ok())
        .map(str::to_string)
        .collect();

    let mut dns_names = BTreeSet::new();
    let mut ip_addresses = BTreeSet::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => {
                    dns_names.insert(dns.to_string());
                }
                GeneralName::IPAddress(raw) => {
                    if let Some(ip) = ip_from_octets(raw) {
                        ip_addresses.insert(ip);
                    }
                }
                _ => {}
            }
        }
    }

    let mut subject_key_id = None;
    let mut authority_key_id = None;
    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(kid) => {
                subject_key_id = Some(kid.0.to_vec());
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                authority_key_id = aki.key_identifier.as_ref().map(|kid| kid.0.to_vec());
            }
            _ => {}
        }
    }

    let is_ca = cert
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);

    let self_signed =
        cert.subject().as_raw() == cert.issuer().as_raw() && cert.verify_signature(None).is_ok();

    let validity = cert.validity();
    let not_before = timestamp(validity.not_before.timestamp())
        .ok_or_else(|| parse_err("notBefore out of range".to_string()))?;
    let not_after = timestamp(validity.not_after.timestamp())
        .ok_or_else(|| parse_err("notAfter out of range".to_string()))?;

    Ok(CertInfo {
        common_name,
        organizations,
        dns_names,
        ip_addresses,
        not_before,
        not_after,
        subject_key_id,
        authority_key_id,
        public_key: cert.public_key().subject_public_key.data.to_vec(),
        is_ca,
        self_signed,
    })
}

/// Parse the first certificate in a PEM file.
pub fn first_cert(path: &Path) -> Result<CertInfo> {
    let ders = bundle::certs_from_file(path)?;
    parse_der(&ders[0], path)
}

/// Parse every certificate in a PEM file.
pub fn all_certs(path: &Path) -> Result<Vec<CertInfo>> {
    bundle::certs_from_file(path)?
        .iter()
        .map(|der| parse_der(der, path))
        .collect()
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
