//! Certificate and token maintenance for operators.
//!
//! Nothing here signs certificates. Leaf rotation removes the leaf files of
//! the selected services, and CA rotation installs operator supplied
//! authorities. In both cases the next bootstrap reissues whatever no longer
//! matches.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use kubeseed_core::{CertKeyPaths, RuntimeLayout};

use crate::crypto::drift::CERTIFICATE_RENEW_DAYS;
use crate::crypto::{bundle, inspect, token, CertificateAuthority};
use crate::error::{DepsError, Result};
use crate::fsutil;
use crate::passwd::Passwd;

/// State of one certificate file.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateStatus {
    pub service: &'static str,
    pub path: PathBuf,
    pub common_name: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    /// Inside the renewal window or already expired.
    pub renewal_due: bool,
    pub is_ca: bool,
    /// Why the file could not be inspected.
    pub error: Option<String>,
}

/// Inspect every authority and leaf certificate in the layout. Missing
/// files are skipped.
pub fn check_certificates(layout: &RuntimeLayout, now: DateTime<Utc>) -> Vec<CertificateStatus> {
    let authorities = layout
        .authorities()
        .into_iter()
        .map(|(name, paths)| (name, &paths.cert));
    let leaves = layout
        .leaf_certs()
        .into_iter()
        .map(|(name, paths)| (name, &paths.cert));

    authorities
        .chain(leaves)
        .filter(|(_, path)| path.exists())
        .map(|(service, path)| match inspect::first_cert(path) {
            Ok(cert) => {
                let days = cert.days_remaining(now);
                CertificateStatus {
                    service,
                    path: path.clone(),
                    common_name: Some(cert.common_name),
                    not_after: Some(cert.not_after),
                    days_remaining: Some(days),
                    renewal_due: days <= CERTIFICATE_RENEW_DAYS,
                    is_ca: cert.is_ca,
                    error: None,
                }
            }
            Err(err) => CertificateStatus {
                service,
                path: path.clone(),
                common_name: None,
                not_after: None,
                days_remaining: None,
                renewal_due: false,
                is_ca: false,
                error: Some(err.to_string()),
            },
        })
        .collect()
}

/// Services whose leaf certificates can be rotated.
pub fn rotatable_services(layout: &RuntimeLayout) -> Vec<&'static str> {
    let mut services: Vec<&'static str> = layout.leaf_certs().into_iter().map(|(s, _)| s).collect();
    services.dedup();
    services
}

/// Remove the leaf certificate and key files of `services`, or of every
/// service when empty. Returns the removed paths.
pub fn rotate_certificates(layout: &RuntimeLayout, services: &[String]) -> Result<Vec<PathBuf>> {
    let known = rotatable_services(layout);
    if let Some(unknown) = services.iter().find(|s| !known.contains(&s.as_str())) {
        return Err(DepsError::UnknownService(unknown.clone()));
    }

    let mut removed = Vec::new();
    for (service, paths) in layout.leaf_certs() {
        if !services.is_empty() && !services.iter().any(|s| s == service) {
            continue;
        }
        for path in [&paths.cert, &paths.key] {
            if fsutil::remove_if_exists(path)? {
                info!(service, path = %path.display(), "Removed for rotation");
                removed.push(path.clone());
            }
        }
    }
    Ok(removed)
}

/// A validated replacement authority waiting to be installed.
struct StagedCa<'a> {
    name: &'static str,
    source: CertKeyPaths,
    target: &'a CertKeyPaths,
}

/// Whether `replacement` keeps certificates issued under the root at
/// `current` verifiable: it is signed by that root or carries it in its
/// bundle.
fn continues_trust(replacement: &CertificateAuthority, source: &Path, current: &Path) -> Result<bool> {
    let current_root = bundle::certs_from_file(current)?.remove(0);
    if replacement.chain().iter().any(|der| *der == current_root) {
        return Ok(true);
    }
    let signing = inspect::parse_der(&replacement.chain()[0], source)?;
    let root = inspect::parse_der(&current_root, current)?;
    Ok(root.subject_key_id.is_some() && signing.authority_key_id == root.subject_key_id)
}

/// Install replacement certificate authorities from `source`.
///
/// `source` mirrors the `tls/` directory (`server-ca.crt`, `server-ca.key`,
/// `etcd/peer-ca.crt` and so on). Only authorities whose certificate and key
/// are both present are replaced. Unless `force` is set, a replacement must
/// be signed by the current root or bundle it. Every replacement is checked
/// before any file is written. Returns the names of the replaced
/// authorities.
pub fn rotate_ca(layout: &RuntimeLayout, source: &Path, force: bool) -> Result<Vec<&'static str>> {
    let tls = layout.tls_dir();
    let mut staged = Vec::new();

    for (name, target) in layout.authorities() {
        let rotate_err = |reason: String| DepsError::RotateCa {
            authority: name.to_string(),
            reason,
        };
        let (Ok(cert), Ok(key)) = (target.cert.strip_prefix(&tls), target.key.strip_prefix(&tls)) else {
            continue;
        };
        let candidate = CertKeyPaths {
            cert: source.join(cert),
            key: source.join(key),
        };

        match (candidate.cert.exists(), candidate.key.exists()) {
            (false, false) => continue,
            (true, true) => {}
            _ => {
                return Err(rotate_err(format!(
                    "{} and {} must be supplied together",
                    candidate.cert.display(),
                    candidate.key.display()
                )))
            }
        }

        let replacement = CertificateAuthority::from_files(&candidate.cert, &candidate.key)?;
        if !force && target.cert.exists() {
            if !continues_trust(&replacement, &candidate.cert, &target.cert)? {
                return Err(rotate_err(
                    "replacement is not signed by the current root and does not include it; use force to replace anyway"
                        .to_string(),
                ));
            }
        }

        staged.push(StagedCa {
            name,
            source: candidate,
            target,
        });
    }

    if staged.is_empty() {
        return Err(DepsError::RotateCa {
            authority: "any".to_string(),
            reason: format!("no certificate and key pairs found in {}", source.display()),
        });
    }

    let mut rotated = Vec::with_capacity(staged.len());
    for ca in staged {
        fsutil::atomic_write(&ca.target.cert, &fsutil::read(&ca.source.cert)?)?;
        fsutil::atomic_write(&ca.target.key, &fsutil::read(&ca.source.key)?)?;
        info!(authority = ca.name, path = %ca.target.cert.display(), "Installed certificate authority");
        rotated.push(ca.name);
    }
    Ok(rotated)
}

/// Result of a server token rotation.
#[derive(Debug, Clone)]
pub struct TokenRotation {
    /// New server password as stored in the credential table.
    pub server_pass: String,
    /// Whether the node password followed the server token.
    pub node_updated: bool,
}

/// Replace the server secret in the credential table.
///
/// A node password derived from the old server token is replaced by one
/// derived from the new token; a separately set agent token is kept. A
/// random secret is used when `new_token` is empty or absent.
pub fn rotate_server_token(
    layout: &RuntimeLayout,
    program: &str,
    new_token: Option<&str>,
) -> Result<TokenRotation> {
    let path = &layout.passwd_file;
    let mut passwd = Passwd::read(path)?;
    let old = passwd
        .pass("server")
        .map(str::to_string)
        .ok_or_else(|| DepsError::Credential(format!("no server entry in {}", path.display())))?;

    let new = match new_token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => token::generate_secret(),
    };
    if token::password_from_token(&new) == token::password_from_token(&old) {
        return Err(DepsError::Credential(
            "new token has the same secret as the current one".to_string(),
        ));
    }

    let node_updated = passwd.pass("node") == Some(token::password_from_token(&old));
    passwd.ensure_user("server", &format!("{program}:server"), &new)?;
    if node_updated {
        passwd.ensure_user("node", &format!("{program}:agent"), token::password_from_token(&new))?;
    }
    passwd.write(path)?;

    info!(node_updated, "Rotated server token");
    Ok(TokenRotation {
        server_pass: new,
        node_updated,
    })
}
