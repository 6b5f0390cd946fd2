//! Certificate authorities.
//!
//! Each trust domain has its own self-signed root. Roots are created once and
//! then only ever read. Replacing one is an operator action (delete the files
//! and restart), never something the bootstrap decides on its own.

use std::path::Path;

use chrono::{Datelike, Duration, Utc};
use pem::Pem;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyIdMethod,
    KeyPair, KeyUsagePurpose,
};
use tracing::{debug, info};

use kubeseed_core::{CertKeyPaths, RuntimeLayout};

use crate::crypto::{bundle, inspect, keys};
use crate::error::{DepsError, Result};
use crate::fsutil;

/// Validity of a newly created root.
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// Set `not_before` to today and `not_after` to `days` from today.
pub(crate) fn set_validity(params: &mut CertificateParams, days: i64) {
    let not_before = Utc::now();
    let not_after = not_before + Duration::days(days);
    params.not_before = rcgen::date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
}

/// A loaded authority able to sign leaf certificates.
pub struct CertificateAuthority {
    /// DER of every certificate in the CA file, signing cert first.
    chain: Vec<Vec<u8>>,

    /// Issuer view of the signing certificate, carrying its original subject
    /// and key identifier.
    issuer: Certificate,

    key_pair: KeyPair,
}

impl CertificateAuthority {
    /// Load an authority from its certificate bundle and private key.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let key_pair = keys::load(key_path)?;
        let chain = bundle::certs_from_file(cert_path)?;
        let info = inspect::parse_der(&chain[0], cert_path)?;

        let parse_err = |reason: String| DepsError::ParseCert {
            path: cert_path.to_path_buf(),
            reason,
        };

        if info.public_key != key_pair.public_key_raw() {
            return Err(parse_err(format!(
                "certificate does not match key {}",
                key_path.display()
            )));
        }

        let signing_pem = bundle::encode_blocks(&[Pem::new(bundle::CERTIFICATE_TAG, chain[0].clone())]);
        let mut params =
            CertificateParams::from_ca_cert_pem(&signing_pem).map_err(|e| parse_err(e.to_string()))?;
        // Leaves must reference the identifier actually present in the root
        if let Some(ski) = info.subject_key_id {
            params.key_identifier_method = KeyIdMethod::PreSpecified(ski);
        }
        let issuer = params
            .self_signed(&key_pair)
            .map_err(|e| parse_err(e.to_string()))?;

        Ok(Self {
            chain,
            issuer,
            key_pair,
        })
    }

    /// Sign `params` for `leaf_key`.
    pub fn sign(
        &self,
        params: CertificateParams,
        leaf_key: &KeyPair,
        common_name: &str,
    ) -> Result<Certificate> {
        params
            .signed_by(leaf_key, &self.issuer, &self.key_pair)
            .map_err(|e| DepsError::Sign {
                common_name: common_name.to_string(),
                reason: e.to_string(),
            })
    }

    /// DER of every certificate in the CA bundle.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }
}

/// Build a self-signed root for `common_name`.
pub fn self_signed_root(common_name: &str, key_pair: &KeyPair) -> Result<Certificate> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    set_validity(&mut params, CA_VALIDITY_DAYS);

    params.self_signed(key_pair).map_err(|e| DepsError::Sign {
        common_name: common_name.to_string(),
        reason: e.to_string(),
    })
}

/// Create the root for `prefix` unless both its files already exist.
///
/// An existing key without a certificate is reused. Returns true when a new
/// certificate was written.
pub fn ensure_signing_ca(prefix: &str, paths: &CertKeyPaths) -> Result<bool> {
    if fsutil::exists(&[&paths.cert, &paths.key]) {
        debug!(ca = prefix, "Reusing certificate authority");
        return Ok(false);
    }

    let (key_pair, _) = keys::load_or_generate(&paths.key, false)?;
    let common_name = format!("{prefix}-ca@{}", Utc::now().timestamp());
    let cert = self_signed_root(&common_name, &key_pair)?;
    let der: &[u8] = cert.der();
    let pem = bundle::encode_certs([der]);
    fsutil::atomic_write(&paths.cert, pem.as_bytes())?;

    info!(ca = prefix, common_name = %common_name, "Created certificate authority");
    Ok(true)
}

/// Create the server root, adopting the deprecated token CA when present.
///
/// Adopting links the token CA files under the server CA names and does not
/// count as creating a new authority.
pub fn ensure_server_ca(prefix: &str, layout: &RuntimeLayout) -> Result<bool> {
    let legacy = &layout.legacy_token_ca;
    let server = &layout.server_ca;

    let created = if fsutil::exists(&[&legacy.cert, &legacy.key])
        && !server.cert.exists()
        && !server.key.exists()
    {
        info!("Upgrading token-ca files to server-ca");
        fsutil::link_or_move(&legacy.cert, &server.cert)?;
        fsutil::link_or_move(&legacy.key, &server.key)?;
        false
    } else {
        ensure_signing_ca(prefix, server)?
    };

    write_nochain(&server.cert, &layout.signing_server_ca)?;
    Ok(created)
}

/// Write only the first certificate of a CA bundle to `dst`.
pub fn write_nochain(ca_cert: &Path, dst: &Path) -> Result<()> {
    let chain = bundle::certs_from_file(ca_cert)?;
    let pem = bundle::encode_certs([chain[0].as_slice()]);
    if fsutil::write_if_changed(dst, pem.as_bytes())? {
        debug!(path = %dst.display(), "Wrote unchained CA certificate");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeseed_core::ControlConfig;
    use tempfile::TempDir;

    fn paths(dir: &Path, stem: &str) -> CertKeyPaths {
        CertKeyPaths {
            cert: dir.join(format!("{stem}.crt")),
            key: dir.join(format!("{stem}.key")),
        }
    }

    #[test]
    fn test_signing_ca_created_once() {
        let dir = TempDir::new().unwrap();
        let ca = paths(dir.path(), "client-ca");

        assert!(ensure_signing_ca("kubeseed-client", &ca).unwrap());
        let cert = std::fs::read(&ca.cert).unwrap();

        assert!(!ensure_signing_ca("kubeseed-client", &ca).unwrap());
        assert_eq!(std::fs::read(&ca.cert).unwrap(), cert);

        let info = inspect::first_cert(&ca.cert).unwrap();
        assert!(info.is_ca);
        assert!(info.self_signed);
        assert!(info.common_name.starts_with("kubeseed-client-ca@"));
    }

    #[test]
    fn test_signing_ca_reuses_orphan_key() {
        let dir = TempDir::new().unwrap();
        let ca = paths(dir.path(), "server-ca");
        let (key, _) = keys::load_or_generate(&ca.key, false).unwrap();

        assert!(ensure_signing_ca("kubeseed-server", &ca).unwrap());
        let info = inspect::first_cert(&ca.cert).unwrap();
        assert_eq!(info.public_key, key.public_key_raw());
    }

    #[test]
    fn test_loaded_ca_signs_with_original_key_id() {
        let dir = TempDir::new().unwrap();
        let ca_paths = paths(dir.path(), "ca");
        ensure_signing_ca("test", &ca_paths).unwrap();

        let ca = CertificateAuthority::from_files(&ca_paths.cert, &ca_paths.key).unwrap();
        let leaf_key = keys::generate().unwrap();
        let mut params = CertificateParams::default();
        params.use_authority_key_identifier_extension = true;
        let leaf = ca.sign(params, &leaf_key, "leaf").unwrap();

        let root = inspect::first_cert(&ca_paths.cert).unwrap();
        let leaf = inspect::parse_der(leaf.der(), Path::new("leaf")).unwrap();
        assert!(root.subject_key_id.is_some());
        assert_eq!(leaf.authority_key_id, root.subject_key_id);
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let dir = TempDir::new().unwrap();
        let ca_paths = paths(dir.path(), "ca");
        ensure_signing_ca("test", &ca_paths).unwrap();
        keys::load_or_generate(&ca_paths.key, true).unwrap();

        assert!(matches!(
            CertificateAuthority::from_files(&ca_paths.cert, &ca_paths.key),
            Err(DepsError::ParseCert { .. })
        ));
    }

    #[test]
    fn test_legacy_token_ca_adopted() {
        let dir = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(&ControlConfig::with_data_dir(dir.path()));
        ensure_signing_ca("legacy", &layout.legacy_token_ca).unwrap();
        let legacy_cert = std::fs::read(&layout.legacy_token_ca.cert).unwrap();

        assert!(!ensure_server_ca("kubeseed-server", &layout).unwrap());
        assert_eq!(std::fs::read(&layout.server_ca.cert).unwrap(), legacy_cert);
        assert!(layout.server_ca.key.exists());
        assert!(layout.signing_server_ca.exists());

        // Second run sees an existing server CA and leaves it alone
        assert!(!ensure_server_ca("kubeseed-server", &layout).unwrap());
        assert_eq!(std::fs::read(&layout.server_ca.cert).unwrap(), legacy_cert);
    }

    #[test]
    fn test_nochain_keeps_first_cert() {
        let dir = TempDir::new().unwrap();
        let first = paths(dir.path(), "first");
        let second = paths(dir.path(), "second");
        ensure_signing_ca("first", &first).unwrap();
        ensure_signing_ca("second", &second).unwrap();

        let chained = dir.path().join("chained.crt");
        let mut bundle_pem = std::fs::read_to_string(&first.cert).unwrap();
        bundle_pem.push_str(&std::fs::read_to_string(&second.cert).unwrap());
        std::fs::write(&chained, bundle_pem).unwrap();

        let nochain = dir.path().join("nochain.crt");
        write_nochain(&chained, &nochain).unwrap();
        assert_eq!(
            std::fs::read(&nochain).unwrap(),
            std::fs::read(&first.cert).unwrap()
        );
    }
}
