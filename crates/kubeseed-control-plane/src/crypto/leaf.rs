//! Leaf certificate issuance.

use std::net::IpAddr;

use chrono::Utc;
use rcgen::Ia5String;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose,
    SanType,
};
use tracing::{debug, info};

use kubeseed_core::CertKeyPaths;

use crate::crypto::ca::{self, CertificateAuthority};
use crate::crypto::drift::{self, DesiredCert, RegenReason};
use crate::crypto::{bundle, keys};
use crate::error::{DepsError, Result};
use crate::fsutil;

/// Validity of a newly issued leaf.
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// Subject alternative names of a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltNames {
    pub dns_names: Vec<String>,
    pub ips: Vec<IpAddr>,
}

impl AltNames {
    pub fn dns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dns_names: names.into_iter().map(Into::into).collect(),
            ips: Vec::new(),
        }
    }

    /// Append user supplied names. Anything that parses as an IP address is
    /// an IP SAN, everything else a DNS SAN.
    pub fn add_sans(&mut self, sans: &[String]) {
        for san in sans {
            match san.parse::<IpAddr>() {
                Ok(ip) => self.ips.push(ip),
                Err(_) => self.dns_names.push(san.clone()),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty() && self.ips.is_empty()
    }

    fn to_san_types(&self) -> std::result::Result<Vec<SanType>, String> {
        let mut sans = Vec::with_capacity(self.dns_names.len() + self.ips.len());
        for name in &self.dns_names {
            let name = Ia5String::try_from(name.as_str()).map_err(|e| format!("{name}: {e}"))?;
            sans.push(SanType::DnsName(name));
        }
        sans.extend(self.ips.iter().copied().map(SanType::IpAddress));
        Ok(sans)
    }
}

/// Issues leaves under one authority with fixed usages and names.
///
/// One factory per role family: every certificate it issues shares the
/// authority, the extended key usages, the alternative names and whether
/// rotation is forced.
pub struct SigningFactory<'a> {
    pub authority: &'a CertKeyPaths,
    pub usages: Vec<ExtendedKeyUsagePurpose>,
    pub alt_names: AltNames,
    pub regen: bool,
}

impl<'a> SigningFactory<'a> {
    pub fn client(authority: &'a CertKeyPaths, regen: bool) -> Self {
        Self {
            authority,
            usages: vec![ExtendedKeyUsagePurpose::ClientAuth],
            alt_names: AltNames::default(),
            regen,
        }
    }

    pub fn server(authority: &'a CertKeyPaths, regen: bool, alt_names: AltNames) -> Self {
        Self {
            authority,
            usages: vec![ExtendedKeyUsagePurpose::ServerAuth],
            alt_names,
            regen,
        }
    }

    pub fn peer(authority: &'a CertKeyPaths, regen: bool, alt_names: AltNames) -> Self {
        Self {
            authority,
            usages: vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
            alt_names,
            regen,
        }
    }

    /// Issue a certificate for `common_name` into `out` unless the current
    /// one is still good. Returns true when a new certificate was written.
    ///
    /// At most one organization can be issued; rcgen keeps a single value
    /// per attribute type in a subject. Existing certificates carrying
    /// several organizations are still compared as a set, so a multi-valued
    /// subject written by another tool only drifts when its members differ.
    pub fn issue(
        &self,
        common_name: &str,
        organization: &[String],
        out: &CertKeyPaths,
    ) -> Result<bool> {
        let desired = DesiredCert {
            common_name,
            organization,
            alt_names: &self.alt_names,
        };
        let reason = if self.regen {
            Some(RegenReason::Forced)
        } else {
            drift::check(&out.cert, &out.key, &desired, &self.authority.cert, Utc::now())
        };
        let Some(reason) = reason else {
            debug!(common_name, "Certificate is current");
            return Ok(false);
        };

        let authority = CertificateAuthority::from_files(&self.authority.cert, &self.authority.key)?;
        let (leaf_key, _) = keys::load_or_generate(&out.key, reason.replaces_key())?;
        let params = self.params(&desired)?;
        let cert = authority.sign(params, &leaf_key, common_name)?;

        let leaf: &[u8] = cert.der();
        let chain = std::iter::once(leaf).chain(authority.chain().iter().map(Vec::as_slice));
        fsutil::atomic_write(&out.cert, bundle::encode_certs(chain).as_bytes())?;

        info!(common_name, reason = %reason, path = %out.cert.display(), "Issued certificate");
        Ok(true)
    }

    fn params(&self, desired: &DesiredCert<'_>) -> Result<CertificateParams> {
        let sign_err = |reason: String| DepsError::Sign {
            common_name: desired.common_name.to_string(),
            reason,
        };

        // rcgen keeps one value per attribute type in a distinguished name
        if desired.organization.len() > 1 {
            return Err(sign_err("at most one organization is supported".to_string()));
        }

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, desired.common_name);
        if let Some(org) = desired.organization.first() {
            dn.push(DnType::OrganizationName, org.as_str());
        }
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = self.usages.clone();
        params.subject_alt_names = desired.alt_names.to_san_types().map_err(sign_err)?;
        params.use_authority_key_identifier_extension = true;
        ca::set_validity(&mut params, LEAF_VALIDITY_DAYS);
        Ok(params)
    }
}
