//! Private key files.

use std::path::Path;

use pem::Pem;
use rcgen::KeyPair;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use tracing::{debug, info};

use crate::crypto::bundle;
use crate::error::{DepsError, Result};
use crate::fsutil;

const PKCS8_TAG: &str = "PRIVATE KEY";
const SEC1_TAG: &str = "EC PRIVATE KEY";
const PKCS1_TAG: &str = "RSA PRIVATE KEY";

/// Generate a fresh ECDSA P-256 key.
pub fn generate() -> Result<KeyPair> {
    KeyPair::generate().map_err(|e| DepsError::KeyGen(e.to_string()))
}

/// Load a PEM private key.
///
/// Accepts PKCS#8, SEC1 (P-256 and P-384) and PKCS#1 RSA keys. Blocks that
/// are not private keys, such as the `EC PARAMETERS` header openssl writes,
/// are skipped.
pub fn load(path: &Path) -> Result<KeyPair> {
    let parse_err = |reason: String| DepsError::ParseKey {
        path: path.to_path_buf(),
        reason,
    };

    let raw = fsutil::read(path)?;
    let block = pem::parse_many(&raw)
        .map_err(|e| parse_err(e.to_string()))?
        .into_iter()
        .find(|block| block.tag().ends_with(PKCS8_TAG))
        .ok_or_else(|| parse_err("no private key block".to_string()))?;

    let pkcs8 = to_pkcs8(&block).map_err(parse_err)?;
    KeyPair::try_from(pkcs8.as_slice()).map_err(|e| parse_err(e.to_string()))
}

/// PKCS#8 DER of a private key block.
fn to_pkcs8(block: &Pem) -> std::result::Result<Vec<u8>, String> {
    match block.tag() {
        PKCS8_TAG => Ok(block.contents().to_vec()),
        SEC1_TAG => sec1_to_pkcs8(block.contents()),
        PKCS1_TAG => {
            let key = rsa::RsaPrivateKey::from_pkcs1_der(block.contents()).map_err(|e| e.to_string())?;
            let doc = key.to_pkcs8_der().map_err(|e| e.to_string())?;
            Ok(doc.as_bytes().to_vec())
        }
        other => Err(format!("unsupported key type {other:?}")),
    }
}

fn sec1_to_pkcs8(der: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let doc = match p256::SecretKey::from_sec1_der(der) {
        Ok(key) => key.to_pkcs8_der(),
        Err(_) => p384::SecretKey::from_sec1_der(der)
            .map_err(|e| format!("unsupported EC key: {e}"))?
            .to_pkcs8_der(),
    };
    doc.map(|doc| doc.as_bytes().to_vec()).map_err(|e| e.to_string())
}

/// Load the key at `path`, or generate and persist a new one.
///
/// With `regen` set any existing key is replaced. Returns the key and whether
/// it was newly written.
pub fn load_or_generate(path: &Path, regen: bool) -> Result<(KeyPair, bool)> {
    if !regen && path.exists() {
        return Ok((load(path)?, false));
    }
    let key = generate()?;
    fsutil::atomic_write(path, key.serialize_pem().as_bytes())?;
    debug!(path = %path.display(), "Wrote private key");
    Ok((key, true))
}

/// Make sure a standalone key exists. Used for identities whose certificates
/// are requested later by agents.
pub fn ensure_key(path: &Path, regen: bool) -> Result<bool> {
    let (_, written) = load_or_generate(path, regen)?;
    Ok(written)
}

/// Ensure the service account signing key exists and refresh its
/// single-key copy.
///
/// `service.key` may hold several keys (the newest first, older ones kept so
/// previously issued tokens still verify). The API server signs with
/// `service.current.key`, which always holds only the first private key.
pub fn ensure_service_account_key(service_key: &Path, current_key: &Path) -> Result<bool> {
    let mut created = false;
    if !service_key.exists() {
        let key = generate()?;
        fsutil::atomic_write(service_key, key.serialize_pem().as_bytes())?;
        info!(path = %service_key.display(), "Generated service account signing key");
        created = true;
    }

    let first = bundle::read_blocks(service_key)?
        .into_iter()
        .find(|block| block.tag().ends_with("PRIVATE KEY"))
        .ok_or_else(|| DepsError::ParseKey {
            path: service_key.to_path_buf(),
            reason: "no private key block".to_string(),
        })?;

    let current = bundle::encode_blocks(&[Pem::new(first.tag(), first.contents().to_vec())]);
    fsutil::write_if_changed(current_key, current.as_bytes())?;
    Ok(created)
}
