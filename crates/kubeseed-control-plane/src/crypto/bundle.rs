//! PEM bundle reading and encoding.

use std::path::Path;

use pem::{EncodeConfig, LineEnding, Pem};

use crate::error::{DepsError, Result};
use crate::fsutil;

pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Parse every PEM block in a file.
pub fn read_blocks(path: &Path) -> Result<Vec<Pem>> {
    let raw = fsutil::read(path)?;
    pem::parse_many(&raw).map_err(|e| DepsError::ParseCert {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// DER bytes of every certificate in a file, in file order.
///
/// A CA file may hold a chain (root behind an intermediate); the first entry
/// is always the certificate that owns the key.
pub fn certs_from_file(path: &Path) -> Result<Vec<Vec<u8>>> {
    let certs: Vec<Vec<u8>> = read_blocks(path)?
        .into_iter()
        .filter(|block| block.tag() == CERTIFICATE_TAG)
        .map(|block| block.into_contents())
        .collect();
    if certs.is_empty() {
        return Err(DepsError::EmptyBundle {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Encode DER certificates as a PEM bundle.
pub fn encode_certs<'a>(ders: impl IntoIterator<Item = &'a [u8]>) -> String {
    let blocks: Vec<Pem> = ders
        .into_iter()
        .map(|der| Pem::new(CERTIFICATE_TAG, der.to_vec()))
        .collect();
    encode_blocks(&blocks)
}

/// Encode PEM blocks with LF line endings.
pub fn encode_blocks(blocks: &[Pem]) -> String {
    pem::encode_many_config(blocks, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
