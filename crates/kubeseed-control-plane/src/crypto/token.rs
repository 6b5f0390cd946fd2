//! Random secrets and join token handling.
//!
//! A join token comes in three shapes:
//!
//! - full: `K10<ca-hash>::<username>:<password>`
//! - short with user: `<username>:<password>`
//! - bare: `<password>`
//!
//! Only the password part is ever stored in the credential table.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix of full-format tokens.
pub const TOKEN_PREFIX: &str = "K10";

/// Hex encoding of `bytes` random bytes from the thread-local CSPRNG.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generate a fresh server secret.
pub fn generate_secret() -> String {
    random_hex(16)
}

/// Hash arbitrary bytes with SHA-256, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Extract the password portion of a join token.
pub fn password_from_token(token: &str) -> &str {
    let token = token.trim();
    let credentials = match token.strip_prefix(TOKEN_PREFIX) {
        Some(rest) => match rest.split_once("::") {
            Some((_, creds)) => creds,
            None => token,
        },
        None => token,
    };
    match credentials.split_once(':') {
        Some((_, password)) => password,
        None => credentials,
    }
}

/// Build a full-format token pinning the server CA bundle.
pub fn format_full_token(server_ca: &[u8], username: &str, password: &str) -> String {
    format!("{TOKEN_PREFIX}{}::{username}:{password}", sha256_hex(server_ca))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(16).len(), 32);
        assert_eq!(random_hex(48).len(), 96);
        assert_ne!(random_hex(16), random_hex(16));
    }

    #[test]
    fn test_password_from_token_formats() {
        assert_eq!(password_from_token("secret"), "secret");
        assert_eq!(password_from_token("server:secret"), "secret");
        assert_eq!(password_from_token("K10abcdef::server:secret"), "secret");
        assert_eq!(password_from_token(" node:secret\n"), "secret");
    }

    #[test]
    fn test_full_token_round_trip() {
        let token = format_full_token(b"ca-bundle", "server", "pw");
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 64 + "::server:pw".len());
        assert_eq!(password_from_token(&token), "pw");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
