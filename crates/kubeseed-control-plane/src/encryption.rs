//! Secrets-at-rest encryption configuration.
//!
//! On first enablement a random key is generated and written into an
//! `EncryptionConfiguration` document listing the chosen provider followed by
//! `identity`, so data written before encryption was enabled stays readable.
//! A sibling hash record tracks which stage of a key rotation the document
//! belongs to; the bootstrap only ever writes the initial `start` stage.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kubeseed_core::{EncryptionProvider, RuntimeLayout};

use crate::crypto::token::sha256_hex;
use crate::error::{DepsError, Result};
use crate::fsutil;

/// Length of a generated encryption key in bytes.
pub const KEY_SIZE: usize = 32;

/// Stage recorded when the configuration is first written.
pub const START_STAGE: &str = "start";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfiguration {
    pub kind: String,
    pub api_version: String,
    pub resources: Vec<ResourceConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    pub resources: Vec<String>,
    pub providers: Vec<ProviderConfiguration>,
}

/// Exactly one field is set per provider entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aescbc: Option<KeysConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretbox: Option<KeysConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfiguration {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfiguration {}

impl ProviderConfiguration {
    fn keyed(provider: EncryptionProvider, keys: KeysConfiguration) -> Self {
        match provider {
            EncryptionProvider::AesCbc => Self {
                aescbc: Some(keys),
                ..Default::default()
            },
            EncryptionProvider::SecretBox => Self {
                secretbox: Some(keys),
                ..Default::default()
            },
        }
    }

    fn identity() -> Self {
        Self {
            identity: Some(IdentityConfiguration::default()),
            ..Default::default()
        }
    }

    /// Provider name and key set, `None` for identity.
    pub fn keys(&self) -> Option<(&'static str, &KeysConfiguration)> {
        if let Some(keys) = &self.aescbc {
            return Some((EncryptionProvider::AesCbc.as_str(), keys));
        }
        if let Some(keys) = &self.secretbox {
            return Some((EncryptionProvider::SecretBox.as_str(), keys));
        }
        None
    }
}

impl EncryptionConfiguration {
    /// A fresh configuration with one newly generated key.
    pub fn generate(provider: EncryptionProvider) -> Self {
        let mut raw = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut raw);
        let keys = KeysConfiguration {
            keys: vec![Key {
                name: provider.key_name().to_string(),
                secret: STANDARD.encode(raw),
            }],
        };

        Self {
            kind: "EncryptionConfiguration".to_string(),
            api_version: "apiserver.config.k8s.io/v1".to_string(),
            resources: vec![ResourceConfiguration {
                resources: vec!["secrets".to_string()],
                providers: vec![
                    ProviderConfiguration::keyed(provider, keys),
                    ProviderConfiguration::identity(),
                ],
            }],
        }
    }
}

/// Hash record for `stage` over the configuration bytes.
pub fn hash_record(stage: &str, config_bytes: &[u8]) -> String {
    format!("{stage}-{}", sha256_hex(config_bytes))
}

/// Write the encryption configuration on first enablement and make sure its
/// hash record exists.
///
/// Returns true when a new configuration was generated.
pub fn ensure_encryption_config(
    provider: EncryptionProvider,
    config_path: &Path,
    hash_path: &Path,
) -> Result<bool> {
    if fsutil::has_content(config_path) {
        if !hash_path.exists() {
            let bytes = fsutil::read(config_path)?;
            fsutil::atomic_write(hash_path, hash_record(START_STAGE, &bytes).as_bytes())?;
            info!(path = %hash_path.display(), "Backfilled encryption hash record");
        } else {
            debug!(path = %config_path.display(), "Reusing encryption configuration");
        }
        return Ok(false);
    }

    let config = EncryptionConfiguration::generate(provider);
    let bytes = serde_json::to_vec(&config).map_err(|e| DepsError::Serialize {
        what: "encryption configuration",
        reason: e.to_string(),
    })?;
    fsutil::atomic_write(config_path, &bytes)?;
    fsutil::atomic_write(hash_path, hash_record(START_STAGE, &bytes).as_bytes())?;

    info!(provider = %provider, path = %config_path.display(), "Generated encryption configuration");
    Ok(true)
}

/// Snapshot of the on-disk encryption state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptionStatus {
    pub configured: bool,
    pub provider: Option<String>,
    pub key_names: Vec<String>,
    /// Rotation stage from the hash record.
    pub stage: Option<String>,
    /// Whether the hash record matches the configuration bytes.
    pub hash_matches: bool,
}

/// Read the encryption state under a data directory.
pub fn status(layout: &RuntimeLayout) -> Result<EncryptionStatus> {
    let (config_path, hash_path) = layout.encryption_files();
    if !fsutil::has_content(&config_path) {
        return Ok(EncryptionStatus {
            configured: false,
            provider: None,
            key_names: Vec::new(),
            stage: None,
            hash_matches: false,
        });
    }

    let bytes = fsutil::read(&config_path)?;
    let config: EncryptionConfiguration =
        serde_json::from_slice(&bytes).map_err(|e| DepsError::Serialize {
            what: "encryption configuration",
            reason: e.to_string(),
        })?;

    let active = config
        .resources
        .iter()
        .flat_map(|r| r.providers.iter())
        .find_map(ProviderConfiguration::keys);
    let (provider, key_names) = match active {
        Some((name, keys)) => (
            Some(name.to_string()),
            keys.keys.iter().map(|k| k.name.clone()).collect(),
        ),
        None => (None, Vec::new()),
    };

    let (stage, hash_matches) = if hash_path.exists() {
        let record = fsutil::read_to_string(&hash_path)?;
        let record = record.trim();
        match record.split_once('-') {
            Some((stage, hash)) => (Some(stage.to_string()), hash == sha256_hex(&bytes)),
            None => (Some(record.to_string()), false),
        }
    } else {
        (None, false)
    };

    Ok(EncryptionStatus {
        configured: true,
        provider,
        key_names,
        stage,
        hash_matches,
    })
}
