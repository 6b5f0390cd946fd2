//! Control configuration.
//!
//! Describes the desired cluster shape. Everything the bootstrap writes is a
//! function of this struct plus what already exists under `data_dir`.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// Secrets-at-rest encryption provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum EncryptionProvider {
    /// AES-CBC with PKCS#7 padding.
    AesCbc,
    /// XSalsa20 + Poly1305.
    SecretBox,
}

impl EncryptionProvider {
    /// Provider name as it appears in the encryption configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AesCbc => "aescbc",
            Self::SecretBox => "secretbox",
        }
    }

    /// Name of the key generated for this provider.
    pub fn key_name(&self) -> &'static str {
        match self {
            Self::AesCbc => "aescbckey",
            Self::SecretBox => "secretboxkey",
        }
    }
}

impl fmt::Display for EncryptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aescbc" => Ok(Self::AesCbc),
            "secretbox" => Ok(Self::SecretBox),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for EncryptionProvider {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How the apiserver reaches cluster endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum EgressSelectorMode {
    /// Direct connections, no proxy.
    Disabled,
    /// Tunnel through the agent.
    Agent,
    /// Tunnel through the agent for pod and node addresses.
    Pod,
    /// Tunnel through the agent for pod, node and cluster addresses.
    Cluster,
}

impl EgressSelectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Agent => "agent",
            Self::Pod => "pod",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for EgressSelectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EgressSelectorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "agent" => Ok(Self::Agent),
            "pod" => Ok(Self::Pod),
            "cluster" => Ok(Self::Cluster),
            other => Err(ConfigError::UnsupportedEgressMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for EgressSelectorMode {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Control configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ControlConfig {
    /// Root of every generated artifact.
    pub data_dir: PathBuf,

    /// Prefix used in artifact names, CA names and credential groups.
    pub program: String,

    /// Extra subject alternative names (hostnames or IPs) for serving certs.
    pub sans: Vec<String>,

    /// Cluster DNS domain.
    pub cluster_domain: String,

    /// Port the apiserver listens on.
    pub api_server_port: u16,

    /// Port the supervisor listens on.
    pub supervisor_port: u16,

    /// Address the control plane binds to, if not loopback.
    pub bind_address: Option<String>,

    /// Externally supplied cluster token.
    pub token: Option<String>,

    /// Externally supplied agent join token.
    pub agent_token: Option<String>,

    /// Enable secrets-at-rest encryption.
    pub encrypt_secrets: bool,

    /// Provider used when encryption is enabled.
    pub encrypt_provider: EncryptionProvider,

    /// Egress selector mode.
    pub egress_selector_mode: EgressSelectorMode,

    /// Skip the embedded etcd serving certificate.
    pub disable_etcd: bool,

    /// Disable the service load balancer controller.
    pub disable_service_lb: bool,

    /// Namespace for service load balancer pods.
    pub service_lb_namespace: String,

    /// Disable the cloud controller node controllers.
    pub disable_ccm: bool,

    /// Running rootless.
    pub rootless: bool,

    /// Registry prepended to system images.
    pub system_default_registry: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/kubeseed/server"),
            program: "kubeseed".to_string(),
            sans: Vec::new(),
            cluster_domain: "cluster.local".to_string(),
            api_server_port: 6443,
            supervisor_port: 9345,
            bind_address: None,
            token: None,
            agent_token: None,
            encrypt_secrets: false,
            encrypt_provider: EncryptionProvider::AesCbc,
            egress_selector_mode: EgressSelectorMode::Disabled,
            disable_etcd: false,
            disable_service_lb: false,
            service_lb_namespace: "kube-system".to_string(),
            disable_ccm: false,
            rootless: false,
            system_default_registry: None,
        }
    }
}

impl ControlConfig {
    /// Create a default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reject configurations that cannot be bootstrapped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDataDir("must not be empty".to_string()));
        }
        if !self.data_dir.is_absolute() {
            return Err(ConfigError::InvalidDataDir(format!(
                "{} is not absolute",
                self.data_dir.display()
            )));
        }
        if self.program.is_empty() || self.program.contains(['/', ':', ',']) {
            return Err(ConfigError::InvalidValue {
                field: "program",
                reason: format!("'{}' is not a valid artifact prefix", self.program),
            });
        }
        if self.cluster_domain.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cluster-domain",
                reason: "must not be empty".to_string(),
            });
        }
        if self.api_server_port == 0 || self.supervisor_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                reason: "ports must be non-zero".to_string(),
            });
        }
        if let Some(san) = self
            .sans
            .iter()
            .find(|san| san.is_empty() || san.chars().any(char::is_whitespace))
        {
            return Err(ConfigError::InvalidValue {
                field: "tls-san",
                reason: format!("'{}' is not a hostname or address", san),
            });
        }
        if let Some(addr) = &self.bind_address {
            addr.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
                field: "bind-address",
                reason: format!("'{}': {}", addr, e),
            })?;
        }
        Ok(())
    }

    /// Loopback address, bracketed for URLs when `url_safe` and IPv6.
    pub fn loopback(&self, url_safe: bool) -> String {
        match self.bind_ip() {
            Some(IpAddr::V6(_)) if url_safe => "[::1]".to_string(),
            Some(IpAddr::V6(_)) => "::1".to_string(),
            _ => "127.0.0.1".to_string(),
        }
    }

    /// Bind address if one is configured, otherwise loopback.
    pub fn bind_address_or_loopback(&self, url_safe: bool) -> String {
        match self.bind_ip() {
            None => self.loopback(url_safe),
            Some(ip) if ip.is_unspecified() => self.loopback(url_safe),
            Some(IpAddr::V6(ip)) if url_safe => format!("[{}]", ip),
            Some(ip) => ip.to_string(),
        }
    }

    /// Local apiserver endpoint referenced by generated kubeconfigs.
    pub fn api_endpoint(&self) -> String {
        format!("https://{}:{}", self.loopback(true), self.api_server_port)
    }

    fn bind_ip(&self) -> Option<IpAddr> {
        self.bind_address.as_deref().and_then(|a| a.parse().ok())
    }
}
