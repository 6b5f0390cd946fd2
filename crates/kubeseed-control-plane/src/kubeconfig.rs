//! Kubeconfig files for the control plane's own clients.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use kubeseed_core::CertKeyPaths;

use crate::error::{DepsError, Result};
use crate::fsutil;

const CLUSTER_NAME: &str = "local";
const CONTEXT_NAME: &str = "Default";
const USER_NAME: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
    pub kind: String,
    pub preferences: Preferences,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub cluster: Cluster,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,
    pub certificate_authority: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    pub context: Context,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub cluster: String,
    pub namespace: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    pub client_certificate: String,
    pub client_key: String,
}

/// Renders kubeconfigs that all point at one apiserver and trust one CA.
#[derive(Debug, Clone)]
pub struct KubeconfigRenderer {
    server: String,
    certificate_authority: String,
}

impl KubeconfigRenderer {
    pub fn new(server: impl Into<String>, certificate_authority: &Path) -> Self {
        Self {
            server: server.into(),
            certificate_authority: certificate_authority.to_string_lossy().into_owned(),
        }
    }

    /// Build the document for a client certificate.
    pub fn document(&self, client: &CertKeyPaths) -> KubeConfig {
        KubeConfig {
            api_version: "v1".to_string(),
            clusters: vec![NamedCluster {
                cluster: Cluster {
                    server: self.server.clone(),
                    certificate_authority: self.certificate_authority.clone(),
                },
                name: CLUSTER_NAME.to_string(),
            }],
            contexts: vec![NamedContext {
                context: Context {
                    cluster: CLUSTER_NAME.to_string(),
                    namespace: "default".to_string(),
                    user: USER_NAME.to_string(),
                },
                name: CONTEXT_NAME.to_string(),
            }],
            current_context: CONTEXT_NAME.to_string(),
            kind: "Config".to_string(),
            preferences: Preferences::default(),
            users: vec![NamedUser {
                name: USER_NAME.to_string(),
                user: User {
                    client_certificate: client.cert.to_string_lossy().into_owned(),
                    client_key: client.key.to_string_lossy().into_owned(),
                },
            }],
        }
    }

    pub fn render(&self, client: &CertKeyPaths) -> Result<String> {
        serde_yaml::to_string(&self.document(client)).map_err(|e| DepsError::Serialize {
            what: "kubeconfig",
            reason: e.to_string(),
        })
    }

    /// Write the kubeconfig for `client` to `dest`. Returns true when the
    /// file changed.
    pub fn write(&self, dest: &Path, client: &CertKeyPaths) -> Result<bool> {
        let rendered = self.render(client)?;
        let written = fsutil::write_if_changed(dest, rendered.as_bytes())?;
        if written {
            info!(path = %dest.display(), "Wrote kubeconfig");
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn client() -> CertKeyPaths {
        CertKeyPaths {
            cert: PathBuf::from("/data/tls/client-admin.crt"),
            key: PathBuf::from("/data/tls/client-admin.key"),
        }
    }

    #[test]
    fn test_render_shape() {
        let renderer = KubeconfigRenderer::new("https://127.0.0.1:6443", Path::new("/data/tls/server-ca.crt"));
        let rendered = renderer.render(&client()).unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(doc["apiVersion"].as_str(), Some("v1"));
        assert_eq!(doc["current-context"].as_str(), Some("Default"));
        assert_eq!(doc["kind"].as_str(), Some("Config"));
        assert_eq!(
            doc["clusters"][0]["cluster"]["server"].as_str(),
            Some("https://127.0.0.1:6443")
        );
        assert_eq!(
            doc["clusters"][0]["cluster"]["certificate-authority"].as_str(),
            Some("/data/tls/server-ca.crt")
        );
        assert_eq!(doc["contexts"][0]["context"]["namespace"].as_str(), Some("default"));
        assert_eq!(
            doc["users"][0]["user"]["client-key"].as_str(),
            Some("/data/tls/client-admin.key")
        );
    }

    #[test]
    fn test_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("admin.kubeconfig");
        let renderer = KubeconfigRenderer::new("https://127.0.0.1:6443", Path::new("/ca.crt"));

        assert!(renderer.write(&dest, &client()).unwrap());
        assert!(!renderer.write(&dest, &client()).unwrap());

        let parsed: KubeConfig =
            serde_yaml::from_str(&std::fs::read_to_string(&dest).unwrap()).unwrap();
        assert_eq!(parsed, renderer.document(&client()));
    }
}
