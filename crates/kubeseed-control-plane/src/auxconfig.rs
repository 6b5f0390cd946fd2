//! Derived configuration documents for the apiserver and cloud controller.
//!
//! Both are pure functions of the control configuration and layout. They are
//! re-derived on every run and only touch disk when the content differs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kubeseed_core::{ControlConfig, EgressSelectorMode, RuntimeLayout};

use crate::error::{DepsError, Result};
use crate::fsutil;

/// Default image of the service load balancer.
pub const DEFAULT_LB_IMAGE: &str = "rancher/klipper-lb:v0.4.13";

/// Priority class given to service load balancer pods.
pub const DEFAULT_LB_PRIORITY_CLASS_NAME: &str = "system-node-critical";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressSelectorConfiguration {
    pub kind: String,
    pub api_version: String,
    pub egress_selections: Vec<EgressSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressSelection {
    pub name: String,
    pub connection: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub proxy_protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub tcp: TcpTransport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpTransport {
    pub url: String,
    pub tls_config: TlsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub ca_bundle: String,
    pub client_key: String,
    pub client_cert: String,
}

impl EgressSelectorConfiguration {
    pub fn new(config: &ControlConfig, layout: &RuntimeLayout) -> Self {
        let connection = match config.egress_selector_mode {
            EgressSelectorMode::Disabled => Connection {
                proxy_protocol: "Direct".to_string(),
                transport: None,
            },
            EgressSelectorMode::Agent | EgressSelectorMode::Pod | EgressSelectorMode::Cluster => {
                Connection {
                    proxy_protocol: "HTTPConnect".to_string(),
                    transport: Some(Transport {
                        tcp: TcpTransport {
                            url: format!(
                                "https://{}:{}",
                                config.bind_address_or_loopback(true),
                                config.supervisor_port
                            ),
                            tls_config: TlsConfig {
                                ca_bundle: path_string(&layout.server_ca.cert),
                                client_key: path_string(&layout.client_kube_api.key),
                                client_cert: path_string(&layout.client_kube_api.cert),
                            },
                        },
                    }),
                }
            }
        };

        Self {
            kind: "EgressSelectorConfiguration".to_string(),
            api_version: "apiserver.k8s.io/v1beta1".to_string(),
            egress_selections: vec![EgressSelection {
                name: "cluster".to_string(),
                connection,
            }],
        }
    }
}

/// Cloud controller settings consumed by the embedded cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    pub lb_default_priority_class_name: String,
    pub lb_enabled: bool,
    pub lb_image: String,
    pub lb_namespace: String,
    pub node_enabled: bool,
    pub rootless: bool,
}

impl CloudConfig {
    pub fn new(config: &ControlConfig) -> Self {
        let lb_image = match config.system_default_registry.as_deref() {
            Some(registry) if !registry.is_empty() => format!("{registry}/{DEFAULT_LB_IMAGE}"),
            _ => DEFAULT_LB_IMAGE.to_string(),
        };

        Self {
            lb_default_priority_class_name: DEFAULT_LB_PRIORITY_CLASS_NAME.to_string(),
            lb_enabled: !config.disable_service_lb,
            lb_image,
            lb_namespace: config.service_lb_namespace.clone(),
            node_enabled: !config.disable_ccm,
            rootless: config.rootless,
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn write_json<T: Serialize>(what: &'static str, value: &T, path: &Path) -> Result<bool> {
    let bytes = serde_json::to_vec(value).map_err(|e| DepsError::Serialize {
        what,
        reason: e.to_string(),
    })?;
    let written = fsutil::write_if_changed(path, &bytes)?;
    debug!(path = %path.display(), written, "Derived {what}");
    Ok(written)
}

/// Write the egress selector configuration. Returns true when it changed.
pub fn write_egress_selector_config(config: &ControlConfig, layout: &RuntimeLayout) -> Result<bool> {
    write_json(
        "egress selector configuration",
        &EgressSelectorConfiguration::new(config, layout),
        &layout.egress_selector_config,
    )
}

/// Write the cloud provider configuration. Returns true when it changed.
pub fn write_cloud_config(config: &ControlConfig, layout: &RuntimeLayout) -> Result<bool> {
    write_json(
        "cloud provider configuration",
        &CloudConfig::new(config),
        &layout.cloud_controller_config,
    )
}
