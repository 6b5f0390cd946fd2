//! On-disk layout of generated artifacts.
//!
//! Every file the bootstrap reads or writes has a fixed location under the
//! data directory. Certificates and keys live in `tls/`, credentials and
//! kubeconfigs in `cred/`, derived configuration documents in `etc/`.

use std::path::{Path, PathBuf};

use crate::config::ControlConfig;

const ENCRYPTION_CONFIG_FILE: &str = "encryption-config.json";
const ENCRYPTION_HASH_FILE: &str = "encryption-state.json";

/// Certificate and key path pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertKeyPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertKeyPaths {
    fn new(dir: &Path, stem: &str) -> Self {
        Self {
            cert: dir.join(format!("{stem}.crt")),
            key: dir.join(format!("{stem}.key")),
        }
    }
}

/// Resolved paths of every artifact.
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    pub data_dir: PathBuf,

    // Certificate authorities
    pub client_ca: CertKeyPaths,
    pub server_ca: CertKeyPaths,
    pub request_header_ca: CertKeyPaths,
    pub etcd_server_ca: CertKeyPaths,
    pub etcd_peer_ca: CertKeyPaths,
    /// Deprecated name of the server CA.
    pub legacy_token_ca: CertKeyPaths,

    /// Single-certificate copies of chained CA files.
    pub signing_client_ca: PathBuf,
    pub signing_server_ca: PathBuf,

    // Service account signing keys
    pub service_key: PathBuf,
    pub service_current_key: PathBuf,

    // Credentials
    pub passwd_file: PathBuf,
    pub node_passwd_file: PathBuf,
    pub ipsec_key: PathBuf,

    // Kubeconfigs
    pub kubeconfig_admin: PathBuf,
    pub kubeconfig_supervisor: PathBuf,
    pub kubeconfig_controller: PathBuf,
    pub kubeconfig_scheduler: PathBuf,
    pub kubeconfig_api_server: PathBuf,
    pub kubeconfig_cloud_controller: PathBuf,

    // Client certificates
    pub client_admin: CertKeyPaths,
    pub client_supervisor: CertKeyPaths,
    pub client_controller: CertKeyPaths,
    pub client_cloud_controller: CertKeyPaths,
    pub client_scheduler: CertKeyPaths,
    pub client_kube_api: CertKeyPaths,
    pub client_kube_proxy: CertKeyPaths,
    pub client_program_controller: CertKeyPaths,
    pub client_auth_proxy: CertKeyPaths,
    pub client_kubelet_key: PathBuf,

    // Serving certificates
    pub serving_kube_api: CertKeyPaths,
    pub serving_kube_scheduler: CertKeyPaths,
    pub serving_kube_controller: CertKeyPaths,
    pub serving_kubelet_key: PathBuf,

    // etcd
    pub server_etcd: CertKeyPaths,
    pub peer_server_client_etcd: CertKeyPaths,
    pub client_etcd: CertKeyPaths,

    // Derived configuration
    pub egress_selector_config: PathBuf,
    pub cloud_controller_config: PathBuf,

    /// Only set when secrets encryption is enabled.
    pub encryption_config: Option<PathBuf>,
    pub encryption_hash: Option<PathBuf>,
}

impl RuntimeLayout {
    /// Compute the layout for a configuration.
    pub fn new(config: &ControlConfig) -> Self {
        let data_dir = config.data_dir.clone();
        let tls = data_dir.join("tls");
        let cred = data_dir.join("cred");
        let etc = data_dir.join("etc");
        let etcd = tls.join("etcd");
        let program = config.program.as_str();

        let (encryption_config, encryption_hash) = if config.encrypt_secrets {
            (
                Some(cred.join(ENCRYPTION_CONFIG_FILE)),
                Some(cred.join(ENCRYPTION_HASH_FILE)),
            )
        } else {
            (None, None)
        };

        Self {
            client_ca: CertKeyPaths::new(&tls, "client-ca"),
            server_ca: CertKeyPaths::new(&tls, "server-ca"),
            request_header_ca: CertKeyPaths::new(&tls, "request-header-ca"),
            etcd_server_ca: CertKeyPaths::new(&etcd, "server-ca"),
            etcd_peer_ca: CertKeyPaths::new(&etcd, "peer-ca"),
            legacy_token_ca: CertKeyPaths::new(&tls, "token-ca"),

            signing_client_ca: tls.join("client-ca.nochain.crt"),
            signing_server_ca: tls.join("server-ca.nochain.crt"),

            service_key: tls.join("service.key"),
            service_current_key: tls.join("service.current.key"),

            passwd_file: cred.join("passwd"),
            node_passwd_file: cred.join("node-passwd"),
            ipsec_key: cred.join("ipsec.psk"),

            kubeconfig_admin: cred.join("admin.kubeconfig"),
            kubeconfig_supervisor: cred.join("supervisor.kubeconfig"),
            kubeconfig_controller: cred.join("controller.kubeconfig"),
            kubeconfig_scheduler: cred.join("scheduler.kubeconfig"),
            kubeconfig_api_server: cred.join("api-server.kubeconfig"),
            kubeconfig_cloud_controller: cred.join("cloud-controller.kubeconfig"),

            client_admin: CertKeyPaths::new(&tls, "client-admin"),
            client_supervisor: CertKeyPaths::new(&tls, "client-supervisor"),
            client_controller: CertKeyPaths::new(&tls, "client-controller"),
            client_cloud_controller: CertKeyPaths::new(
                &tls,
                &format!("client-{program}-cloud-controller"),
            ),
            client_scheduler: CertKeyPaths::new(&tls, "client-scheduler"),
            client_kube_api: CertKeyPaths::new(&tls, "client-kube-apiserver"),
            client_kube_proxy: CertKeyPaths::new(&tls, "client-kube-proxy"),
            client_program_controller: CertKeyPaths::new(
                &tls,
                &format!("client-{program}-controller"),
            ),
            client_auth_proxy: CertKeyPaths::new(&tls, "client-auth-proxy"),
            client_kubelet_key: tls.join("client-kubelet.key"),

            serving_kube_api: CertKeyPaths::new(&tls, "serving-kube-apiserver"),
            serving_kube_scheduler: CertKeyPaths::new(
                &tls.join("kube-scheduler"),
                "kube-scheduler",
            ),
            serving_kube_controller: CertKeyPaths::new(
                &tls.join("kube-controller-manager"),
                "kube-controller-manager",
            ),
            serving_kubelet_key: tls.join("serving-kubelet.key"),

            server_etcd: CertKeyPaths::new(&etcd, "server-client"),
            peer_server_client_etcd: CertKeyPaths::new(&etcd, "peer-server-client"),
            client_etcd: CertKeyPaths::new(&etcd, "client"),

            egress_selector_config: etc.join("egress-selector-config.yaml"),
            cloud_controller_config: etc.join("cloud-config.yaml"),

            encryption_config,
            encryption_hash,
            data_dir,
        }
    }

    pub fn tls_dir(&self) -> PathBuf {
        self.data_dir.join("tls")
    }

    pub fn cred_dir(&self) -> PathBuf {
        self.data_dir.join("cred")
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.data_dir.join("etc")
    }

    /// Encryption config and hash record locations, whether or not
    /// encryption is enabled for this run.
    pub fn encryption_files(&self) -> (PathBuf, PathBuf) {
        let cred = self.cred_dir();
        (cred.join(ENCRYPTION_CONFIG_FILE), cred.join(ENCRYPTION_HASH_FILE))
    }

    /// Certificates that are no longer issued; only their keys are kept.
    pub fn legacy_certs(&self) -> [&Path; 2] {
        [
            self.client_kube_proxy.cert.as_path(),
            self.client_program_controller.cert.as_path(),
        ]
    }

    /// Every certificate authority, by trust-domain name.
    pub fn authorities(&self) -> Vec<(&'static str, &CertKeyPaths)> {
        vec![
            ("client", &self.client_ca),
            ("server", &self.server_ca),
            ("request-header", &self.request_header_ca),
            ("etcd-server", &self.etcd_server_ca),
            ("etcd-peer", &self.etcd_peer_ca),
        ]
    }

    /// Every signed leaf certificate, grouped by the service that uses it.
    pub fn leaf_certs(&self) -> Vec<(&'static str, &CertKeyPaths)> {
        vec![
            ("admin", &self.client_admin),
            ("supervisor", &self.client_supervisor),
            ("api-server", &self.client_kube_api),
            ("api-server", &self.serving_kube_api),
            ("controller-manager", &self.client_controller),
            ("controller-manager", &self.serving_kube_controller),
            ("scheduler", &self.client_scheduler),
            ("scheduler", &self.serving_kube_scheduler),
            ("cloud-controller", &self.client_cloud_controller),
            ("auth-proxy", &self.client_auth_proxy),
            ("etcd", &self.client_etcd),
            ("etcd", &self.peer_server_client_etcd),
            ("etcd", &self.server_etcd),
        ]
    }
}
