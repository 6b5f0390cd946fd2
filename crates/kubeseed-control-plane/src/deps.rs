//! Control plane dependency generation.
//!
//! [`gen_server_deps`] brings a data directory up to date with a
//! [`ControlConfig`]: certificate authorities, every signed leaf, the service
//! account key, the credential table, the network pre-shared key, the
//! encryption configuration and the derived apiserver documents. It runs as
//! an ordered list of steps and stops at the first error. Every step is
//! idempotent, so rerunning after a failure is always safe.

use std::path::Path;

use tracing::{debug, info};

use kubeseed_core::{CertKeyPaths, ControlConfig, RuntimeLayout};

use crate::auxconfig;
use crate::crypto::{ca, keys, token, AltNames, SigningFactory};
use crate::encryption;
use crate::error::Result;
use crate::fsutil;
use crate::kubeconfig::KubeconfigRenderer;
use crate::passwd::Passwd;
use crate::runtime::ControlRuntime;

/// Group granting unrestricted cluster access.
pub const SYSTEM_PRIVILEGED_GROUP: &str = "system:masters";

/// Common name of the front proxy client.
pub const REQUEST_HEADER_CN: &str = "system:auth-proxy";

/// Random bytes in the network pre-shared key.
const IPSEC_KEY_SIZE: usize = 48;

type Step = fn(&mut Bootstrap) -> Result<()>;

const STEPS: &[(&str, Step)] = &[
    ("cleanup-legacy-certs", Bootstrap::cleanup_legacy_certs),
    ("client-certs", Bootstrap::gen_client_certs),
    ("server-certs", Bootstrap::gen_server_certs),
    ("request-header-certs", Bootstrap::gen_request_header_certs),
    ("etcd-certs", Bootstrap::gen_etcd_certs),
    ("service-account", Bootstrap::gen_service_account),
    ("users", Bootstrap::gen_users),
    ("ipsec-psk", Bootstrap::gen_encrypted_network_info),
    ("encryption-config", Bootstrap::gen_encryption_config),
    ("egress-selector-config", Bootstrap::gen_egress_selector_config),
    ("cloud-config", Bootstrap::gen_cloud_config),
    ("read-tokens", Bootstrap::read_tokens),
];

/// Generate every artifact the control plane needs under `config.data_dir`.
pub fn gen_server_deps(config: &ControlConfig) -> Result<ControlRuntime> {
    config.validate()?;

    let layout = RuntimeLayout::new(config);
    fsutil::ensure_dir(&layout.data_dir)?;

    let kubeconfigs = KubeconfigRenderer::new(config.api_endpoint(), &layout.server_ca.cert);
    let mut bootstrap = Bootstrap {
        config: config.clone(),
        kubeconfigs,
        runtime: ControlRuntime::new(layout),
    };

    info!(data_dir = %config.data_dir.display(), "Generating control plane dependencies");
    for (name, step) in STEPS {
        debug!(step = name, "Running bootstrap step");
        step(&mut bootstrap)?;
    }
    info!(data_dir = %config.data_dir.display(), "Control plane dependencies ready");

    Ok(bootstrap.runtime)
}

/// A client identity that gets its own kubeconfig.
struct ClientRole<'a> {
    common_name: String,
    organization: Vec<String>,
    cert: &'a CertKeyPaths,
    kubeconfig: &'a Path,
}

struct Bootstrap {
    config: ControlConfig,
    kubeconfigs: KubeconfigRenderer,
    runtime: ControlRuntime,
}

impl Bootstrap {
    fn layout(&self) -> &RuntimeLayout {
        &self.runtime.layout
    }

    fn program(&self) -> &str {
        &self.config.program
    }

    fn cleanup_legacy_certs(&mut self) -> Result<()> {
        for cert in self.layout().legacy_certs() {
            if fsutil::remove_if_exists(cert)? {
                info!(path = %cert.display(), "Removed legacy certificate");
            }
        }
        Ok(())
    }

    fn client_roles(&self) -> Vec<ClientRole<'_>> {
        let layout = self.layout();
        let program = self.program();
        let masters = || vec![SYSTEM_PRIVILEGED_GROUP.to_string()];
        vec![
            ClientRole {
                common_name: "system:admin".to_string(),
                organization: masters(),
                cert: &layout.client_admin,
                kubeconfig: &layout.kubeconfig_admin,
            },
            ClientRole {
                common_name: format!("system:{program}-supervisor"),
                organization: masters(),
                cert: &layout.client_supervisor,
                kubeconfig: &layout.kubeconfig_supervisor,
            },
            ClientRole {
                common_name: "system:kube-controller-manager".to_string(),
                organization: Vec::new(),
                cert: &layout.client_controller,
                kubeconfig: &layout.kubeconfig_controller,
            },
            ClientRole {
                common_name: "system:kube-scheduler".to_string(),
                organization: Vec::new(),
                cert: &layout.client_scheduler,
                kubeconfig: &layout.kubeconfig_scheduler,
            },
            ClientRole {
                common_name: "system:apiserver".to_string(),
                organization: masters(),
                cert: &layout.client_kube_api,
                kubeconfig: &layout.kubeconfig_api_server,
            },
            ClientRole {
                common_name: format!("{program}-cloud-controller-manager"),
                organization: Vec::new(),
                cert: &layout.client_cloud_controller,
                kubeconfig: &layout.kubeconfig_cloud_controller,
            },
        ]
    }

    fn gen_client_certs(&mut self) -> Result<()> {
        let layout = self.layout();
        let regen = ca::ensure_signing_ca(&format!("{}-client", self.program()), &layout.client_ca)?;
        ca::write_nochain(&layout.client_ca.cert, &layout.signing_client_ca)?;

        let factory = SigningFactory::client(&layout.client_ca, regen);
        for role in self.client_roles() {
            let issued = factory.issue(&role.common_name, &role.organization, role.cert)?;
            if issued || !role.kubeconfig.exists() {
                self.kubeconfigs.write(role.kubeconfig, role.cert)?;
            }
        }

        // Agents request these certificates later; only the keys live here
        for key in [
            &layout.client_kube_proxy.key,
            &layout.client_program_controller.key,
            &layout.client_kubelet_key,
        ] {
            keys::ensure_key(key, regen)?;
        }
        Ok(())
    }

    fn gen_server_certs(&mut self) -> Result<()> {
        let layout = self.layout();
        let regen = ca::ensure_server_ca(&format!("{}-server", self.program()), layout)?;

        let mut alt_names = AltNames::dns([
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            format!("kubernetes.default.svc.{}", self.config.cluster_domain),
        ]);
        alt_names.add_sans(&self.config.sans);
        SigningFactory::server(&layout.server_ca, regen, alt_names).issue(
            "kube-apiserver",
            &[],
            &layout.serving_kube_api,
        )?;

        keys::ensure_key(&layout.serving_kubelet_key, regen)?;

        let mut local = AltNames::default();
        local.add_sans(&["localhost".to_string(), "127.0.0.1".to_string(), "::1".to_string()]);
        let factory = SigningFactory::server(&layout.server_ca, regen, local);
        factory.issue("kube-scheduler", &[], &layout.serving_kube_scheduler)?;
        factory.issue("kube-controller-manager", &[], &layout.serving_kube_controller)?;
        Ok(())
    }

    fn gen_request_header_certs(&mut self) -> Result<()> {
        let layout = self.layout();
        let regen = ca::ensure_signing_ca(
            &format!("{}-request-header", self.program()),
            &layout.request_header_ca,
        )?;
        SigningFactory::client(&layout.request_header_ca, regen).issue(
            REQUEST_HEADER_CN,
            &[],
            &layout.client_auth_proxy,
        )?;
        Ok(())
    }

    fn gen_etcd_certs(&mut self) -> Result<()> {
        let layout = self.layout();
        let server_regen = ca::ensure_signing_ca("etcd-server", &layout.etcd_server_ca)?;

        let mut alt_names = AltNames::dns(["kine.sock"]);
        alt_names.add_sans(&self.config.sans);

        SigningFactory::client(&layout.etcd_server_ca, server_regen).issue(
            "etcd-client",
            &[],
            &layout.client_etcd,
        )?;

        let peer_regen = ca::ensure_signing_ca("etcd-peer", &layout.etcd_peer_ca)?;
        SigningFactory::peer(&layout.etcd_peer_ca, peer_regen, alt_names.clone()).issue(
            "etcd-peer",
            &[],
            &layout.peer_server_client_etcd,
        )?;

        if self.config.disable_etcd {
            debug!("Embedded etcd disabled, skipping etcd server certificate");
            return Ok(());
        }

        SigningFactory::peer(&layout.etcd_server_ca, server_regen, alt_names).issue(
            "etcd-server",
            &[],
            &layout.server_etcd,
        )?;
        Ok(())
    }

    fn gen_service_account(&mut self) -> Result<()> {
        let layout = self.layout();
        keys::ensure_service_account_key(&layout.service_key, &layout.service_current_key)?;
        Ok(())
    }

    fn server_pass(&self, passwd: &Passwd) -> String {
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            return token.to_string();
        }
        if let Some(stored) = passwd.pass("server") {
            return stored.to_string();
        }
        info!("No token supplied, generating server secret");
        token::generate_secret()
    }

    fn node_pass(&self, server_pass: &str) -> String {
        match self.config.agent_token.as_deref().filter(|t| !t.is_empty()) {
            Some(agent_token) => agent_token.to_string(),
            None => token::password_from_token(server_pass).to_string(),
        }
    }

    fn gen_users(&mut self) -> Result<()> {
        let path = self.layout().passwd_file.clone();
        let program = self.program().to_string();

        let mut passwd = Passwd::read(&path)?;
        passwd.migrate(&program)?;

        let server_pass = self.server_pass(&passwd);
        let node_pass = self.node_pass(&server_pass);
        passwd.ensure_user("node", &format!("{program}:agent"), &node_pass)?;
        passwd.ensure_user("server", &format!("{program}:server"), &server_pass)?;
        passwd.write(&path)?;
        Ok(())
    }

    fn gen_encrypted_network_info(&mut self) -> Result<()> {
        let path = self.layout().ipsec_key.clone();
        if fsutil::has_content(&path) {
            self.runtime.ipsec_psk = fsutil::read_to_string(&path)?.trim().to_string();
            return Ok(());
        }

        let psk = token::random_hex(IPSEC_KEY_SIZE);
        fsutil::atomic_write(&path, format!("{psk}\n").as_bytes())?;
        info!(path = %path.display(), "Generated network pre-shared key");
        self.runtime.ipsec_psk = psk;
        Ok(())
    }

    fn gen_encryption_config(&mut self) -> Result<()> {
        let layout = self.layout();
        match (&layout.encryption_config, &layout.encryption_hash) {
            (Some(config_path), Some(hash_path)) => {
                encryption::ensure_encryption_config(
                    self.config.encrypt_provider,
                    config_path,
                    hash_path,
                )?;
            }
            _ => debug!("Secrets encryption disabled"),
        }
        Ok(())
    }

    fn gen_egress_selector_config(&mut self) -> Result<()> {
        auxconfig::write_egress_selector_config(&self.config, self.layout())?;
        Ok(())
    }

    fn gen_cloud_config(&mut self) -> Result<()> {
        auxconfig::write_cloud_config(&self.config, self.layout())?;
        Ok(())
    }

    fn read_tokens(&mut self) -> Result<()> {
        let passwd = Passwd::read(&self.layout().passwd_file)?;
        self.runtime.agent_token = passwd.pass("node").map(|p| format!("node:{p}"));
        self.runtime.server_token = passwd.pass("server").map(|p| format!("server:{p}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::inspect;
    use crate::error::ErrorKind;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ControlConfig {
        ControlConfig::with_data_dir(dir.path().join("server"))
    }

    /// Path → (contents, mtime) for every file under `root`.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, (Vec<u8>, SystemTime)> {
        let mut files = BTreeMap::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let meta = std::fs::metadata(&path).unwrap();
                    files.insert(path.clone(), (std::fs::read(&path).unwrap(), meta.modified().unwrap()));
                }
            }
        }
        files
    }

    #[test]
    fn test_fresh_bootstrap() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runtime = gen_server_deps(&config).unwrap();
        let layout = &runtime.layout;

        for (_, authority) in layout.authorities() {
            let info = inspect::first_cert(&authority.cert).unwrap();
            assert!(info.is_ca);
            assert!(info.self_signed);
        }

        let admin = inspect::first_cert(&layout.client_admin.cert).unwrap();
        assert_eq!(admin.common_name, "system:admin");
        assert!(admin.organizations.contains(SYSTEM_PRIVILEGED_GROUP));
        assert!(layout.kubeconfig_admin.exists());
        assert!(layout.kubeconfig_cloud_controller.exists());

        let passwd = Passwd::read(&layout.passwd_file).unwrap();
        let server_pass = passwd.pass("server").unwrap();
        assert_eq!(server_pass.len(), 32);
        assert_eq!(passwd.pass("node"), Some(server_pass));
        assert_eq!(passwd.group("node"), Some("kubeseed:agent"));
        assert_eq!(runtime.server_token, Some(format!("server:{server_pass}")));
        assert_eq!(runtime.agent_token, Some(format!("node:{server_pass}")));

        let egress: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&layout.egress_selector_config).unwrap()).unwrap();
        assert_eq!(
            egress["egressSelections"][0]["connection"]["proxyProtocol"],
            "Direct"
        );

        let (encryption_config, encryption_hash) = layout.encryption_files();
        assert!(!encryption_config.exists());
        assert!(!encryption_hash.exists());

        assert_eq!(runtime.ipsec_psk.len(), 96);
        assert!(layout.service_current_key.exists());
        assert!(layout.client_kubelet_key.exists());
        assert!(layout.serving_kubelet_key.exists());
        assert!(!layout.client_kube_proxy.cert.exists());
    }

    #[test]
    fn test_second_run_rewrites_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.encrypt_secrets = true;
        config.egress_selector_mode = kubeseed_core::EgressSelectorMode::Cluster;
        config.sans = vec!["cp.example.com".to_string(), "10.0.0.10".to_string()];

        let first_runtime = gen_server_deps(&config).unwrap();
        let before = snapshot(&config.data_dir);

        let second_runtime = gen_server_deps(&config).unwrap();
        let after = snapshot(&config.data_dir);

        assert_eq!(before, after);
        assert_eq!(first_runtime.server_token, second_runtime.server_token);
        assert_eq!(first_runtime.ipsec_psk, second_runtime.ipsec_psk);
    }

    #[test]
    fn test_leaves_link_to_their_authority() {
        let dir = TempDir::new().unwrap();
        let runtime = gen_server_deps(&config(&dir)).unwrap();
        let layout = &runtime.layout;

        let pairs = [
            (&layout.client_ca, &layout.client_admin),
            (&layout.client_ca, &layout.client_supervisor),
            (&layout.client_ca, &layout.client_controller),
            (&layout.client_ca, &layout.client_scheduler),
            (&layout.client_ca, &layout.client_kube_api),
            (&layout.client_ca, &layout.client_cloud_controller),
            (&layout.server_ca, &layout.serving_kube_api),
            (&layout.server_ca, &layout.serving_kube_scheduler),
            (&layout.server_ca, &layout.serving_kube_controller),
            (&layout.request_header_ca, &layout.client_auth_proxy),
            (&layout.etcd_server_ca, &layout.client_etcd),
            (&layout.etcd_server_ca, &layout.server_etcd),
            (&layout.etcd_peer_ca, &layout.peer_server_client_etcd),
        ];
        for (authority, leaf) in pairs {
            let ca = inspect::first_cert(&authority.cert).unwrap();
            let cert = inspect::first_cert(&leaf.cert).unwrap();
            assert!(cert.authority_key_id.is_some(), "{}", leaf.cert.display());
            assert_eq!(cert.authority_key_id, ca.subject_key_id, "{}", leaf.cert.display());
        }
    }

    #[test]
    fn test_apiserver_names() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.sans = vec!["cp.example.com".to_string(), "10.0.0.10".to_string()];
        let runtime = gen_server_deps(&config).unwrap();

        let cert = inspect::first_cert(&runtime.layout.serving_kube_api.cert).unwrap();
        assert_eq!(cert.common_name, "kube-apiserver");
        for name in [
            "kubernetes",
            "kubernetes.default",
            "kubernetes.default.svc",
            "kubernetes.default.svc.cluster.local",
            "cp.example.com",
        ] {
            assert!(cert.dns_names.contains(name), "missing {name}");
        }
        assert!(cert.ip_addresses.contains(&"10.0.0.10".parse().unwrap()));

        let scheduler = inspect::first_cert(&runtime.layout.serving_kube_scheduler.cert).unwrap();
        assert!(scheduler.dns_names.contains("localhost"));
        assert!(scheduler.ip_addresses.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn test_added_san_reissues_only_affected_certs() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        let runtime = gen_server_deps(&config).unwrap();
        let layout = runtime.layout;
        let admin = std::fs::read(&layout.client_admin.cert).unwrap();
        let apiserver = std::fs::read(&layout.serving_kube_api.cert).unwrap();

        config.sans.push("new.example.com".to_string());
        gen_server_deps(&config).unwrap();

        assert_eq!(std::fs::read(&layout.client_admin.cert).unwrap(), admin);
        assert_ne!(std::fs::read(&layout.serving_kube_api.cert).unwrap(), apiserver);
        let cert = inspect::first_cert(&layout.serving_kube_api.cert).unwrap();
        assert!(cert.dns_names.contains("new.example.com"));
    }

    #[test]
    fn test_disable_etcd_skips_server_cert() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.disable_etcd = true;
        let runtime = gen_server_deps(&config).unwrap();

        assert!(runtime.layout.client_etcd.cert.exists());
        assert!(runtime.layout.peer_server_client_etcd.cert.exists());
        assert!(!runtime.layout.server_etcd.cert.exists());
    }

    #[test]
    fn test_supplied_tokens() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.token = Some("K10deadbeef::server:s3cret".to_string());
        let runtime = gen_server_deps(&config).unwrap();

        let passwd = Passwd::read(&runtime.layout.passwd_file).unwrap();
        assert_eq!(passwd.pass("server"), Some("K10deadbeef::server:s3cret"));
        assert_eq!(passwd.pass("node"), Some("s3cret"));
        assert_eq!(runtime.agent_token.as_deref(), Some("node:s3cret"));

        config.agent_token = Some("agentpass".to_string());
        let runtime = gen_server_deps(&config).unwrap();
        assert_eq!(runtime.agent_token.as_deref(), Some("node:agentpass"));
    }

    #[test]
    fn test_legacy_credentials_migrated_once() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = RuntimeLayout::new(&config);
        std::fs::create_dir_all(layout.cred_dir()).unwrap();
        std::fs::write(&layout.passwd_file, "legacysecret,node\n").unwrap();

        let runtime = gen_server_deps(&config).unwrap();
        assert_eq!(runtime.server_token.as_deref(), Some("server:legacysecret"));
        assert_eq!(runtime.agent_token.as_deref(), Some("node:legacysecret"));
        let migrated = std::fs::read(&layout.passwd_file).unwrap();
        assert_eq!(
            String::from_utf8(migrated.clone()).unwrap(),
            "legacysecret,node,node,kubeseed:agent\nlegacysecret,server,server,kubeseed:server\n"
        );

        gen_server_deps(&config).unwrap();
        assert_eq!(std::fs::read(&layout.passwd_file).unwrap(), migrated);
    }

    #[test]
    fn test_legacy_token_ca_signs_server_certs() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = RuntimeLayout::new(&config);
        ca::ensure_signing_ca("kubeseed-token", &layout.legacy_token_ca).unwrap();
        let legacy = inspect::first_cert(&layout.legacy_token_ca.cert).unwrap();

        gen_server_deps(&config).unwrap();
        let serving = inspect::first_cert(&layout.serving_kube_api.cert).unwrap();
        assert_eq!(serving.authority_key_id, legacy.subject_key_id);
        assert_eq!(
            std::fs::read(&layout.signing_server_ca).unwrap(),
            std::fs::read(&layout.legacy_token_ca.cert).unwrap()
        );
    }

    #[test]
    fn test_sec1_legacy_token_ca_signs_server_certs() {
        use p256::pkcs8::{DecodePrivateKey, LineEnding};

        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = RuntimeLayout::new(&config);
        std::fs::create_dir_all(layout.tls_dir()).unwrap();

        // Token CA as openssl writes it: SEC1 key behind an EC PARAMETERS block
        let key = keys::generate().unwrap();
        let root = ca::self_signed_root("kubeseed-token-ca", &key).unwrap();
        let root_der: &[u8] = root.der();
        std::fs::write(&layout.legacy_token_ca.cert, crate::crypto::bundle::encode_certs([root_der])).unwrap();
        let sec1 = p256::SecretKey::from_pkcs8_der(key.serialized_der())
            .unwrap()
            .to_sec1_pem(LineEnding::LF)
            .unwrap();
        let params = pem::Pem::new("EC PARAMETERS", vec![0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07]);
        std::fs::write(
            &layout.legacy_token_ca.key,
            format!("{}{}", pem::encode(&params), sec1.as_str()),
        )
        .unwrap();
        let legacy = inspect::first_cert(&layout.legacy_token_ca.cert).unwrap();

        gen_server_deps(&config).unwrap();
        let serving = inspect::first_cert(&layout.serving_kube_api.cert).unwrap();
        assert_eq!(serving.common_name, "kube-apiserver");
        assert_eq!(serving.authority_key_id, legacy.subject_key_id);
    }

    #[test]
    fn test_new_client_ca_replaces_agent_keys() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runtime = gen_server_deps(&config).unwrap();
        let layout = &runtime.layout;
        let agent_keys = [
            &layout.client_kube_proxy.key,
            &layout.client_program_controller.key,
            &layout.client_kubelet_key,
        ];
        let before: Vec<Vec<u8>> = agent_keys.iter().map(|k| std::fs::read(k).unwrap()).collect();

        std::fs::remove_file(&layout.client_ca.cert).unwrap();
        std::fs::remove_file(&layout.client_ca.key).unwrap();
        gen_server_deps(&config).unwrap();

        for (path, old) in agent_keys.iter().zip(&before) {
            assert_ne!(&std::fs::read(path).unwrap(), old, "{}", path.display());
        }
        let ca = inspect::first_cert(&layout.client_ca.cert).unwrap();
        let admin = inspect::first_cert(&layout.client_admin.cert).unwrap();
        assert_eq!(admin.authority_key_id, ca.subject_key_id);
    }

    #[test]
    fn test_encryption_bootstrap() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.encrypt_secrets = true;
        config.encrypt_provider = kubeseed_core::EncryptionProvider::SecretBox;
        let runtime = gen_server_deps(&config).unwrap();

        let status = encryption::status(&runtime.layout).unwrap();
        assert!(status.configured);
        assert_eq!(status.provider.as_deref(), Some("secretbox"));
        assert_eq!(status.stage.as_deref(), Some("start"));
        assert!(status.hash_matches);
    }

    #[test]
    fn test_legacy_certs_removed_keys_kept() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let layout = RuntimeLayout::new(&config);
        std::fs::create_dir_all(layout.tls_dir()).unwrap();
        std::fs::write(&layout.client_kube_proxy.cert, "old").unwrap();
        std::fs::write(&layout.client_program_controller.cert, "old").unwrap();

        gen_server_deps(&config).unwrap();
        assert!(!layout.client_kube_proxy.cert.exists());
        assert!(!layout.client_program_controller.cert.exists());
        assert!(layout.client_kube_proxy.key.exists());
        assert!(layout.client_program_controller.key.exists());
    }

    #[test]
    fn test_invalid_config_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.bind_address = Some("not-an-ip".to_string());

        let err = gen_server_deps(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!config.data_dir.exists());
    }

    #[test]
    fn test_deleted_kubeconfig_restored() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let runtime = gen_server_deps(&config).unwrap();
        let admin_cert = std::fs::read(&runtime.layout.client_admin.cert).unwrap();
        std::fs::remove_file(&runtime.layout.kubeconfig_admin).unwrap();

        gen_server_deps(&config).unwrap();
        assert!(runtime.layout.kubeconfig_admin.exists());
        assert_eq!(std::fs::read(&runtime.layout.client_admin.cert).unwrap(), admin_cert);
    }
}
