//! Command line flags shared by the binaries.

use std::path::PathBuf;

use clap::Args;

use kubeseed_core::{ConfigError, ControlConfig, EgressSelectorMode, EncryptionProvider};

/// Configuration flags. A `--config` file is loaded first; flags given on the
/// command line override it. Every flag is global, so it may follow a
/// subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for generated credentials
    #[arg(long, short = 'd', global = true)]
    pub data_dir: Option<PathBuf>,

    /// Artifact naming prefix
    #[arg(long, global = true)]
    pub program: Option<String>,

    /// Additional hostname or IP address for the apiserver certificate
    #[arg(long = "tls-san", global = true)]
    pub tls_san: Vec<String>,

    /// Cluster DNS domain
    #[arg(long, global = true)]
    pub cluster_domain: Option<String>,

    /// Address the control plane binds to
    #[arg(long, global = true)]
    pub bind_address: Option<String>,

    /// Shared secret used to join servers and agents
    #[arg(long, short = 't', global = true)]
    pub token: Option<String>,

    /// Shared secret used to join agents
    #[arg(long, global = true)]
    pub agent_token: Option<String>,

    /// Encrypt secrets at rest
    #[arg(long, global = true)]
    pub encrypt_secrets: bool,

    /// Encryption provider (aescbc or secretbox)
    #[arg(long, global = true)]
    pub encrypt_provider: Option<EncryptionProvider>,

    /// Egress selector mode (disabled, agent, pod or cluster)
    #[arg(long, global = true)]
    pub egress_selector_mode: Option<EgressSelectorMode>,

    /// Do not generate the embedded etcd server certificate
    #[arg(long, global = true)]
    pub disable_etcd: bool,
}

impl ConfigArgs {
    /// Build the effective configuration.
    pub fn resolve(&self) -> Result<ControlConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ControlConfig::load_from_file(path)?,
            None => ControlConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(program) = &self.program {
            config.program = program.clone();
        }
        config.sans.extend(self.tls_san.iter().cloned());
        if let Some(domain) = &self.cluster_domain {
            config.cluster_domain = domain.clone();
        }
        if let Some(addr) = &self.bind_address {
            config.bind_address = Some(addr.clone());
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(token) = &self.agent_token {
            config.agent_token = Some(token.clone());
        }
        config.encrypt_secrets |= self.encrypt_secrets;
        if let Some(provider) = self.encrypt_provider {
            config.encrypt_provider = provider;
        }
        if let Some(mode) = self.egress_selector_mode {
            config.egress_selector_mode = mode;
        }
        config.disable_etcd |= self.disable_etcd;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConfigArgs,
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(
            &file,
            r#"{"data-dir": "/srv/a", "sans": ["a.example"], "encrypt-provider": "secretbox"}"#,
        )
        .unwrap();

        let cli = TestCli::parse_from([
            "test",
            "--config",
            file.to_str().unwrap(),
            "--data-dir",
            "/srv/b",
            "--tls-san",
            "b.example",
            "--egress-selector-mode",
            "pod",
        ]);
        let config = cli.args.resolve().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/b"));
        assert_eq!(config.sans, vec!["a.example", "b.example"]);
        assert_eq!(config.encrypt_provider, EncryptionProvider::SecretBox);
        assert_eq!(config.egress_selector_mode, EgressSelectorMode::Pod);
    }

    #[derive(Parser)]
    struct TestCliWithCommand {
        #[command(flatten)]
        args: ConfigArgs,

        #[command(subcommand)]
        command: TestCommand,
    }

    #[derive(clap::Subcommand)]
    enum TestCommand {
        Check,
    }

    #[test]
    fn test_flags_accepted_after_subcommand() {
        let cli = TestCliWithCommand::parse_from([
            "test",
            "--program",
            "edge",
            "check",
            "--data-dir",
            "/srv/c",
            "--tls-san",
            "c.example",
        ]);
        assert!(matches!(cli.command, TestCommand::Check));

        let config = cli.args.resolve().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/c"));
        assert_eq!(config.program, "edge");
        assert_eq!(config.sans, vec!["c.example"]);
    }

    #[test]
    fn test_bad_provider_flag_rejected() {
        let result = TestCli::try_parse_from(["test", "--encrypt-provider", "kms"]);
        assert!(result.is_err());
    }
}
