//! Kubeseed CLI - Administrative commands for control plane credentials.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kubeseed_control_plane::admin::{self, CertificateStatus};
use kubeseed_control_plane::crypto::token;
use kubeseed_control_plane::{encryption, fsutil, gen_server_deps, ConfigArgs};
use kubeseed_core::RuntimeLayout;

/// Kubeseed CLI - Control plane credential management tool
#[derive(Parser)]
#[command(name = "kubeseed")]
#[command(about = "Manage kubeseed control plane credentials", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Certificate management
    #[command(subcommand)]
    Cert(CertCommands),

    /// Join token management
    #[command(subcommand)]
    Token(TokenCommands),

    /// Secrets encryption management
    #[command(name = "secrets-encrypt", subcommand)]
    SecretsEncrypt(SecretsEncryptCommands),

    /// Generate every missing or outdated credential
    Bootstrap,
}

#[derive(Subcommand)]
enum CertCommands {
    /// List certificates and their expiry
    Check {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Remove leaf certificates so the next bootstrap reissues them
    Rotate {
        /// Service to rotate; repeat for several, omit for all
        #[arg(short, long)]
        service: Vec<String>,
    },

    /// Install replacement certificate authorities
    RotateCa {
        /// Directory laid out like tls/ holding the new CA certificates and keys
        #[arg(long)]
        path: PathBuf,

        /// Replace authorities even if existing certificates stop verifying
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Print a new random token
    Generate {
        /// Print a full token pinned to the server CA
        #[arg(long)]
        full: bool,
    },

    /// Replace the server token in the credential table
    Rotate {
        /// New token; a random one is generated when omitted
        #[arg(long)]
        new_token: Option<String>,
    },
}

#[derive(Subcommand)]
enum SecretsEncryptCommands {
    /// Show the secrets encryption state
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays parseable
    let default_level = if cli.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.config.resolve()?;
    config.validate()?;
    let layout = RuntimeLayout::new(&config);

    match cli.command {
        Commands::Cert(CertCommands::Check { output }) => {
            check_certs(&layout, output)?;
        }
        Commands::Cert(CertCommands::Rotate { service }) => {
            rotate_certs(&layout, &service)?;
        }
        Commands::Cert(CertCommands::RotateCa { path, force }) => {
            rotate_ca(&layout, &path, force)?;
        }
        Commands::Token(TokenCommands::Generate { full }) => {
            generate_token(&layout, full)?;
        }
        Commands::Token(TokenCommands::Rotate { new_token }) => {
            rotate_token(&layout, &config.program, new_token.as_deref())?;
        }
        Commands::SecretsEncrypt(SecretsEncryptCommands::Status { output }) => {
            encrypt_status(&layout, output)?;
        }
        Commands::Bootstrap => {
            let runtime = gen_server_deps(&config)?;
            println!("Credentials ready in {}", runtime.layout.data_dir.display());
            println!("  Admin kubeconfig: {}", runtime.layout.kubeconfig_admin.display());
            println!("  Server CA:        {}", runtime.layout.server_ca.cert.display());
        }
    }

    Ok(())
}

fn check_certs(layout: &RuntimeLayout, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let report = admin::check_certificates(layout, chrono::Utc::now());

    if let OutputFormat::Json = output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Certificates ({}):", report.len());
    println!(
        "{:<20}  {:<44}  {:<19}  {:>5}  {}",
        "SERVICE", "COMMON NAME", "NOT AFTER", "DAYS", "STATUS"
    );
    println!("{}", "-".repeat(104));

    for status in &report {
        println!(
            "{:<20}  {:<44}  {:<19}  {:>5}  {}",
            status.service,
            status.common_name.as_deref().unwrap_or("-"),
            status
                .not_after
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            status
                .days_remaining
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status_label(status),
        );
    }

    Ok(())
}

fn status_label(status: &CertificateStatus) -> String {
    match (&status.error, status.days_remaining) {
        (Some(err), _) => format!("ERROR: {}", err),
        (None, Some(days)) if days < 0 => "EXPIRED".to_string(),
        _ if status.renewal_due => "RENEW".to_string(),
        _ if status.is_ca => "OK (CA)".to_string(),
        _ => "OK".to_string(),
    }
}

fn rotate_certs(layout: &RuntimeLayout, services: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let removed = admin::rotate_certificates(layout, services)?;

    if removed.is_empty() {
        println!("No certificate files to rotate");
        return Ok(());
    }

    println!("Removed {} files:", removed.len());
    for path in &removed {
        println!("  {}", path.display());
    }
    println!("Run 'kubeseed bootstrap' or restart the server to reissue them");

    Ok(())
}

fn rotate_ca(layout: &RuntimeLayout, path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rotated = admin::rotate_ca(layout, path, force)?;

    println!("Installed {} certificate authorities: {}", rotated.len(), rotated.join(", "));
    println!("Run 'kubeseed bootstrap' or restart the server to reissue leaf certificates");

    Ok(())
}

fn generate_token(layout: &RuntimeLayout, full: bool) -> Result<(), Box<dyn std::error::Error>> {
    let secret = token::generate_secret();

    if full {
        let server_ca = fsutil::read(&layout.server_ca.cert)?;
        println!("{}", token::format_full_token(&server_ca, "server", &secret));
    } else {
        println!("{}", secret);
    }

    Ok(())
}

fn rotate_token(
    layout: &RuntimeLayout,
    program: &str,
    new_token: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let rotation = admin::rotate_server_token(layout, program, new_token)?;
    let secret = token::password_from_token(&rotation.server_pass);

    match fsutil::read(&layout.server_ca.cert) {
        Ok(server_ca) => println!("{}", token::format_full_token(&server_ca, "server", secret)),
        Err(_) => println!("{}", secret),
    }
    if rotation.node_updated {
        eprintln!("Agent token changed with the server token");
    }
    eprintln!("Update any configured --token before the next bootstrap");

    Ok(())
}

fn encrypt_status(layout: &RuntimeLayout, output: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let status = encryption::status(layout)?;

    if let OutputFormat::Json = output {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if !status.configured {
        println!("Encryption Status: Disabled");
        return Ok(());
    }

    println!("Encryption Status: Enabled");
    println!("  Provider:    {}", status.provider.as_deref().unwrap_or("identity"));
    println!("  Keys:        {}", status.key_names.join(", "));
    println!("  Stage:       {}", status.stage.as_deref().unwrap_or("unknown"));
    println!(
        "  Hash:        {}",
        if status.hash_matches { "matches" } else { "does not match" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "kubeseed",
            "cert",
            "rotate-ca",
            "--path",
            "/tmp/new-ca",
            "--data-dir",
            "/srv/kubeseed",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Cert(CertCommands::RotateCa { ref path, force: false }) if path == Path::new("/tmp/new-ca")
        ));
        assert_eq!(cli.config.resolve().unwrap().data_dir, PathBuf::from("/srv/kubeseed"));
    }

    #[test]
    fn test_token_rotate_parses() {
        let cli = Cli::try_parse_from(["kubeseed", "token", "rotate", "--new-token", "abc", "-d", "/srv/x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Token(TokenCommands::Rotate { new_token: Some(ref t) }) if t == "abc"
        ));
        assert_eq!(cli.config.data_dir, Some(PathBuf::from("/srv/x")));
    }
}
