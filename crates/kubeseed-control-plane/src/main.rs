//! Kubeseed control plane bootstrap

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kubeseed_control_plane::{gen_server_deps, ConfigArgs};

#[derive(Parser)]
#[command(name = "kubeseed-control-plane")]
#[command(about = "Generate control plane credentials and configuration")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.config.resolve()?;
    info!(
        data_dir = %config.data_dir.display(),
        program = %config.program,
        "Starting credential bootstrap"
    );

    let runtime = match gen_server_deps(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Credential bootstrap failed");
            return Err(e.into());
        }
    };

    info!(
        admin_kubeconfig = %runtime.layout.kubeconfig_admin.display(),
        server_ca = %runtime.layout.server_ca.cert.display(),
        agent_token = runtime.agent_token.is_some(),
        server_token = runtime.server_token.is_some(),
        "Control plane credentials ready"
    );

    Ok(())
}
