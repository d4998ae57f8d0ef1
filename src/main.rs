use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden_loader::config::Overrides;
use warden_loader::{Config, Daemon, HostContext};

/// Warden - dynamic plugin execution host
#[derive(Parser)]
#[command(name = "warden-loader", version, about)]
struct Cli {
    /// Plugin library or directory of libraries to load at startup
    #[arg(long, env = "WARDEN_PLUGIN_PATH")]
    plugins: Option<PathBuf>,

    /// Shared secret controllers must present
    #[arg(long, env = "WARDEN_OWNER_KEY", hide_env_values = true)]
    owner_key: Option<String>,

    /// Port to listen on for controllers
    #[arg(long, env = "WARDEN_PORT")]
    port: Option<u16>,

    /// Address to listen on for controllers
    #[arg(long, env = "WARDEN_ADDRESS")]
    address: Option<IpAddr>,

    /// Config file (defaults to ~/.config/warden/loader.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,warden_loader=info",
        1 => "info,warden_loader=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(Overrides {
        plugin_path: cli.plugins,
        owner_key: cli.owner_key,
        address: cli.address,
        port: cli.port,
        config_file: cli.config,
    })?;
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        plugins = %config.plugin_path.display(),
        addr = %config.server.socket_addr(),
        "starting warden loader"
    );

    let ctx = HostContext::new(config)?;
    let daemon = Daemon::bind(ctx).await?;

    // Run until killed
    daemon.run().await?;

    Ok(())
}
