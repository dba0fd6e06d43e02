use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kiln_config::{KilnConfig, RemoteConfig, CONFIG_ENV_VAR};
use kiln_remote::tcp::{TcpRemote, TcpRemoteConfig};
use kiln_remote::{Offline, RemoteConnection};

/// Kiln debug adapter: DAP over stdio, bridged to a running script host.
#[derive(Debug, Parser)]
#[command(name = "kiln-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `KILN_CONFIG` is used as a fallback. When neither are provided
    /// the adapter uses in-memory defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `host:port` of the script host's debug endpoint (overrides `remote.address`).
    #[arg(long)]
    remote: Option<String>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config);
    if let Some(address) = cli.remote {
        config.remote.address = address;
    }
    kiln_dap::hardening::init(&config);

    let remote: Arc<dyn RemoteConnection> =
        match TcpRemote::connect(&config.remote.address, tcp_config(&config.remote)).await {
            Ok(remote) => Arc::new(remote),
            Err(err) => {
                // Requests needing the host fail with "not connected" instead.
                tracing::error!(
                    target: "kiln.dap",
                    address = %config.remote.address,
                    error = %err,
                    "failed to connect to script host"
                );
                Arc::new(Offline::default())
            }
        };

    kiln_dap::server::run_stdio(remote, &config.bridge).await
}

fn tcp_config(remote: &RemoteConfig) -> TcpRemoteConfig {
    TcpRemoteConfig {
        connect_timeout: remote.connect_timeout(),
        request_timeout: remote.request_timeout(),
        max_frame_bytes: remote.max_frame_bytes,
        event_channel_size: remote.event_channel_size,
    }
}

fn load_config(cli_path: Option<PathBuf>) -> KilnConfig {
    let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    let Some(path) = path else {
        return KilnConfig::default();
    };

    match KilnConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "kiln-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            KilnConfig::default()
        }
    }
}
