use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xregistry_bridge::bridge::{BridgeState, health, initializer};
use xregistry_bridge::config::Config;
use xregistry_bridge::web::WebServer;

/// Exit codes from the deployment contract.
const EXIT_NO_DOWNSTREAM: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_SIGINT: i32 = 130;

#[derive(Parser)]
#[command(name = "xregistry-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read-only xRegistry aggregation bridge over package-registry backends")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("xregistry_bridge={},tower_http=info", cli.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .init();

    info!("starting xregistry-bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    let state = match BridgeState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    info!(
        downstreams = state.downstreams().len(),
        group_types = ?state.group_types(),
        "downstream table built"
    );

    let web_server = WebServer::new(state.clone())?;
    info!("binding {}:{}", web_server.host(), web_server.port());

    // Bind before initialization so /health answers while probes run.
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = web_server.serve_with_signal(ready_tx).await {
            error!("web server failed: {e}");
        }
    });

    match ready_rx.await {
        Ok(Ok(())) => info!("listening, probing downstreams"),
        Ok(Err(bind_error)) => {
            error!("{bind_error}");
            return Err(bind_error);
        }
        Err(_) => {
            error!("web server task exited without signalling");
            return Err(anyhow::anyhow!("web server failed to start"));
        }
    }

    let outcome = initializer::initialize_all(&state).await;
    if !outcome.any_initialized() {
        error!(
            total = outcome.total,
            "no downstream initialized within the budget"
        );
        state.cancel.cancel();
        let _ = server_handle.await;
        std::process::exit(EXIT_NO_DOWNSTREAM);
    }
    info!(
        initialized = outcome.initialized,
        total = outcome.total,
        "bridge is serving"
    );

    let monitor_handle = health::spawn_monitor(state.clone());

    // Serve until SIGINT, then drain gracefully.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, draining");
            state.cancel.cancel();
            let _ = server_handle.await;
            monitor_handle.abort();
            std::process::exit(EXIT_SIGINT);
        }
        _ = &mut server_handle => {
            monitor_handle.abort();
        }
    }

    Ok(())
}
