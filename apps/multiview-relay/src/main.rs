use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use multiview_relay::channel::{HEARTBEAT_CHECK_INTERVAL, HEARTBEAT_TIMEOUT};
use multiview_relay::cli::{run_inspect, Cli, Commands};
use multiview_relay::{build_directory, build_router, metrics, telemetry};
use multiview_relay::{AppState, ChannelHub, Config, TokenIssuer};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::DEFAULT_FILTER);

    let cli = Cli::parse();
    let port_override = match cli.command {
        Some(Commands::Inspect { code, url }) => return run_inspect(&url, &code).await,
        Some(Commands::Serve { port }) => port,
        None => None,
    };

    let mut config = Config::from_env();
    if let Some(port) = port_override {
        config.port = port;
    }
    serve(config).await
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting multiview relay on port {}", config.port);
    info!("Session TTL: {} seconds", config.session_ttl_seconds);

    metrics::init();
    let (directory, sweeper) = build_directory(&config)
        .await
        .context("failed to open session directory")?;

    let tokens = match &config.token_secret {
        Some(secret) => TokenIssuer::new(secret.as_bytes(), config.token_ttl()),
        None => {
            warn!("MULTIVIEW_TOKEN_SECRET not set; using a per-process secret");
            TokenIssuer::ephemeral(config.token_ttl())
        }
    };

    let channels = ChannelHub::new();
    let monitor = channels.spawn_heartbeat_monitor(HEARTBEAT_CHECK_INTERVAL, HEARTBEAT_TIMEOUT);

    let app = build_router(AppState {
        directory,
        tokens,
        channels,
        code_attempts: config.code_attempts,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("multiview relay listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await;

    monitor.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    served.context("relay server failed")
}
