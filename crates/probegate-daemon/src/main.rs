//! probegate-daemon binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use probegate_daemon::bridge::auth::ProbeAuthenticator;
use probegate_daemon::bridge::{ProbeBridge, TcpBridge, WsBridge};
use probegate_daemon::cluster::{BackendRegistry, ClusterConnection};
use probegate_daemon::config::GatewayConfig;
use probegate_daemon::metrics::{metrics_router, MetricsRegistry};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Probe connection gateway for the probegate live-debugging platform.
#[derive(Debug, Parser)]
#[command(name = "probegate-daemon", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listener address (host:port).
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Override the metrics/health server address (host:port).
    #[arg(long, value_name = "ADDR")]
    metrics_listen: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => GatewayConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.gateway.listen = listen.clone();
        }
        if let Some(metrics_listen) = &self.metrics_listen {
            config.gateway.metrics_listen = Some(metrics_listen.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let context = ClusterConnection::establish(&config, &BackendRegistry::new())
        .await
        .context("failed to establish cluster context")?;

    let metrics = MetricsRegistry::new().context("failed to register metrics")?;
    let bridge = Arc::new(ProbeBridge::new(
        context.bus(),
        context.storage(),
        ProbeAuthenticator::from_config(&config.auth),
        metrics.gateway(),
    ));
    let _bookkeeping = bridge.start();

    let server = context.server();
    server.add_use(
        Arc::new(TcpBridge::new(Arc::clone(&bridge))),
        TcpBridge::sniffer(),
    );
    server.add_use(
        Arc::new(WsBridge::new(Arc::clone(&bridge), &config.gateway.ws_path)),
        WsBridge::sniffer(&config.gateway.ws_path),
    );

    let listen = server
        .local_addr()
        .context("listener has no local address")?;
    info!(
        %listen,
        ws_path = %config.gateway.ws_path,
        clustered = context.is_clustered(),
        "probe gateway listening"
    );
    let listener = tokio::spawn(Arc::clone(&server).run());

    if let Some(addr) = &config.gateway.metrics_listen {
        let router = metrics_router(metrics.clone());
        let tcp = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server on {addr}"))?;
        info!(metrics_listen = %addr, "metrics server listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(tcp, router).await {
                error!(%err, "metrics server failed");
            }
        });
    }

    shutdown_signal().await?;
    info!("shutdown signal received, stopping gateway");
    listener.abort();
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}
