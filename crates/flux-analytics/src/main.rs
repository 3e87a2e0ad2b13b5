use anyhow::Context;
use clap::Parser;
use flux_analytics::{create_router, ControlPlane, PipelineBuilder, SignalHandler};
use flux_config::{ConfigLoader, LoggingConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PIPELINE_STOP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let app = ConfigLoader::new(&args.config)
        .with_env_prefix("FLUX")
        .load()
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    init_tracing(&app.logging);
    tracing::info!("Starting flux-analyticsd with config: {}", args.config);

    if let Some(listen) = app.metrics.listen.as_deref() {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("Invalid metrics.listen address: {}", listen))?;
        flux_analytics::metrics::init_metrics(addr)?;
    }

    let addr = format!("{}:{}", app.server.host, app.server.port);
    let pipeline = Arc::new(PipelineBuilder::new(app).start().await?);
    let router = create_router(ControlPlane::new(pipeline.clone()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("HTTP server listening on http://{}", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);

    let (signals, mut shutdown_rx) = SignalHandler::new();
    tokio::spawn(async move {
        if let Err(e) = signals.wait_for_system_signal().await {
            tracing::error!(error = %e, "Failed to install signal handlers, shutting down");
            signals.trigger_shutdown();
        }
    });

    let hub = pipeline.hub().clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            // 先关闭广播中心，让 WebSocket 连接结束
            hub.shutdown();
        })
        .await
        .context("HTTP server error")?;

    if tokio::time::timeout(PIPELINE_STOP_TIMEOUT, pipeline.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(timeout = ?PIPELINE_STOP_TIMEOUT, "Pipeline did not stop in time");
    }

    tracing::info!("flux-analyticsd stopped");
    Ok(())
}
