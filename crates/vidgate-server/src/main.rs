use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidgate_server::{config::Config, create_app, ingest};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidgate_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting vidgate...");

    let config = Config::load()?;
    let (router, state) = create_app(config.clone());

    // Ingest: raw H.264 Annex-B over UDP, typically from ffmpeg.
    let udp_socket = tokio::net::UdpSocket::bind(config.udp_addr()).await?;
    tracing::info!(addr = %config.udp_addr(), "UDP ingest listening");
    let ingest_task = tokio::spawn(ingest::run(udp_socket, state.media.clone()));

    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    tracing::info!(addr = %config.http_addr(), "signaling listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    // Close every peer before exit.
    ingest_task.abort();
    state.media.shutdown().await;
    tracing::info!("vidgate stopped");

    Ok(())
}
