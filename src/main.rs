use anyhow::Result;
use stepcheck::{AppState, ProxyConfig, build_router};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ProxyConfig::load();

    info!(
        "Starting stepcheck proxy v{} (model {})",
        env!("CARGO_PKG_VERSION"),
        config.model
    );
    if config.api_key().is_none() {
        warn!("GEMINI_API_KEY is not set; verification requests will fail with 500");
    }
    if config.require_auth {
        info!("Bearer token required for verification requests");
    }

    let bind = config.bind;
    let route = config.route.clone();
    let app = build_router(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on http://{}{}", listener.local_addr()?, route);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
