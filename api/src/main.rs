use anyhow::Context;
use essayist_api::{config::Config, router, telemetry, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let state = AppState::from_config(&config).context("failed to open database")?;
    if config.feed_url.is_none() {
        tracing::info!("FEED_URL not set, external feed disabled");
    }

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "API server listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
