use std::sync::Arc;

use analysis_coordinator::{api, engine::HttpEngineClient, AnalysisService, Config};
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analysis_coordinator=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let engine = Arc::new(HttpEngineClient::new(
        config.engine_url.clone(),
        config.engine_token.clone(),
    ));

    let service = Arc::new(AnalysisService::new(config.clone(), engine));
    service.attach_listener();
    service.spawn_workers();

    let app = api::router(service.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        engine = %config.engine_url,
        chunk_limit = config.chunk_cache_limit,
        overview_limit = config.overview_cache_limit,
        "analysis-coordinator listening on {}",
        config.bind_addr
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.shutdown();
    Ok(())
}
