use std::sync::Arc;

use anyhow::Result;
use lintai_job_tracker::{
    api, config::Config, engine::JobEngine, events::EventBroadcaster,
    lintai_client::LintaiClient, transport::Collaborators, AppState,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lintai_job_tracker=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let client = Arc::new(LintaiClient::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.request_timeout_seconds,
    ));

    let events = EventBroadcaster::new(config.event_capacity);
    let engine = JobEngine::new(
        config.engine_settings(),
        Collaborators::from_client(client),
        Arc::new(events.clone()),
        Arc::new(events.clone()),
    );

    let state = AppState {
        engine: engine.clone(),
        events,
    };

    let app = api::router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        api = %config.api_base_url,
        poll_interval_ms = config.poll_interval_ms,
        retry_limit = config.retry_limit,
        "lintai-job-tracker listening on {}",
        config.bind_addr
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    info!("lintai-job-tracker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {err}");
    }
}
