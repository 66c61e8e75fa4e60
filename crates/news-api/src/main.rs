mod routes;

use news_core::config::Config;
use routes::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        has_database = config.database_path.is_some(),
        commit_mode = ?config.pipeline.commit_mode,
        dedup_policy = ?config.pipeline.dedup_policy,
        "Configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("PressFreedomMonitor/1.0")
        .build()?;

    let state = AppState {
        config: Arc::new(config),
        http,
    };

    lambda_http::run(routes::router(state)).await
}
