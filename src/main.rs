use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use translation_sync::server::{self, AppState};
use translation_sync::{Config, TranslationClient, TranslationService};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_sync=info".parse()?),
        )
        .init();

    info!("Starting translation sync service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Translation API at {} (project {}), {} requests per {:?}, cache ttl {:?}",
        config.api_url,
        config.project_id,
        config.rate_limit.max_requests,
        config.rate_limit.window,
        config.cache_ttl
    );

    let client = Arc::new(
        TranslationClient::from_config(&config).context("Failed to create translation client")?,
    );
    let service = TranslationService::new(client, &config);

    if config.admin_api_key.is_none() {
        info!("ADMIN_API_KEY not set, admin routes are unauthenticated");
    }

    let state = Arc::new(AppState {
        service,
        admin_api_key: config.admin_api_key.clone(),
    });
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Listening on port {}", config.port);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
