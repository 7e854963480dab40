use anyhow::{Context, Result};
use post_translations::config::Config;
use post_translations::db::Database;
use post_translations::provider::PtcClient;
use post_translations::scheduler::LogReporter;
use post_translations::server::{self, AppState};
use post_translations::service::{ServiceSettings, TranslationService};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("post_translations=info".parse()?),
        )
        .init();

    info!("Starting post translation service");

    let config = Config::from_env()?;
    info!(
        "Source locale: {}, targets: {}",
        config.locales.source(),
        config
            .target_locales
            .iter()
            .map(|l| l.code())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "Completion signals: callbacks={}, polling={} ({} checks every {}s)",
        config.callbacks_enabled,
        config.polling_enabled,
        config.poll_max_attempts,
        config.poll_interval.as_secs()
    );

    let provider = PtcClient::new(
        &config.ptc_api_url,
        &config.ptc_api_token,
        config.provider_timeout,
    )
    .context("Failed to build translation provider client")?;

    let db = Database::new(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let service = Arc::new(TranslationService::new(
        ServiceSettings::from_config(&config),
        Arc::new(provider),
        Arc::new(db.item_store()),
        Arc::new(db.request_store()),
        Arc::new(LogReporter),
    ));

    match service.resume_in_flight().await {
        Ok(0) => {}
        Ok(n) => info!("Resumed polling for {} in-flight translations", n),
        Err(e) => warn!("Could not resume in-flight translations: {}", e),
    }

    let app = server::router(AppState {
        service: Arc::clone(&service),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
