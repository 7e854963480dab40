use crate::callback::receive_callback;
use crate::error::TranslationError;
use crate::item::ItemId;
use crate::metrics::MetricsReport;
use crate::service::TranslationService;
use crate::tracker::TranslationRequest;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranslationService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/posts/:item_id/callback", post(receive_callback))
        .route("/api/posts/:item_id/translations", post(submit_translation))
        .route("/api/translations/:request_id", get(get_translation))
        .route("/api/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for TranslationError {
    fn into_response(self) -> Response {
        let status = match &self {
            TranslationError::ItemNotFound(_) | TranslationError::RequestNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TranslationError::ProviderUnavailable(_)
            | TranslationError::ProviderRejected { .. }
            | TranslationError::ProviderJobFailed(_) => StatusCode::BAD_GATEWAY,
            TranslationError::InvalidLocale(_) => StatusCode::BAD_REQUEST,
            TranslationError::Persistence(_) | TranslationError::MaxAttemptsExceeded { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health_check() -> &'static str {
    "OK"
}

/// Submit a post for translation on demand
async fn submit_translation(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
) -> Result<(StatusCode, Json<serde_json::Value>), TranslationError> {
    let request = state.service.submit_item(item_id).await.inspect_err(|e| {
        warn!("On-demand translation of post {} failed: {}", item_id, e);
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "request_id": request.request_id,
            "status": request.status,
        })),
    ))
}

async fn get_translation(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<TranslationRequest>, TranslationError> {
    Ok(Json(state.service.request(&request_id).await?))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(state.service.metrics().report())
}
