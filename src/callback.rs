//! Webhook endpoint the provider calls when a translation job finishes.
//!
//! The provider only gets a status code back. Once a request id is known
//! the answer is always `200 OK`, whatever happened internally; failures
//! are logged instead.

use crate::applier::ApplyOutcome;
use crate::item::ItemId;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Form,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Job id as sent by the provider, which may be a string or a number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    pub fn into_string(self) -> String {
        match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

/// Notification fields. Only `id` is used; the rest are informational.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackPayload {
    pub id: Option<WireId>,
    pub status: Option<String>,
    pub translations_url: Option<String>,
}

impl CallbackPayload {
    /// Fields from the JSON body take precedence over the query string
    fn merge(self, other: CallbackPayload) -> CallbackPayload {
        CallbackPayload {
            id: self.id.or(other.id),
            status: self.status.or(other.status),
            translations_url: self.translations_url.or(other.translations_url),
        }
    }
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.trim_start()
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

/// Read the payload from a form-encoded or JSON body. An empty or
/// unreadable body yields an empty payload.
async fn payload_from_body(item_id: ItemId, request: Request) -> CallbackPayload {
    if is_form(&request) {
        return match Form::<CallbackPayload>::from_request(request, &()).await {
            Ok(Form(payload)) => payload,
            Err(e) => {
                warn!("Ignoring unparseable callback form for post {}: {}", item_id, e);
                CallbackPayload::default()
            }
        };
    }

    let body = match Bytes::from_request(request, &()).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not read callback body for post {}: {}", item_id, e);
            return CallbackPayload::default();
        }
    };
    if body.is_empty() {
        return CallbackPayload::default();
    }
    serde_json::from_slice::<CallbackPayload>(&body).unwrap_or_else(|e| {
        warn!("Ignoring unparseable callback body for post {}: {}", item_id, e);
        CallbackPayload::default()
    })
}

/// `POST /api/posts/:item_id/callback`
pub async fn receive_callback(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
    Query(query): Query<CallbackPayload>,
    request: Request,
) -> StatusCode {
    let payload = payload_from_body(item_id, request).await.merge(query);

    let request_id = match payload
        .id
        .map(WireId::into_string)
        .filter(|id| !id.trim().is_empty())
    {
        Some(id) => id,
        None => {
            warn!("Callback for post {} without a translation id", item_id);
            return StatusCode::BAD_REQUEST;
        }
    };

    info!(
        "Received translation callback {} for post {} (status: {:?})",
        request_id, item_id, payload.status
    );
    if let Some(url) = &payload.translations_url {
        debug!("Callback {} points at {}, fetching result directly", request_id, url);
    }

    match state.service.handle_callback(item_id, &request_id).await {
        Ok(ApplyOutcome::Applied { locales, .. }) => {
            info!(
                "✓ Callback applied translation {} to post {} ({} locales)",
                request_id,
                item_id,
                locales.len()
            );
        }
        Ok(ApplyOutcome::AlreadyCompleted) => {
            debug!("Callback for translation {} was a duplicate", request_id);
        }
        Err(e) => {
            error!(
                "Handling callback {} for post {} failed: {}",
                request_id, item_id, e
            );
        }
    }

    StatusCode::OK
}
