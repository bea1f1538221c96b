//! Core library for Notedrop. This module wires together the ingestion
//! pipeline, the Telegram webhook surface and the read-side notes endpoint
//! into a single axum application.

mod config;
mod util;

pub mod classify;
pub mod pipeline;
pub mod store;
pub mod telegram;

pub use config::AppConfig;

use std::sync::Arc;

use axum::extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::classify::GeminiClassifier;
use crate::pipeline::{IngestPipeline, PipelineOutcome, PipelineReport};
use crate::store::SupabaseStore;
use crate::telegram::{TelegramClient, TelegramUpdate};

/// Header Telegram attaches when the webhook was registered with a secret.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

/// Internal application state shared across handlers. Clients are built
/// once at startup and reused for every invocation.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub store: SupabaseStore,
    pub webhook_secret: Option<String>,
    pub gemini_model: String,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
}

pub fn build_state(config: &AppConfig) -> AppState {
    let telegram = TelegramClient::new(
        &config.telegram_api_base,
        &config.telegram_token,
        config.telegram_timeout_ms,
    );
    let classifier = GeminiClassifier::new(
        &config.gemini_api_base,
        &config.gemini_api_key,
        &config.gemini_model,
        &config.tag_vocabulary,
        config.gemini_timeout_ms,
    );
    let store = SupabaseStore::new(
        &config.supabase_url,
        &config.supabase_service_key,
        config.supabase_timeout_ms,
    );
    AppState {
        pipeline: Arc::new(IngestPipeline::new(telegram, classifier, store.clone())),
        store,
        webhook_secret: config.webhook_secret.clone(),
        gemini_model: config.gemini_model.clone(),
        max_request_bytes: config.max_request_bytes,
    }
}

pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    Ok(build_state(&config))
}

/// Build the axum router and attach handlers. The router holds a copy of
/// the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/api/webhook", post(webhook_handler))
        .route("/api/notes", get(notes_handler))
        .route("/healthz", get(healthz_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn authentication_error() -> ErrorResponse {
    ErrorResponse {
        error: "Unauthorized".to_string(),
    }
}

fn ensure_authenticated(
    headers: &HeaderMap,
    expected_secret: Option<&str>,
) -> Result<(), ErrorResponse> {
    let expected = match expected_secret {
        Some(secret) => secret,
        None => return Ok(()),
    };
    let provided = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return Err(authentication_error());
    }
    Ok(())
}

/// Handler for `POST /api/webhook`. Authentication rejection is the single
/// non-success response; every other path acknowledges with 200 so Telegram
/// never re-delivers the update.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TelegramUpdate>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authenticated(&headers, state.webhook_secret.as_deref()) {
        tracing::warn!("webhook secret mismatch; rejecting update");
        return (StatusCode::UNAUTHORIZED, Json(err)).into_response();
    }

    let update = match payload {
        Ok(Json(update)) => update,
        Err(rejection) => {
            // A redelivery of the same broken body would fail identically.
            tracing::warn!(detail = %rejection.body_text(), "unparseable webhook payload; acknowledging anyway");
            return (StatusCode::OK, "OK. Ignored.").into_response();
        }
    };

    tracing::info!(update_id = ?update.update_id, "webhook update received");
    tracing::debug!(update = ?update, "webhook payload");

    let report = state.pipeline.handle_update(&update).await;
    acknowledge(report)
}

fn acknowledge(report: PipelineReport) -> axum::response::Response {
    if !report.degradations.is_empty() {
        tracing::info!(degradations = ?report.degradations, "update processed with degradations");
    }
    let body = match report.outcome {
        PipelineOutcome::Ignored => "OK. Ignored.",
        PipelineOutcome::Guided => "OK. No content.",
        PipelineOutcome::Archived => "OK. Archived.",
    };
    (StatusCode::OK, body).into_response()
}

#[derive(Debug, Deserialize)]
struct NotesQuery {
    q: Option<String>,
    tag: Option<String>,
}

/// Handler for `GET /api/notes`: newest 50 notes, optionally filtered by a
/// substring over title/summary/raw_text and by exact tag membership.
async fn notes_handler(
    State(state): State<AppState>,
    Query(params): Query<NotesQuery>,
) -> axum::response::Response {
    match state
        .store
        .query_notes(params.q.as_deref(), params.tag.as_deref())
        .await
    {
        Ok(notes) => (StatusCode::OK, Json(serde_json::json!({ "data": notes }))).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "notes query failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "Datastore query failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "model": state.gemini_model,
    });
    (StatusCode::OK, Json(json)).into_response()
}
