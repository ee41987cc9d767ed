//! HTTP router for hostsync
//!
//! This module defines the axum router that handles all HTTP requests:
//! - Health check
//! - OAuth callback
//! - Webhook ingestion
//! - Calendar feed (GET also answers HEAD, the lightweight existence check)
//! - Sync re-trigger and sync-log listing for the rest of the product

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::OauthHandler;
use crate::database::Database;
use crate::error::{CallbackError, WebhookError};
use crate::webhooks::{IngestOutcome, WebhookIngester};

/// Shared application state
pub struct AppState<D: Database> {
    /// Database
    pub database: Arc<D>,

    /// OAuth callback handler
    pub oauth: Arc<OauthHandler<D>>,

    /// Webhook ingester
    pub ingester: Arc<WebhookIngester<D>>,

    /// Platform identifier of the connected marketplace
    pub platform: String,
}

impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            database: Arc::clone(&self.database),
            oauth: Arc::clone(&self.oauth),
            ingester: Arc::clone(&self.ingester),
            platform: self.platform.clone(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the main application router
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/oauth/callback", get(oauth_callback_handler::<D>))
        .route("/webhooks/:platform", post(webhook_handler::<D>))
        .route("/calendar/:property_id", get(calendar_feed_handler::<D>))
        .route(
            "/api/integrations/:id/sync",
            post(api_trigger_sync_handler::<D>),
        )
        .route(
            "/api/integrations/:id/logs",
            get(api_sync_logs_handler::<D>),
        )
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// OAuth callback
// =============================================================================

/// Query parameters of the OAuth callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
    pub redirect_uri: Option<String>,
}

/// OAuth callback endpoint handler
async fn oauth_callback_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    let redirect_uri = query.redirect_uri.as_deref().unwrap_or_default();

    match state
        .oauth
        .handle_callback(&query.code, &query.state, redirect_uri)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "integration_id": outcome.integration_id,
                "scope": outcome.scope,
            })),
        ),
        Err(err) => {
            let (status, reason) = match &err {
                CallbackError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
                CallbackError::InvalidCode(_) => (StatusCode::BAD_REQUEST, "invalid_code"),
                CallbackError::RedirectMismatch => (StatusCode::BAD_REQUEST, "redirect_mismatch"),
                CallbackError::ScopeMissing(_) => (StatusCode::BAD_REQUEST, "scope_missing"),
                CallbackError::NoIntegration => (StatusCode::NOT_FOUND, "no_integration"),
                CallbackError::Storage(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
                }
            };
            tracing::warn!(reason, error = %err, "OAuth callback failed");
            (
                status,
                Json(serde_json::json!({
                    "reason": reason,
                    "error": err.to_string(),
                })),
            )
        }
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Webhook ingestion endpoint handler
async fn webhook_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(platform): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    match state.ingester.ingest(&platform, &payload).await {
        Ok(outcome) => {
            let status = match &outcome {
                IngestOutcome::Applied => "applied",
                IngestOutcome::Duplicate => "duplicate",
                IngestOutcome::Ignored(_) => "ignored",
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": status })),
            )
        }
        Err(WebhookError::Malformed(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": msg })),
        ),
        Err(err) => {
            tracing::error!(error = %err, "Webhook ingestion failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Ingestion failed" })),
            )
        }
    }
}

// =============================================================================
// Calendar feed
// =============================================================================

/// Calendar feed endpoint handler
///
/// axum serves HEAD requests from this GET route with the body stripped,
/// which is the feed's lightweight existence check.
async fn calendar_feed_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(property_id): Path<i64>,
) -> impl IntoResponse {
    let known = match state.database.get_property_defaults(property_id).await {
        Ok(defaults) => defaults.is_some(),
        Err(err) => {
            tracing::error!(error = %err, property_id, "Failed to load property");
            return (StatusCode::INTERNAL_SERVER_ERROR, "".to_string()).into_response();
        }
    };
    if !known {
        return (StatusCode::NOT_FOUND, "".to_string()).into_response();
    }

    let bookings = match state.database.list_bookings(property_id).await {
        Ok(bookings) => bookings,
        Err(err) => {
            tracing::error!(error = %err, property_id, "Failed to load bookings");
            return (StatusCode::INTERNAL_SERVER_ERROR, "".to_string()).into_response();
        }
    };

    let now = Utc::now();
    let feed = crate::calendar::generate_feed(&bookings, &state.platform, now.date_naive(), now);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        feed,
    )
        .into_response()
}

// =============================================================================
// Sync API
// =============================================================================

/// Re-trigger an integration's sync by making its queue item due now
async fn api_trigger_sync_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.database.get_integration(id).await {
        Ok(Some(_)) => match state.database.mark_queue_due(id, Utc::now()).await {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "message": "Sync scheduled" })),
            ),
            Err(err) => {
                tracing::error!(error = %err, integration_id = id, "Failed to schedule sync");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Failed to schedule sync" })),
                )
            }
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Integration not found" })),
        ),
        Err(err) => {
            tracing::error!(error = %err, integration_id = id, "Failed to load integration");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to load integration" })),
            )
        }
    }
}

/// List recent sync log entries for an integration
async fn api_sync_logs_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.database.list_sync_logs(id, 50).await {
        Ok(logs) => (StatusCode::OK, Json(serde_json::json!({ "logs": logs }))),
        Err(err) => {
            tracing::error!(error = %err, integration_id = id, "Failed to list sync logs");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to list sync logs" })),
            )
        }
    }
}
