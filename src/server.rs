//! HTTP surface over [`TranslationService`] for admin and storefront callers.

use crate::error::SyncError;
use crate::models::{ListContext, ModelRecord, ModelType, SyncOutcome};
use crate::service::TranslationService;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub struct AppState {
    pub service: TranslationService,
    /// When set, admin routes require a matching `x-api-key` header
    pub admin_api_key: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        let status = match (&error, error.status()) {
            (SyncError::InvalidInput(_), _) => StatusCode::BAD_REQUEST,
            (_, Some(_)) => StatusCode::BAD_GATEWAY,
            (_, None) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": true, "message": self.message })),
        )
            .into_response()
    }
}

/// Constant-time comparison, so the admin key can't be guessed byte by byte
fn api_key_matches(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.admin_api_key {
        let provided = request
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !api_key_matches(provided, expected) {
            warn!("Rejected admin request with missing or invalid API key");
            return ApiError::new(StatusCode::UNAUTHORIZED, "Invalid API key").into_response();
        }
    }
    next.run(request).await
}

fn model_type(slug: &str) -> Result<ModelType, ApiError> {
    slug.parse::<ModelType>()
        .map_err(|message: String| ApiError::new(StatusCode::BAD_REQUEST, message))
}

pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/admin/translations/options", get(get_options))
        .route("/admin/translations/:slug", post(create_translations))
        .route(
            "/admin/translations/:slug/:id",
            get(get_key_names).delete(delete_translation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_key,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/store/translations", get(list_translations))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_options(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let options = state.service.get_options().await?;
    Ok(Json(options).into_response())
}

async fn get_key_names(
    State(state): State<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    model_type(&slug)?;
    let key_names = state.service.get_translation_key_names(&[id]).await?;
    Ok(Json(json!({ "keyNames": key_names })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateTranslationsRequest {
    pub models: Vec<ModelRecord>,
}

async fn create_translations(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(request): Json<CreateTranslationsRequest>,
) -> Result<Response, ApiError> {
    let model_type = model_type(&slug)?;
    let outcome = state
        .service
        .create_model_translations(&request.models, model_type)
        .await;

    let status = match &outcome {
        SyncOutcome::Synced(_) => "synced",
        SyncOutcome::NothingToSync => "nothing_to_sync",
        SyncOutcome::Rejected { .. } => "rejected",
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ids": outcome.ids(), "status": status })),
    )
        .into_response())
}

async fn delete_translation(
    State(state): State<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    model_type(&slug)?;
    state.service.delete_translation(&id).await?;
    Ok(Json(json!({ "ids": [id] })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub ids: String,
    pub country_code: Option<String>,
}

async fn list_translations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let ids: Vec<String> = query
        .ids
        .split(',')
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let context = ListContext {
        country_code: query.country_code,
    };

    let translations = state.service.list(&ids, Some(&context)).await?;
    Ok(Json(translations).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_matches() {
        assert!(api_key_matches("secret123", "secret123"));
        assert!(!api_key_matches("secret123", "secret124"));
        assert!(!api_key_matches("secret12", "secret123"));
        assert!(!api_key_matches("", "secret"));
    }

    #[test]
    fn test_unknown_slug_is_bad_request() {
        let error = model_type("order").unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(model_type("shipping_option").is_ok());
    }

    #[test]
    fn test_remote_failures_map_to_bad_gateway() {
        let error: ApiError = SyncError::transport(
            "GET /languages",
            crate::error::TransportError::Status {
                status: 500,
                body: String::new(),
            },
        )
        .into();
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);

        let error: ApiError = SyncError::QueueCancelled.into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);

        let error: ApiError = SyncError::InvalidInput("../x".to_string()).into();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
