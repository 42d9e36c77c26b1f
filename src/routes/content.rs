use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app_state::AppState;
use crate::models::submission::{SubmitRequest, SubmitResponse};
use crate::models::verdict::VerdictResponse;
use crate::services::ingress::IngressError;
use crate::services::store::StoreError;

/// Error body shared by the content routes.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Validation(String),
    Dispatch(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Dispatch(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<IngressError> for ApiError {
    fn from(err: IngressError) -> Self {
        match err {
            IngressError::Validation(m) => ApiError::Validation(m),
            IngressError::Dispatch(_) => {
                ApiError::Dispatch("Submission could not be queued, please retry".to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Verdict lookup failed");
        ApiError::Internal("Failed to get content".to_string())
    }
}

/// POST /api/v1/content — accept content for asynchronous moderation.
pub async fn submit_content(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let response = state.ingress.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/content/{content_id} — current moderation verdict.
pub async fn get_content(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> Result<Json<VerdictResponse>, ApiError> {
    match state.store.get(&content_id).await? {
        Some(record) => Ok(Json(record.into())),
        None => Err(ApiError::NotFound(format!(
            "Content with id {} not found",
            content_id
        ))),
    }
}
