//! Route handlers for the docqa API.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::auth::ApiAuth;
use crate::engine::QueryEngine;
use crate::types::{QaRequest, QaResponse};

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub auth: ApiAuth,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/qa/run", post(run_qa))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health/welcome endpoint.
async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "docqa is running. POST /api/v1/qa/run to answer questions over a document."
    }))
}

/// Main endpoint: answer a batch of questions over one document.
async fn run_qa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QaRequest>,
) -> Response {
    // Auth runs before any pipeline work.
    if !state.auth.validate(bearer_token(&headers)) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid or missing API token");
    }

    if let Err(message) = payload.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, &message);
    }

    match state.engine.process(&payload).await {
        Ok(outcome) => {
            let mut response = Json(QaResponse {
                answers: outcome.answers,
            })
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&outcome.usage.total().to_string()) {
                response.headers_mut().insert("x-token-usage", value);
            }
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Request processing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected server error occurred.",
            )
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers), "abc123");
    }

    #[test]
    fn test_bearer_token_missing_or_malformed() {
        assert_eq!(bearer_token(&HeaderMap::new()), "");

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), "");
    }
}
