//! HTTP surface of the service.

pub mod healthcheck;
pub mod symbolicate_v4;
pub mod symbolicate_v5;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Bytes, Full};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{AddExtensionLayer, Json, Router};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::services::symbolication::SymbolicationService;
use crate::types::Job;

/// Assembles the application router.
pub fn create_app(service: Arc<SymbolicationService>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck::handle))
        .route("/symbolicate/v4", post(symbolicate_v4::handle))
        .route("/symbolicate/v5", post(symbolicate_v5::handle))
        .layer(AddExtensionLayer::new(service))
}

/// Errors surfaced to API clients.
///
/// Bad requests carry the validation message; everything unexpected maps to
/// an opaque 500 and is logged and reported instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    type Body = Full<Bytes>;
    type BodyError = Infallible;

    fn into_response(self) -> Response<Self::Body> {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(ref error) => {
                tracing::error!("internal error: {:?}", error);
                sentry::capture_error(&self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = Json(ApiErrorResponse {
            detail: self.to_string(),
        })
        .into_response();
        *response.status_mut() = status;
        response
    }
}

/// Parses the raw request body as JSON.
pub(crate) fn load_payload(body: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|_| {
        metric!(counter("symbolicate.request_error") += 1, "reason" => "bad_json");
        ApiError::BadRequest("Payload is not valid JSON".to_owned())
    })
}

/// Validates raw jobs into typed ones and emits per-job stack histograms.
///
/// Shared by both API versions; error messages name the offending job index
/// and carry the validator's message, nothing else from the payload.
pub(crate) fn validate_and_measure_jobs(
    raw_jobs: &[Value],
    api_version: &str,
) -> Result<Vec<Job>, ApiError> {
    use crate::services::symbolication::{validate_modules, validate_stacks};

    let mut jobs = Vec::with_capacity(raw_jobs.len());
    for (i, raw_job) in raw_jobs.iter().enumerate() {
        let job = raw_job
            .as_object()
            .ok_or_else(|| ApiError::BadRequest(format!("job {} is invalid", i)))?;
        let stacks = job.get("stacks").ok_or_else(|| {
            ApiError::BadRequest(format!("job {} is invalid: no stacks specified", i))
        })?;
        let memory_map = job.get("memoryMap").ok_or_else(|| {
            ApiError::BadRequest(format!("job {} is invalid: no memoryMap specified", i))
        })?;

        let modules = validate_modules(memory_map).map_err(|err| {
            metric!(counter("symbolicate.request_error") += 1, "reason" => "invalid_modules");
            ApiError::BadRequest(format!("job {} has invalid modules: {}", i, err))
        })?;
        let stacks = validate_stacks(stacks, &modules).map_err(|err| {
            metric!(counter("symbolicate.request_error") += 1, "reason" => "invalid_stacks");
            ApiError::BadRequest(format!("job {} has invalid stacks: {}", i, err))
        })?;

        metric!(
            histogram("symbolicate.stacks_count") = stacks.len() as u64,
            "version" => api_version
        );

        jobs.push(Job {
            stacks,
            memory_map: modules,
        });
    }

    Ok(jobs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Builds the app around a service talking to the given symbol server.
    pub(crate) async fn test_app(server: &crate::test::SymbolServer) -> (Router, tempfile::TempDir) {
        let (service, temp) = crate::test::test_service(&server.url);
        (create_app(Arc::new(service)), temp)
    }

    pub(crate) async fn post_json(
        app: Router,
        uri: &str,
        body: Value,
        debug_header: bool,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if debug_header {
            request = request.header("Debug", "true");
        }
        let request = request.body(Body::from(body.to_string())).unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let server = crate::test::symbol_server(&[]).await;
        let (app, _temp) = test_app(&server).await;

        let request = Request::builder()
            .uri("/healthcheck")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_validate_and_measure_jobs_messages() {
        use serde_json::json;

        let cases = [
            (json!(["not a job"]), "job 0 is invalid"),
            (json!([{"memoryMap": []}]), "job 0 is invalid: no stacks specified"),
            (json!([{"stacks": []}]), "job 0 is invalid: no memoryMap specified"),
            (
                json!([{"stacks": [[[0, 16]]], "memoryMap": "x"}]),
                "job 0 has invalid modules: modules must be a list",
            ),
            (
                json!([{"stacks": [], "memoryMap": []}]),
                "job 0 has invalid stacks: no stacks specified",
            ),
        ];

        for (payload, message) in cases {
            let raw_jobs = payload.as_array().unwrap().clone();
            let err = validate_and_measure_jobs(&raw_jobs, "v5").unwrap_err();
            match err {
                ApiError::BadRequest(detail) => assert_eq!(detail, message),
                other => panic!("expected bad request, got {:?}", other),
            }
        }
    }
}
