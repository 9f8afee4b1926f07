//! HTTP facade: router, shared state, and service routes.
//!
//! The prediction endpoints live in [`predict`]; this module carries the
//! shared application state, the error-to-response mapping, and the
//! operational routes (health, job status, manual job execution).

pub mod predict;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::bundle::{BundleError, ModelCache};
use crate::config::Settings;
use crate::db::Gateway;
use crate::error::WorkerError;
use crate::inference::InferenceError;
use crate::runner::{run_extract_job, ExtractJobPayload, WorkerContext, DEFAULT_FEATURE_SET};
use crate::storage::BlobStore;

/// State shared by every request handler. All fields are cheaply clonable
/// handles onto process-wide resources.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub storage: BlobStore,
    pub models: Arc<ModelCache>,
    pub settings: Arc<Settings>,
}

impl AppState {
    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            gateway: self.gateway.clone(),
            storage: self.storage.clone(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs/:job_id", get(job_status))
        .route("/internal/run-once", post(run_once))
        .route("/v1/predict", post(predict::predict))
        .route("/v1/predict-batch", post(predict::predict_batch))
        .with_state(state)
}

/// Error body shared by every endpoint:
/// `{"status": "error", "message": ..., "details": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// An error response with its HTTP status. Validation and missing-entity
/// failures map to client errors; bundle, inference, and gateway failures
/// map to server errors.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details,
        }
    }

    pub fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

/// The single place the service error kinds map onto response categories:
/// validation and missing entities are client errors, everything touching
/// the bundle, the ensemble, or external services is a server error.
impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound(message) => ApiError::not_found(message, None),
            WorkerError::Validation(message) => ApiError::bad_request(message, None),
            WorkerError::Unsupported(message) => ApiError::bad_request(message, None),
            WorkerError::Bundle(err) => {
                ApiError::internal("Failed to load model bundle", Some(err.to_string()))
            }
            WorkerError::Inference(err) => {
                ApiError::internal("Inference failed", Some(err.to_string()))
            }
            WorkerError::Gateway(err) => {
                ApiError::internal("Database error", Some(err.to_string()))
            }
            WorkerError::Storage(err) => {
                ApiError::internal("Storage error", Some(err.to_string()))
            }
            WorkerError::Queue(err) => {
                ApiError::internal("Queue error", Some(err.to_string()))
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::from(WorkerError::from(err))
    }
}

impl From<BundleError> for ApiError {
    fn from(err: BundleError) -> Self {
        ApiError::from(WorkerError::from(err))
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        ApiError::from(WorkerError::from(err))
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "biomarker-worker",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": {
            "feature_extraction": true,
            "model_inference": true,
        },
        "config": {
            "redis_configured": !state.settings.upstash_redis_rest_url.is_empty(),
            "database_configured": !state.settings.database_url.is_empty(),
            "s3_configured": !state.settings.aws_s3_bucket.is_empty(),
        }
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<crate::db::gateway::Job>, ApiError> {
    let job = state
        .gateway
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found", Some(format!("job_id={job_id}"))))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct RunOnceRequest {
    pub job_id: Uuid,
    #[serde(rename = "type", default = "default_run_once_type")]
    pub job_type: String,
    pub org_id: Uuid,
    pub artifact_id: Uuid,
    #[serde(default = "default_run_once_feature_set")]
    pub feature_set: String,
}

fn default_run_once_type() -> String {
    "extract_features".to_string()
}

fn default_run_once_feature_set() -> String {
    DEFAULT_FEATURE_SET.to_string()
}

#[derive(Debug, Serialize)]
pub struct RunOnceResponse {
    pub success: bool,
    pub job: Option<crate::db::gateway::Job>,
}

/// Manually run a single extraction job, bypassing the queue. Debugging
/// entry point; the job row must already exist.
async fn run_once(
    State(state): State<AppState>,
    Json(request): Json<RunOnceRequest>,
) -> Result<Json<RunOnceResponse>, ApiError> {
    if request.job_type != "extract_features" {
        return Err(ApiError::bad_request(
            "Unsupported job type",
            Some(request.job_type),
        ));
    }

    let payload = ExtractJobPayload {
        job_id: request.job_id,
        job_type: request.job_type,
        org_id: request.org_id,
        artifact_id: request.artifact_id,
        feature_set: request.feature_set,
    };
    run_extract_job(&state.worker_context(), &payload).await;

    let job = state.gateway.get_job(request.job_id).await.map_err(|err| {
        error!("failed to read back job {}: {err}", request.job_id);
        ApiError::from(err)
    })?;

    Ok(Json(RunOnceResponse { success: true, job }))
}
