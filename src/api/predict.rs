//! Synchronous prediction endpoints.
//!
//! Both endpoints share the model cache, blob store, and database pool
//! with the queue poller. Every single prediction writes an audit job row
//! that is finalized on all exit paths.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::db::gateway::JobStatus;
use crate::inference::{run_batch_inference, run_inference, PredictionResult};

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub org_id: Uuid,
    pub sample_id: Uuid,
    pub model_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchRequest {
    pub org_id: Uuid,
    pub model_id: Uuid,
    pub sample_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub status: &'static str,
    pub sample_id: Uuid,
    pub model_id: Uuid,
    pub y_hat: f64,
    pub threshold: f64,
    pub predicted_class: i16,
    pub num_trees: usize,
}

impl From<&PredictionResult> for PredictResponse {
    fn from(result: &PredictionResult) -> Self {
        Self {
            status: "ok",
            sample_id: result.sample_id,
            model_id: result.model_id,
            y_hat: result.y_hat,
            threshold: result.threshold,
            predicted_class: result.predicted_class,
            num_trees: result.num_trees,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub sample_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct PredictBatchResponse {
    pub status: &'static str,
    pub model_id: Uuid,
    pub total_samples: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<PredictResponse>,
    pub errors: Vec<BatchItemError>,
}

/// POST /v1/predict
///
/// Scores one sample against one model: verify tenant ownership of both,
/// resolve the sample's features for the model's feature set, run
/// inference, and upsert the prediction and leaf embedding.
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let job_id = state
        .gateway
        .create_predict_job(request.org_id, request.sample_id, request.model_id)
        .await?;

    match predict_inner(&state, &request).await {
        Ok(result) => {
            let output = serde_json::json!({
                "y_hat": result.y_hat,
                "threshold": result.threshold,
                "predicted_class": result.predicted_class,
                "num_trees": result.num_trees,
            });
            finalize_job(&state, job_id, JobStatus::Succeeded, Some(&output), None).await;
            Ok(Json(PredictResponse::from(&result)))
        }
        Err(err) => {
            finalize_job(&state, job_id, JobStatus::Failed, None, Some(&err.message)).await;
            Err(err)
        }
    }
}

async fn predict_inner(
    state: &AppState,
    request: &PredictRequest,
) -> Result<PredictionResult, ApiError> {
    let model = state
        .gateway
        .get_model(request.model_id, request.org_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "Model not found or access denied",
                Some(format!("model_id={}", request.model_id)),
            )
        })?;

    let sample = state
        .gateway
        .get_sample(request.sample_id, request.org_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "Sample not found or access denied",
                Some(format!("sample_id={}", request.sample_id)),
            )
        })?;

    let features = state
        .gateway
        .get_sample_features_by_feature_set(sample.id, model.feature_set_id, request.org_id)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request(
                "Sample features not found for required feature set",
                Some(format!(
                    "sample_id={}, feature_set_id={}",
                    sample.id, model.feature_set_id
                )),
            )
        })?;

    let loaded = state
        .models
        .get_or_load(model.id, &state.storage, &model.storage_key)
        .await?;

    let result = run_inference(&loaded, sample.id, model.id, &features.features, None)?;

    state
        .gateway
        .upsert_prediction(
            request.org_id,
            result.sample_id,
            result.model_id,
            result.y_hat,
            result.threshold,
            result.predicted_class,
        )
        .await?;
    state
        .gateway
        .upsert_leaf_embedding(
            request.org_id,
            result.sample_id,
            result.model_id,
            &result.leaf_indices,
        )
        .await?;

    Ok(result)
}

/// POST /v1/predict-batch
///
/// Scores many samples against one model. Per-sample misses are collected
/// without aborting the batch; the ensemble call itself is all-or-nothing.
pub async fn predict_batch(
    State(state): State<AppState>,
    Json(request): Json<PredictBatchRequest>,
) -> Result<Json<PredictBatchResponse>, ApiError> {
    if request.sample_ids.is_empty() {
        return Err(ApiError::bad_request("No sample IDs provided", None));
    }

    let model = state
        .gateway
        .get_model(request.model_id, request.org_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "Model not found or access denied",
                Some(format!("model_id={}", request.model_id)),
            )
        })?;

    let loaded = state
        .models
        .get_or_load(model.id, &state.storage, &model.storage_key)
        .await?;

    let mut to_predict: Vec<(Uuid, Value)> = Vec::with_capacity(request.sample_ids.len());
    let mut errors: Vec<BatchItemError> = Vec::new();

    for &sample_id in &request.sample_ids {
        let sample = state
            .gateway
            .get_sample(sample_id, request.org_id)
            .await?;
        if sample.is_none() {
            errors.push(BatchItemError {
                sample_id,
                error: "Sample not found or access denied".to_string(),
            });
            continue;
        }

        match state
            .gateway
            .get_sample_features_by_feature_set(sample_id, model.feature_set_id, request.org_id)
            .await?
        {
            Some(features) => to_predict.push((sample_id, features.features)),
            None => errors.push(BatchItemError {
                sample_id,
                error: "Features not found for required feature set".to_string(),
            }),
        }
    }

    let predictions = run_batch_inference(&loaded, model.id, &to_predict, None)?;

    let mut results = Vec::with_capacity(predictions.len());
    for result in &predictions {
        let stored = store_prediction(&state, request.org_id, result).await;
        match stored {
            Ok(()) => results.push(PredictResponse::from(result)),
            Err(err) => errors.push(BatchItemError {
                sample_id: result.sample_id,
                error: format!("Failed to save prediction: {err}"),
            }),
        }
    }

    Ok(Json(PredictBatchResponse {
        status: "ok",
        model_id: model.id,
        total_samples: request.sample_ids.len(),
        successful: results.len(),
        failed: errors.len(),
        results,
        errors,
    }))
}

async fn store_prediction(
    state: &AppState,
    org_id: Uuid,
    result: &PredictionResult,
) -> Result<(), sqlx::Error> {
    state
        .gateway
        .upsert_prediction(
            org_id,
            result.sample_id,
            result.model_id,
            result.y_hat,
            result.threshold,
            result.predicted_class,
        )
        .await?;
    state
        .gateway
        .upsert_leaf_embedding(org_id, result.sample_id, result.model_id, &result.leaf_indices)
        .await?;
    Ok(())
}

async fn finalize_job(
    state: &AppState,
    job_id: Uuid,
    status: JobStatus,
    output: Option<&Value>,
    error_text: Option<&str>,
) {
    if let Err(err) = state
        .gateway
        .update_job_status(job_id, status, output, error_text)
        .await
    {
        error!(%job_id, "failed to finalize audit job: {err}");
    }
}
