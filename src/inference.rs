//! Inference over loaded models: feature-vector alignment, single-sample
//! and batched scoring, thresholded classification, and leaf extraction.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::bundle::LoadedModel;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("prediction failed: {0}")]
    Scoring(String),

    #[error("invalid prediction value: {0}")]
    NonFinite(f64),
}

/// Result of scoring one sample against one model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PredictionResult {
    pub sample_id: Uuid,
    pub model_id: Uuid,
    pub y_hat: f64,
    pub threshold: f64,
    pub predicted_class: i16,
    pub leaf_indices: Vec<i64>,
    pub num_trees: usize,
}

/// Align a stored feature map to the model's declared feature vector.
///
/// The ensemble encodes a default branch per split, so anything that is not
/// a finite number must become the missing sentinel (NaN), never zero:
/// absent keys, nulls, non-numeric text, and non-finite values all map to
/// NaN. Numeric text coerces.
pub fn align_features(features: &Value, feature_order: &[String]) -> Vec<f32> {
    feature_order
        .iter()
        .map(|name| {
            let value = features.get(name);
            coerce(value).unwrap_or(f32::NAN)
        })
        .collect()
}

fn coerce(value: Option<&Value>) -> Option<f32> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number as f32)
}

/// Run inference on a single sample.
///
/// `threshold_override` takes precedence over the bundle's default
/// threshold. A non-finite score is rejected rather than persisted.
pub fn run_inference(
    model: &LoadedModel,
    sample_id: Uuid,
    model_id: Uuid,
    features: &Value,
    threshold_override: Option<f64>,
) -> Result<PredictionResult, InferenceError> {
    let vector = align_features(features, &model.config.feature_order);
    let score = model
        .ensemble
        .score(&vector)
        .map_err(|e| InferenceError::Scoring(e.to_string()))?;

    let threshold = threshold_override.unwrap_or(model.config.default_threshold);
    build_result(
        sample_id,
        model_id,
        score.value,
        threshold,
        score.leaves,
        model.num_trees,
    )
}

/// Run inference on an ordered batch of `(sample_id, features)` pairs.
///
/// The whole matrix is scored in one call and output order equals input
/// order. An empty batch yields an empty result; an ensemble-level failure
/// fails the whole batch.
pub fn run_batch_inference(
    model: &LoadedModel,
    model_id: Uuid,
    samples: &[(Uuid, Value)],
    threshold_override: Option<f64>,
) -> Result<Vec<PredictionResult>, InferenceError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let matrix: Vec<Vec<f32>> = samples
        .iter()
        .map(|(_, features)| align_features(features, &model.config.feature_order))
        .collect();

    let scores = model
        .ensemble
        .score_matrix(&matrix)
        .map_err(|e| InferenceError::Scoring(e.to_string()))?;

    let threshold = threshold_override.unwrap_or(model.config.default_threshold);
    samples
        .iter()
        .zip(scores)
        .map(|((sample_id, _), score)| {
            build_result(
                *sample_id,
                model_id,
                score.value,
                threshold,
                score.leaves,
                model.num_trees,
            )
        })
        .collect()
}

fn build_result(
    sample_id: Uuid,
    model_id: Uuid,
    y_hat: f64,
    threshold: f64,
    leaf_indices: Vec<i64>,
    num_trees: usize,
) -> Result<PredictionResult, InferenceError> {
    if !y_hat.is_finite() {
        return Err(InferenceError::NonFinite(y_hat));
    }
    let predicted_class = if y_hat >= threshold { 1 } else { 0 };
    Ok(PredictionResult {
        sample_id,
        model_id,
        y_hat,
        threshold,
        predicted_class,
        leaf_indices,
        num_trees,
    })
}
