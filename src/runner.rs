//! Extraction job runner.
//!
//! Executes one `extract_features` job end to end: resolve the artifact
//! under its tenant, fetch the payload, extract features, and persist the
//! result. Every failure lands in the job row as a `failed` terminal state
//! with a human-readable error; the runner itself never re-raises, so one
//! bad job cannot take down the poller.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::gateway::{JobStatus, DEFAULT_FEATURE_SET_VERSION};
use crate::db::Gateway;
use crate::error::WorkerError;
use crate::extractors::{Extractor, SUPPORTED_SCHEMA_VERSIONS};
use crate::storage::BlobStore;

/// Feature set used when a job does not name one.
pub const DEFAULT_FEATURE_SET: &str = "core_v1";

/// Error context is truncated to this many characters in the job row.
const ERROR_CONTEXT_LIMIT: usize = 500;

/// Shared handles the runner needs; cloned freely, both fields are
/// reference-counted internally.
#[derive(Clone)]
pub struct WorkerContext {
    pub gateway: Gateway,
    pub storage: BlobStore,
}

/// Payload of an `extract_features` queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractJobPayload {
    pub job_id: Uuid,
    #[serde(rename = "type", default = "default_job_type")]
    pub job_type: String,
    pub org_id: Uuid,
    pub artifact_id: Uuid,
    #[serde(default = "default_feature_set")]
    pub feature_set: String,
}

fn default_job_type() -> String {
    "extract_features".to_string()
}

fn default_feature_set() -> String {
    DEFAULT_FEATURE_SET.to_string()
}

/// Run one extraction job to a terminal state.
///
/// Idempotent on `(sample, feature_set)`: a re-run overwrites the feature
/// row and yields the same record id.
pub async fn run_extract_job(ctx: &WorkerContext, payload: &ExtractJobPayload) {
    info!(
        job_id = %payload.job_id,
        artifact_id = %payload.artifact_id,
        "processing extraction job"
    );

    match execute(ctx, payload).await {
        Ok(output) => {
            info!(job_id = %payload.job_id, "extraction job succeeded");
            if let Err(err) = ctx
                .gateway
                .update_job_status(payload.job_id, JobStatus::Succeeded, Some(&output), None)
                .await
            {
                error!(job_id = %payload.job_id, "failed to record job success: {err}");
            }
        }
        Err(err) => {
            let message = flatten_error(&err);
            error!(job_id = %payload.job_id, "extraction job failed: {message}");
            if let Err(err) = ctx
                .gateway
                .update_job_status(payload.job_id, JobStatus::Failed, None, Some(&message))
                .await
            {
                error!(job_id = %payload.job_id, "failed to record job failure: {err}");
            }
        }
    }
}

async fn execute(ctx: &WorkerContext, payload: &ExtractJobPayload) -> anyhow::Result<Value> {
    ctx.gateway
        .update_job_status(payload.job_id, JobStatus::Running, None, None)
        .await
        .context("failed to mark job running")?;

    let artifact = ctx
        .gateway
        .get_artifact(payload.artifact_id, payload.org_id)
        .await
        .context("failed to fetch artifact")?
        .ok_or_else(|| {
            WorkerError::NotFound(format!(
                "artifact {} not found or org mismatch",
                payload.artifact_id
            ))
        })?;

    let sample_id = artifact.sample_id.ok_or_else(|| {
        WorkerError::Validation("artifact is not attached to a sample".to_string())
    })?;

    let feature_set_id = ctx
        .gateway
        .get_or_create_feature_set(
            payload.org_id,
            &payload.feature_set,
            DEFAULT_FEATURE_SET_VERSION,
        )
        .await
        .context("failed to resolve feature set")?;

    info!(
        job_id = %payload.job_id,
        storage_key = %artifact.storage_key,
        schema_version = %artifact.schema_version,
        "fetching artifact payload"
    );
    let content = ctx
        .storage
        .fetch_string(&artifact.storage_key)
        .await
        .context("failed to fetch artifact payload")?;

    let extractor = Extractor::for_schema_version(&artifact.schema_version).ok_or_else(|| {
        WorkerError::Unsupported(format!(
            "unsupported schema version: {}. Supported versions: {}",
            artifact.schema_version,
            SUPPORTED_SCHEMA_VERSIONS.join(", ")
        ))
    })?;

    let extraction = extractor
        .extract(&content)
        .map_err(WorkerError::from)
        .context("feature extraction failed")?;

    let features = serde_json::to_value(&extraction.features)
        .context("failed to serialize feature map")?;
    let record_id = ctx
        .gateway
        .upsert_sample_features(
            payload.org_id,
            sample_id,
            feature_set_id,
            payload.artifact_id,
            &features,
        )
        .await
        .context("failed to store sample features")?;

    info!(
        job_id = %payload.job_id,
        sample_id = %sample_id,
        num_features = extraction.num_features,
        "stored sample features"
    );

    Ok(serde_json::json!({
        "sample_id": sample_id,
        "feature_set": payload.feature_set,
        "num_features": extraction.num_features,
        "feature_record_id": record_id,
    }))
}

/// Job-row error text: the failure message plus its cause chain, the
/// latter truncated to a fixed length.
fn flatten_error(err: &anyhow::Error) -> String {
    let message = err.to_string();
    let chain: String = err
        .chain()
        .skip(1)
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ");
    if chain.is_empty() {
        message
    } else {
        let truncated: String = chain.chars().take(ERROR_CONTEXT_LIMIT).collect();
        format!("{message}\n\n{truncated}")
    }
}
