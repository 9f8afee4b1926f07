//! Persistence gateway: typed operations over the worker's tables.
//!
//! Every externally callable operation takes the tenant tag (`org_id`) and
//! includes it in the query predicate, so a cross-tenant reference reads as
//! not-found. Feature maps and leaf vectors are opaque JSON at this layer;
//! nothing here inspects or transforms them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::features::kernels::TIMESERIES_FEATURES;

/// Default version written when a feature set is created on first use.
pub const DEFAULT_FEATURE_SET_VERSION: &str = "1.0.0";

/// Job lifecycle. Transitions are monotonic:
/// `queued → running → {succeeded, failed}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: Uuid,
    pub org_id: Uuid,
    pub experiment_id: Uuid,
    pub sample_id: Option<Uuid>,
    pub storage_key: String,
    pub file_name: String,
    pub file_type: String,
    pub sha256: String,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub id: Uuid,
    pub org_id: Uuid,
    pub experiment_id: Uuid,
    pub sample_label: String,
    pub patient_pseudonym: Option<String>,
    pub matrix_type: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleFeatures {
    pub id: Uuid,
    pub org_id: Uuid,
    pub sample_id: Uuid,
    pub feature_set_id: Uuid,
    pub artifact_id: Option<Uuid>,
    pub features: Value,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub org_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub version: String,
    pub task: String,
    pub feature_set_id: Uuid,
    pub storage_key: String,
    pub model_format: String,
    pub metrics: Option<Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Declared feature list written when the core_v1 feature set is created.
pub fn core_v1_feature_list() -> Value {
    serde_json::json!({
        "timeseries": TIMESERIES_FEATURES,
        "endpoint": ["endpoint_value"],
        "global": ["num_channels", "signal_quality_flag"],
    })
}

#[derive(Clone)]
pub struct Gateway {
    pool: PgPool,
}

impl Gateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_artifact(
        &self,
        artifact_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Artifact>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, org_id, experiment_id, sample_id, storage_key,
                      file_name, file_type, sha256, schema_version, created_at
               FROM raw_artifacts
               WHERE id = $1 AND org_id = $2"#,
        )
        .bind(artifact_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| artifact_from_row(&r)).transpose()
    }

    pub async fn get_sample(
        &self,
        sample_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Sample>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, org_id, experiment_id, sample_label, patient_pseudonym,
                      matrix_type, collected_at, created_at
               FROM samples
               WHERE id = $1 AND org_id = $2"#,
        )
        .bind(sample_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| sample_from_row(&r)).transpose()
    }

    pub async fn get_samples_for_experiment(
        &self,
        experiment_id: Uuid,
        org_id: Uuid,
    ) -> Result<Vec<Sample>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, org_id, experiment_id, sample_label, patient_pseudonym,
                      matrix_type, collected_at, created_at
               FROM samples
               WHERE experiment_id = $1 AND org_id = $2
               ORDER BY created_at ASC"#,
        )
        .bind(experiment_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sample_from_row).collect()
    }

    /// Atomic get-or-create keyed by `(org_id, name)`. On create, the
    /// declared core_v1 feature list is written; thereafter the row is
    /// immutable and only its id is returned.
    pub async fn get_or_create_feature_set(
        &self,
        org_id: Uuid,
        name: &str,
        version: &str,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO feature_sets (id, org_id, name, version, feature_list)
               VALUES (gen_random_uuid(), $1, $2, $3, $4)
               ON CONFLICT (org_id, name) DO UPDATE SET name = EXCLUDED.name
               RETURNING id"#,
        )
        .bind(org_id)
        .bind(name)
        .bind(version)
        .bind(core_v1_feature_list())
        .fetch_one(&self.pool)
        .await
    }

    /// Upsert under the uniqueness key `(sample_id, feature_set_id)`; an
    /// existing row keeps its id while features, originating artifact, and
    /// `computed_at` are overwritten.
    pub async fn upsert_sample_features(
        &self,
        org_id: Uuid,
        sample_id: Uuid,
        feature_set_id: Uuid,
        artifact_id: Uuid,
        features: &Value,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO sample_features
                   (id, org_id, sample_id, feature_set_id, artifact_id, features, computed_at)
               VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now())
               ON CONFLICT (sample_id, feature_set_id)
               DO UPDATE SET features = EXCLUDED.features,
                             artifact_id = EXCLUDED.artifact_id,
                             computed_at = EXCLUDED.computed_at
               RETURNING id"#,
        )
        .bind(org_id)
        .bind(sample_id)
        .bind(feature_set_id)
        .bind(artifact_id)
        .bind(features)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE jobs
               SET status = $2, output = $3, error = $4, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, org_id, type, status, input, output, error, created_at, updated_at
               FROM jobs
               WHERE id = $1"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Create the audit row for a synchronous prediction. The job starts
    /// in `running`; its input carries enough context to re-execute it.
    pub async fn create_predict_job(
        &self,
        org_id: Uuid,
        sample_id: Uuid,
        model_id: Uuid,
    ) -> Result<Uuid, sqlx::Error> {
        let input = serde_json::json!({
            "sample_id": sample_id,
            "model_id": model_id,
        });
        sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO jobs (id, org_id, type, status, input, created_at, updated_at)
               VALUES (gen_random_uuid(), $1, 'predict', 'running', $2, now(), now())
               RETURNING id"#,
        )
        .bind(org_id)
        .bind(input)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_model(
        &self,
        model_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Model>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, org_id, name, version, task, feature_set_id, storage_key,
                      model_format, metrics, is_active, created_at
               FROM model_registry
               WHERE id = $1 AND org_id = $2"#,
        )
        .bind(model_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| model_from_row(&r)).transpose()
    }

    pub async fn get_sample_features_by_feature_set(
        &self,
        sample_id: Uuid,
        feature_set_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<SampleFeatures>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, org_id, sample_id, feature_set_id, artifact_id, features, computed_at
               FROM sample_features
               WHERE sample_id = $1 AND feature_set_id = $2 AND org_id = $3"#,
        )
        .bind(sample_id)
        .bind(feature_set_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| sample_features_from_row(&r)).transpose()
    }

    /// Upsert under the uniqueness key `(sample_id, model_id)`.
    pub async fn upsert_prediction(
        &self,
        org_id: Uuid,
        sample_id: Uuid,
        model_id: Uuid,
        y_hat: f64,
        threshold: f64,
        predicted_class: i16,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO predictions
                   (id, org_id, sample_id, model_id, y_hat, threshold, predicted_class, created_at)
               VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, now())
               ON CONFLICT (sample_id, model_id)
               DO UPDATE SET y_hat = EXCLUDED.y_hat,
                             threshold = EXCLUDED.threshold,
                             predicted_class = EXCLUDED.predicted_class
               RETURNING id"#,
        )
        .bind(org_id)
        .bind(sample_id)
        .bind(model_id)
        .bind(y_hat)
        .bind(threshold)
        .bind(predicted_class)
        .fetch_one(&self.pool)
        .await
    }

    /// Upsert under the uniqueness key `(sample_id, model_id)`. The leaf
    /// vector is stored as a JSON array, one index per tree.
    pub async fn upsert_leaf_embedding(
        &self,
        org_id: Uuid,
        sample_id: Uuid,
        model_id: Uuid,
        leaf_indices: &[i64],
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO leaf_embeddings
                   (id, org_id, sample_id, model_id, leaf_indices, created_at)
               VALUES (gen_random_uuid(), $1, $2, $3, $4, now())
               ON CONFLICT (sample_id, model_id)
               DO UPDATE SET leaf_indices = EXCLUDED.leaf_indices
               RETURNING id"#,
        )
        .bind(org_id)
        .bind(sample_id)
        .bind(model_id)
        .bind(serde_json::json!(leaf_indices))
        .fetch_one(&self.pool)
        .await
    }
}

fn artifact_from_row(row: &PgRow) -> Result<Artifact, sqlx::Error> {
    Ok(Artifact {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        experiment_id: row.try_get("experiment_id")?,
        sample_id: row.try_get("sample_id")?,
        storage_key: row.try_get("storage_key")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        sha256: row.try_get("sha256")?,
        schema_version: row.try_get("schema_version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn sample_from_row(row: &PgRow) -> Result<Sample, sqlx::Error> {
    Ok(Sample {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        experiment_id: row.try_get("experiment_id")?,
        sample_label: row.try_get("sample_label")?,
        patient_pseudonym: row.try_get("patient_pseudonym")?,
        matrix_type: row.try_get("matrix_type")?,
        collected_at: row.try_get("collected_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn sample_features_from_row(row: &PgRow) -> Result<SampleFeatures, sqlx::Error> {
    Ok(SampleFeatures {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        sample_id: row.try_get("sample_id")?,
        feature_set_id: row.try_get("feature_set_id")?,
        artifact_id: row.try_get("artifact_id")?,
        features: row.try_get("features")?,
        computed_at: row.try_get("computed_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(Job {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        job_type: row.try_get("type")?,
        status,
        input: row.try_get("input")?,
        output: row.try_get("output")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn model_from_row(row: &PgRow) -> Result<Model, sqlx::Error> {
    Ok(Model {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        task: row.try_get("task")?,
        feature_set_id: row.try_get("feature_set_id")?,
        storage_key: row.try_get("storage_key")?,
        model_format: row.try_get("model_format")?,
        metrics: row.try_get("metrics")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}
