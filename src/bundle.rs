//! Model bundle loading and the process-wide model cache.
//!
//! A bundle is a zip archive holding the serialized tree ensemble
//! (`xgb_model.json`, or `xgb_model.ubj` as a fallback) and its
//! `model_config.json`. Parsing is separated from fetching so the archive
//! handling is testable without a blob store.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::ensemble::{EnsembleError, TreeEnsemble};
use crate::storage::{BlobStore, StorageError};

const MODEL_JSON: &str = "xgb_model.json";
const MODEL_UBJ: &str = "xgb_model.ubj";
const MODEL_CONFIG: &str = "model_config.json";

const REQUIRED_CONFIG_FIELDS: [&str; 3] = ["feature_set", "feature_order", "task"];

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to fetch model bundle: {0}")]
    Fetch(#[from] StorageError),

    #[error("invalid model bundle: not a valid zip archive ({0})")]
    BadArchive(String),

    #[error("model bundle must contain {MODEL_JSON} or {MODEL_UBJ}")]
    MissingModelFile,

    #[error("model bundle must contain {MODEL_CONFIG}")]
    MissingConfig,

    #[error("invalid {MODEL_CONFIG}: {0}")]
    BadConfig(String),

    #[error("{MODEL_CONFIG} missing required fields: {0}")]
    MissingConfigFields(String),

    #[error("failed to load model ensemble: {0}")]
    Ensemble(#[from] EnsembleError),
}

/// Serialization format of the ensemble member inside a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Json,
    Ubj,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Json => "json",
            ModelFormat::Ubj => "ubj",
        }
    }
}

/// Model configuration from `model_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub feature_set: String,
    pub feature_order: Vec<String>,
    pub task: String,
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_threshold() -> f64 {
    0.5
}

/// A fully loaded model: parsed ensemble plus configuration.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub ensemble: TreeEnsemble,
    pub config: ModelConfig,
    pub model_format: ModelFormat,
    pub num_trees: usize,
}

/// Bundle metadata from the validation-only path (no ensemble parse).
#[derive(Debug, Clone)]
pub struct BundleMetadata {
    pub model_format: ModelFormat,
    pub config: Value,
    pub files: Vec<String>,
}

struct BundleMembers {
    model_format: ModelFormat,
    model_bytes: Vec<u8>,
    config_bytes: Vec<u8>,
    files: Vec<String>,
}

fn read_members(bundle: &[u8]) -> Result<BundleMembers, BundleError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle))
        .map_err(|e| BundleError::BadArchive(e.to_string()))?;

    let files: Vec<String> = archive.file_names().map(str::to_string).collect();

    let model_format = if files.iter().any(|f| f == MODEL_JSON) {
        ModelFormat::Json
    } else if files.iter().any(|f| f == MODEL_UBJ) {
        ModelFormat::Ubj
    } else {
        return Err(BundleError::MissingModelFile);
    };
    if !files.iter().any(|f| f == MODEL_CONFIG) {
        return Err(BundleError::MissingConfig);
    }

    let member_name = match model_format {
        ModelFormat::Json => MODEL_JSON,
        ModelFormat::Ubj => MODEL_UBJ,
    };
    let model_bytes = read_member(&mut archive, member_name)?;
    let config_bytes = read_member(&mut archive, MODEL_CONFIG)?;

    Ok(BundleMembers {
        model_format,
        model_bytes,
        config_bytes,
        files,
    })
}

fn read_member(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, BundleError> {
    let mut member = archive
        .by_name(name)
        .map_err(|e| BundleError::BadArchive(e.to_string()))?;
    let mut bytes = Vec::with_capacity(member.size() as usize);
    member
        .read_to_end(&mut bytes)
        .map_err(|e| BundleError::BadArchive(e.to_string()))?;
    Ok(bytes)
}

fn parse_config(bytes: &[u8]) -> Result<(ModelConfig, Value), BundleError> {
    let raw: Value =
        serde_json::from_slice(bytes).map_err(|e| BundleError::BadConfig(e.to_string()))?;

    let object = raw
        .as_object()
        .ok_or_else(|| BundleError::BadConfig("config root must be an object".to_string()))?;
    let missing: Vec<&str> = REQUIRED_CONFIG_FIELDS
        .iter()
        .copied()
        .filter(|field| !object.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(BundleError::MissingConfigFields(missing.join(", ")));
    }

    let config: ModelConfig =
        serde_json::from_value(raw.clone()).map_err(|e| BundleError::BadConfig(e.to_string()))?;
    Ok((config, raw))
}

/// Parse a complete model bundle from its archive bytes.
pub fn parse_model_bundle(bundle: &[u8]) -> Result<LoadedModel, BundleError> {
    let members = read_members(bundle)?;
    let (config, _) = parse_config(&members.config_bytes)?;

    let ensemble = match members.model_format {
        ModelFormat::Json => TreeEnsemble::from_json_bytes(&members.model_bytes)?,
        ModelFormat::Ubj => TreeEnsemble::from_ubjson_bytes(&members.model_bytes)?,
    };

    let num_trees = ensemble.num_trees();
    Ok(LoadedModel {
        ensemble,
        config,
        model_format: members.model_format,
        num_trees,
    })
}

/// Validate a bundle's structure and config without parsing the ensemble.
pub fn validate_bundle_bytes(bundle: &[u8]) -> Result<BundleMetadata, BundleError> {
    let members = read_members(bundle)?;
    let (_, raw) = parse_config(&members.config_bytes)?;
    Ok(BundleMetadata {
        model_format: members.model_format,
        config: raw,
        files: members.files,
    })
}

/// Fetch a bundle from blob storage and parse it.
pub async fn load_model_bundle(
    storage: &BlobStore,
    storage_key: &str,
) -> Result<LoadedModel, BundleError> {
    let bytes = storage.fetch(storage_key).await?;
    parse_model_bundle(&bytes)
}

/// Fetch a bundle and validate it without loading the ensemble.
pub async fn validate_model_bundle(
    storage: &BlobStore,
    storage_key: &str,
) -> Result<BundleMetadata, BundleError> {
    let bytes = storage.fetch(storage_key).await?;
    validate_bundle_bytes(&bytes)
}

/// Process-wide cache of loaded models, keyed by model id.
///
/// The check-then-load sequence runs under one lock so concurrent callers
/// never load the same bundle twice. The cache is soft: eviction only
/// costs a reload.
#[derive(Default)]
pub struct ModelCache {
    entries: Mutex<HashMap<Uuid, Arc<LoadedModel>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        model_id: Uuid,
        storage: &BlobStore,
        storage_key: &str,
    ) -> Result<Arc<LoadedModel>, BundleError> {
        let mut entries = self.entries.lock().await;
        if let Some(model) = entries.get(&model_id) {
            return Ok(Arc::clone(model));
        }

        info!(%model_id, storage_key, "loading model bundle");
        let loaded = Arc::new(load_model_bundle(storage, storage_key).await?);
        entries.insert(model_id, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Evict a single model.
    pub async fn invalidate(&self, model_id: Uuid) {
        self.entries.lock().await.remove(&model_id);
    }

    /// Evict everything.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn ensemble_doc() -> Value {
        json!({
            "learner": {
                "gradient_booster": {
                    "model": {
                        "trees": [{
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [0.5, -1.0, 2.0],
                            "default_left": [1, 0, 0]
                        }]
                    },
                    "name": "gbtree"
                },
                "learner_model_param": {"base_score": "5E-1"},
                "objective": {"name": "binary:logistic"}
            }
        })
    }

    fn config_doc() -> Value {
        json!({
            "feature_set": "core_v1",
            "feature_order": ["channel.A.y_max", "channel.A.auc"],
            "task": "classification",
            "default_threshold": 0.4,
            "notes": "unit-test bundle"
        })
    }

    fn build_zip(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, bytes) in members {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(bytes).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn json_bundle() -> Vec<u8> {
        build_zip(&[
            (MODEL_JSON, ensemble_doc().to_string().into_bytes()),
            (MODEL_CONFIG, config_doc().to_string().into_bytes()),
        ])
    }

    #[test]
    fn parses_json_bundle() {
        let model = parse_model_bundle(&json_bundle()).unwrap();
        assert_eq!(model.model_format, ModelFormat::Json);
        assert_eq!(model.num_trees, 1);
        assert_eq!(model.config.feature_set, "core_v1");
        assert_eq!(model.config.default_threshold, 0.4);
        assert_eq!(model.config.feature_order.len(), 2);
    }

    #[test]
    fn parses_ubj_bundle() {
        let ubj = crate::ensemble::ubjson::tests::encode(&ensemble_doc());
        let bundle = build_zip(&[
            (MODEL_UBJ, ubj),
            (MODEL_CONFIG, config_doc().to_string().into_bytes()),
        ]);
        let model = parse_model_bundle(&bundle).unwrap();
        assert_eq!(model.model_format, ModelFormat::Ubj);
        assert_eq!(model.num_trees, 1);
    }

    #[test]
    fn json_member_is_preferred_over_ubj() {
        let ubj = crate::ensemble::ubjson::tests::encode(&ensemble_doc());
        let bundle = build_zip(&[
            (MODEL_UBJ, ubj),
            (MODEL_JSON, ensemble_doc().to_string().into_bytes()),
            (MODEL_CONFIG, config_doc().to_string().into_bytes()),
        ]);
        let model = parse_model_bundle(&bundle).unwrap();
        assert_eq!(model.model_format, ModelFormat::Json);
    }

    #[test]
    fn missing_model_member_fails() {
        let bundle = build_zip(&[(MODEL_CONFIG, config_doc().to_string().into_bytes())]);
        assert!(matches!(
            parse_model_bundle(&bundle),
            Err(BundleError::MissingModelFile)
        ));
    }

    #[test]
    fn missing_config_member_fails() {
        let bundle = build_zip(&[(MODEL_JSON, ensemble_doc().to_string().into_bytes())]);
        assert!(matches!(
            parse_model_bundle(&bundle),
            Err(BundleError::MissingConfig)
        ));
    }

    #[test]
    fn missing_config_fields_are_enumerated() {
        let bundle = build_zip(&[
            (MODEL_JSON, ensemble_doc().to_string().into_bytes()),
            (MODEL_CONFIG, br#"{"task": "classification"}"#.to_vec()),
        ]);
        let err = parse_model_bundle(&bundle).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing required fields: feature_set, feature_order"));
    }

    #[test]
    fn default_threshold_applies_when_absent() {
        let bundle = build_zip(&[
            (MODEL_JSON, ensemble_doc().to_string().into_bytes()),
            (
                MODEL_CONFIG,
                json!({
                    "feature_set": "core_v1",
                    "feature_order": ["x"],
                    "task": "classification"
                })
                .to_string()
                .into_bytes(),
            ),
        ]);
        let model = parse_model_bundle(&bundle).unwrap();
        assert_eq!(model.config.default_threshold, 0.5);
        assert!(model.config.notes.is_none());
    }

    #[test]
    fn garbage_bytes_are_not_an_archive() {
        assert!(matches!(
            parse_model_bundle(b"not a zip"),
            Err(BundleError::BadArchive(_))
        ));
    }

    #[tokio::test]
    async fn cache_eviction_is_per_id_or_global() {
        let cache = ModelCache::new();
        assert!(cache.is_empty().await);

        // Evicting an absent id is a no-op, as is a global flush.
        cache.invalidate(Uuid::new_v4()).await;
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn validation_skips_ensemble_parse() {
        // Broken ensemble member; validation still succeeds on structure.
        let bundle = build_zip(&[
            (MODEL_JSON, b"{\"learner\": 5}".to_vec()),
            (MODEL_CONFIG, config_doc().to_string().into_bytes()),
        ]);
        let metadata = validate_bundle_bytes(&bundle).unwrap();
        assert_eq!(metadata.model_format, ModelFormat::Json);
        assert_eq!(metadata.config["feature_set"], "core_v1");
        assert_eq!(metadata.files.len(), 2);
        assert!(parse_model_bundle(&bundle).is_err());
    }
}
