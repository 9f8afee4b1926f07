//! Schema extractors: payload validation and feature assembly.
//!
//! An artifact's `schema_version` selects the extractor variant. Extractors
//! signal malformed input through their result, never by panicking; an
//! unknown schema version is not an extractor failure but a job failure,
//! decided by the caller.

mod endpoint_json;
mod timeseries_csv;

use thiserror::Error;

use crate::features::FeatureMap;

/// Schema versions with a shipping extractor, in registry order.
pub const SUPPORTED_SCHEMA_VERSIONS: [&str; 2] = ["v1_timeseries_csv", "v1_endpoint_json"];

/// Successful extraction: the assembled feature map and its size.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub features: FeatureMap,
    pub num_features: usize,
}

impl Extraction {
    pub fn from_features(features: FeatureMap) -> Self {
        let num_features = features.len();
        Self {
            features,
            num_features,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    Validation(String),

    #[error("extraction error: {0}")]
    Extraction(String),
}

/// Closed set of extractor variants, keyed by artifact schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    TimeseriesCsv,
    EndpointJson,
}

impl Extractor {
    /// Registry lookup. `None` means the schema version is unsupported.
    pub fn for_schema_version(schema_version: &str) -> Option<Self> {
        match schema_version {
            "v1_timeseries_csv" => Some(Extractor::TimeseriesCsv),
            "v1_endpoint_json" => Some(Extractor::EndpointJson),
            _ => None,
        }
    }

    pub fn schema_version(&self) -> &'static str {
        match self {
            Extractor::TimeseriesCsv => "v1_timeseries_csv",
            Extractor::EndpointJson => "v1_endpoint_json",
        }
    }

    /// Check that `content` matches this extractor's schema without
    /// computing any features.
    pub fn validate(&self, content: &str) -> Result<(), ExtractError> {
        match self {
            Extractor::TimeseriesCsv => timeseries_csv::validate(content),
            Extractor::EndpointJson => endpoint_json::validate(content),
        }
    }

    /// Validate and extract the feature map for `content`.
    pub fn extract(&self, content: &str) -> Result<Extraction, ExtractError> {
        match self {
            Extractor::TimeseriesCsv => timeseries_csv::extract(content),
            Extractor::EndpointJson => endpoint_json::extract(content),
        }
    }
}
