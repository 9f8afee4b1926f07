//! Feature value model shared by extractors, persistence, and inference.
//!
//! Every emitted key follows one of three shapes: `channel.<CHANNEL>.<NAME>`,
//! `global.<NAME>`, or `metadata.<NAME>`. Values are a closed scalar union,
//! and maps are ordered so serialization is deterministic.

pub mod kernels;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single feature value: numeric, textual (metadata and quality flags),
/// or null (feature not computable for this input).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Null,
    Number(f64),
    Text(String),
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// Ordered feature map. `BTreeMap` keeps key order lexicographic, which in
/// turn keeps the persisted JSON byte-stable across re-runs.
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// Key for a per-channel feature.
pub fn channel_key(channel: &str, name: &str) -> String {
    format!("channel.{channel}.{name}")
}

/// Key for a cross-channel feature.
pub fn global_key(name: &str) -> String {
    format!("global.{name}")
}

/// Key for a pass-through metadata entry.
pub fn metadata_key(name: &str) -> String {
    format!("metadata.{name}")
}
