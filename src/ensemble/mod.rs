//! Gradient-boosted-tree ensemble scoring.
//!
//! Parses the xgboost model document (`learner.gradient_booster.model.trees`)
//! into a flat tree representation and scores feature vectors against it.
//! Implementing the format directly keeps scoring bit-deterministic and
//! gives access to the leaf node reached in every tree, which downstream
//! code persists as the sample's leaf embedding.
//!
//! Missing features are encoded as NaN; a NaN at a split follows that
//! node's `default_left` branch, the default direction learned during
//! training.

pub mod ubjson;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("failed to parse ensemble document: {0}")]
    Parse(String),

    #[error("malformed ensemble: {0}")]
    Malformed(String),
}

/// One scored row: the transformed prediction and the leaf node index
/// reached in each tree, in boosting order.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub leaves: Vec<i64>,
}

#[derive(Debug, Clone)]
struct Tree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f64>,
    default_left: Vec<bool>,
}

impl Tree {
    fn num_nodes(&self) -> usize {
        self.left_children.len()
    }

    /// Walk from the root to a leaf; returns (leaf node index, leaf value).
    fn walk(&self, features: &[f32]) -> Result<(usize, f64), EnsembleError> {
        let mut node = 0usize;
        // A well-formed tree reaches a leaf within num_nodes steps.
        for _ in 0..=self.num_nodes() {
            let left = self.left_children[node];
            if left < 0 {
                return Ok((node, self.split_conditions[node]));
            }
            let feature = self.split_indices[node] as usize;
            let value = features.get(feature).copied().unwrap_or(f32::NAN);
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                (value as f64) < self.split_conditions[node]
            };
            node = if go_left {
                left as usize
            } else {
                self.right_children[node] as usize
            };
        }
        Err(EnsembleError::Malformed(
            "tree traversal did not terminate".to_string(),
        ))
    }
}

/// A parsed tree ensemble with its output transform.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    trees: Vec<Tree>,
    objective: String,
    base_score: f64,
}

// Serde mirror of the xgboost JSON model document; unknown fields are
// ignored so version-dependent members don't break loading.
#[derive(Deserialize)]
struct ModelDoc {
    learner: LearnerDoc,
}

#[derive(Deserialize)]
struct LearnerDoc {
    gradient_booster: GradientBoosterDoc,
    learner_model_param: LearnerModelParamDoc,
    objective: ObjectiveDoc,
}

#[derive(Deserialize)]
struct GradientBoosterDoc {
    model: BoosterModelDoc,
}

#[derive(Deserialize)]
struct BoosterModelDoc {
    trees: Vec<TreeDoc>,
}

#[derive(Deserialize)]
struct LearnerModelParamDoc {
    // Model params are serialized as strings, e.g. "5E-1".
    base_score: Value,
}

#[derive(Deserialize)]
struct ObjectiveDoc {
    name: String,
}

#[derive(Deserialize)]
struct TreeDoc {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f64>,
    default_left: Vec<u8>,
}

impl TreeEnsemble {
    /// Parse from the JSON serialization (`xgb_model.json`).
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EnsembleError> {
        let doc: ModelDoc =
            serde_json::from_slice(bytes).map_err(|e| EnsembleError::Parse(e.to_string()))?;
        Self::from_doc(doc)
    }

    /// Parse from the UBJSON serialization (`xgb_model.ubj`).
    pub fn from_ubjson_bytes(bytes: &[u8]) -> Result<Self, EnsembleError> {
        let value = ubjson::decode(bytes).map_err(|e| EnsembleError::Parse(e.to_string()))?;
        let doc: ModelDoc =
            serde_json::from_value(value).map_err(|e| EnsembleError::Parse(e.to_string()))?;
        Self::from_doc(doc)
    }

    fn from_doc(doc: ModelDoc) -> Result<Self, EnsembleError> {
        let learner = doc.learner;
        let base_score = param_f64(&learner.learner_model_param.base_score)
            .ok_or_else(|| EnsembleError::Malformed("base_score is not numeric".to_string()))?;

        let tree_docs = learner.gradient_booster.model.trees;
        if tree_docs.is_empty() {
            return Err(EnsembleError::Malformed("ensemble has no trees".to_string()));
        }
        let mut trees = Vec::with_capacity(tree_docs.len());
        for (i, tree) in tree_docs.into_iter().enumerate() {
            trees.push(validate_tree(i, tree)?);
        }

        Ok(Self {
            trees,
            objective: learner.objective.name,
            base_score,
        })
    }

    /// Number of boosting rounds, and the length of every leaf vector.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Score a single aligned feature vector.
    pub fn score(&self, features: &[f32]) -> Result<Score, EnsembleError> {
        let mut margin = 0.0;
        let mut leaves = Vec::with_capacity(self.trees.len());
        for tree in &self.trees {
            let (leaf, value) = tree.walk(features)?;
            margin += value;
            leaves.push(leaf as i64);
        }
        Ok(Score {
            value: self.transform(margin),
            leaves,
        })
    }

    /// Score a dense row-major matrix, preserving row order.
    pub fn score_matrix(&self, rows: &[Vec<f32>]) -> Result<Vec<Score>, EnsembleError> {
        rows.iter().map(|row| self.score(row)).collect()
    }

    fn transform(&self, margin: f64) -> f64 {
        if self.objective.starts_with("binary:logistic") {
            // base_score is stored as a probability; fold it in as a margin.
            sigmoid(margin + logit(self.base_score))
        } else {
            margin + self.base_score
        }
    }
}

fn validate_tree(index: usize, doc: TreeDoc) -> Result<Tree, EnsembleError> {
    let n = doc.left_children.len();
    if doc.right_children.len() != n
        || doc.split_indices.len() != n
        || doc.split_conditions.len() != n
        || doc.default_left.len() != n
    {
        return Err(EnsembleError::Malformed(format!(
            "tree {index}: node array lengths disagree"
        )));
    }
    if n == 0 {
        return Err(EnsembleError::Malformed(format!("tree {index}: no nodes")));
    }
    for node in 0..n {
        for child in [doc.left_children[node], doc.right_children[node]] {
            if child >= 0 && child as usize >= n {
                return Err(EnsembleError::Malformed(format!(
                    "tree {index}: child {child} out of range at node {node}"
                )));
            }
        }
    }
    Ok(Tree {
        left_children: doc.left_children,
        right_children: doc.right_children,
        split_indices: doc.split_indices,
        split_conditions: doc.split_conditions,
        default_left: doc.default_left.into_iter().map(|v| v != 0).collect(),
    })
}

fn param_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-15, 1.0 - 1e-15);
    (p / (1.0 - p)).ln()
}
