//! Bundle loading and inference, end to end against an in-memory bundle.

use std::io::{Cursor, Write};

use serde_json::{json, Value};
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use biomarker_worker::bundle::{parse_model_bundle, validate_bundle_bytes, ModelFormat};
use biomarker_worker::inference::{run_batch_inference, run_inference};

/// Two stumps over `feature_order = ["x", "y"]`, both splitting on `x`
/// at 0.5. Left leaves carry negative margin, right leaves positive.
fn ensemble_doc() -> Value {
    json!({
        "learner": {
            "gradient_booster": {
                "model": {
                    "trees": [
                        {
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [0.5, -1.0, 2.0],
                            "default_left": [1, 0, 0]
                        },
                        {
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [0, 0, 0],
                            "split_conditions": [0.5, -0.5, 1.0],
                            "default_left": [1, 0, 0]
                        }
                    ]
                },
                "name": "gbtree"
            },
            "learner_model_param": {"base_score": "5E-1"},
            "objective": {"name": "binary:logistic"}
        }
    })
}

fn bundle_bytes() -> Vec<u8> {
    let config = json!({
        "feature_set": "core_v1",
        "feature_order": ["x", "y"],
        "task": "classification",
        "default_threshold": 0.5
    });

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer
            .start_file("xgb_model.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(ensemble_doc().to_string().as_bytes())
            .unwrap();
        writer
            .start_file("model_config.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(config.to_string().as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[test]
fn bundle_loads_and_scores_a_sample() {
    let model = parse_model_bundle(&bundle_bytes()).unwrap();
    assert_eq!(model.num_trees, 2);
    assert_eq!(model.model_format, ModelFormat::Json);

    let sample_id = Uuid::new_v4();
    let model_id = Uuid::new_v4();
    let features = json!({"x": 1.0, "y": 2.0});

    let result = run_inference(&model, sample_id, model_id, &features, None).unwrap();

    // Both trees route right: margin 2.0 + 1.0.
    let expected = sigmoid(3.0);
    assert!((result.y_hat - expected).abs() < 1e-12);
    assert_eq!(result.threshold, 0.5);
    assert_eq!(result.predicted_class, 1);
    assert_eq!(result.leaf_indices.len(), result.num_trees);
    assert_eq!(result.leaf_indices, vec![2, 2]);
}

#[test]
fn predicted_class_follows_threshold_rule() {
    let model = parse_model_bundle(&bundle_bytes()).unwrap();
    let features = json!({"x": 0.0, "y": 0.0});
    let result = run_inference(&model, Uuid::new_v4(), Uuid::new_v4(), &features, None).unwrap();

    // Margin -1.5 gives a probability below the default threshold.
    assert!(result.y_hat < 0.5);
    assert_eq!(result.predicted_class, 0);

    // An override exactly at y_hat classifies positive (>= semantics).
    let result = run_inference(
        &model,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &features,
        Some(result.y_hat),
    )
    .unwrap();
    assert_eq!(result.predicted_class, 1);
}

#[test]
fn missing_features_follow_default_branches() {
    let model = parse_model_bundle(&bundle_bytes()).unwrap();
    // "x" absent entirely: both trees follow default_left.
    let features = json!({"y": 9.0});
    let result = run_inference(&model, Uuid::new_v4(), Uuid::new_v4(), &features, None).unwrap();
    assert_eq!(result.leaf_indices, vec![1, 1]);

    // Null and non-numeric text behave the same as absent.
    let features = json!({"x": null, "y": "not-a-number"});
    let result = run_inference(&model, Uuid::new_v4(), Uuid::new_v4(), &features, None).unwrap();
    assert_eq!(result.leaf_indices, vec![1, 1]);
}

#[test]
fn batch_preserves_input_order_and_handles_empty() {
    let model = parse_model_bundle(&bundle_bytes()).unwrap();
    let model_id = Uuid::new_v4();

    let empty = run_batch_inference(&model, model_id, &[], None).unwrap();
    assert!(empty.is_empty());

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let samples = vec![
        (a, json!({"x": 1.0})),
        (b, json!({"x": 0.0})),
        (c, json!({"x": 1.0})),
    ];
    let results = run_batch_inference(&model, model_id, &samples, None).unwrap();

    let order: Vec<Uuid> = results.iter().map(|r| r.sample_id).collect();
    assert_eq!(order, vec![a, b, c]);
    assert_eq!(results[0].predicted_class, 1);
    assert_eq!(results[1].predicted_class, 0);
    assert_eq!(results[2].predicted_class, 1);
    for result in &results {
        assert_eq!(result.leaf_indices.len(), 2);
        assert_eq!(result.model_id, model_id);
    }
}

#[test]
fn validation_reports_metadata_without_parsing_trees() {
    let metadata = validate_bundle_bytes(&bundle_bytes()).unwrap();
    assert_eq!(metadata.model_format, ModelFormat::Json);
    assert_eq!(metadata.config["feature_set"], "core_v1");
    assert_eq!(metadata.config["feature_order"][0], "x");
    assert_eq!(metadata.files.len(), 2);
}

#[test]
fn bundle_staged_on_disk_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model_bundle.zip");
    std::fs::write(&path, bundle_bytes()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let model = parse_model_bundle(&bytes).unwrap();
    assert_eq!(model.config.feature_order, vec!["x", "y"]);
}
