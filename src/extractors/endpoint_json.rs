//! Extractor for the `v1_endpoint_json` schema.
//!
//! Payload is an object with a non-empty `channels` array of
//! `{"channel": <text>, "value": <number>}` entries and an optional
//! `metadata` object whose keys are passed through under `metadata.`:
//!
//! ```json
//! {
//!   "channels": [
//!     {"channel": "IL6", "value": 123.4},
//!     {"channel": "CRP", "value": 55.1}
//!   ],
//!   "metadata": {"instrument_id": "NEXT-001"}
//! }
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::extractors::{ExtractError, Extraction};
use crate::features::kernels::{
    compute_endpoint_features, compute_global_features, BASELINE_STD_THRESHOLD, SNR_THRESHOLD,
};
use crate::features::{metadata_key, FeatureMap, FeatureValue};

#[derive(Deserialize)]
struct EndpointDoc {
    channels: Vec<ChannelEntry>,
    // Anything other than an object is ignored, not rejected.
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
struct ChannelEntry {
    channel: String,
    value: f64,
}

fn parse(content: &str) -> Result<Value, ExtractError> {
    serde_json::from_str(content)
        .map_err(|e| ExtractError::Validation(format!("JSON parsing error: {e}")))
}

pub fn validate(content: &str) -> Result<(), ExtractError> {
    let data = parse(content)?;

    let root = data
        .as_object()
        .ok_or_else(|| ExtractError::Validation("JSON root must be an object".to_string()))?;

    let channels = root
        .get("channels")
        .ok_or_else(|| ExtractError::Validation("missing required field 'channels'".to_string()))?
        .as_array()
        .ok_or_else(|| ExtractError::Validation("field 'channels' must be an array".to_string()))?;

    if channels.is_empty() {
        return Err(ExtractError::Validation(
            "field 'channels' must have at least one entry".to_string(),
        ));
    }

    for (i, entry) in channels.iter().enumerate() {
        let entry = entry.as_object().ok_or_else(|| {
            ExtractError::Validation(format!("channel entry {i} must be an object"))
        })?;
        match entry.get("channel") {
            None => {
                return Err(ExtractError::Validation(format!(
                    "channel entry {i} missing 'channel' field"
                )))
            }
            Some(v) if !v.is_string() => {
                return Err(ExtractError::Validation(format!(
                    "channel entry {i} 'channel' must be a string"
                )))
            }
            Some(_) => {}
        }
        match entry.get("value") {
            None => {
                return Err(ExtractError::Validation(format!(
                    "channel entry {i} missing 'value' field"
                )))
            }
            Some(v) if !v.is_number() => {
                return Err(ExtractError::Validation(format!(
                    "channel entry {i} 'value' must be a number"
                )))
            }
            Some(_) => {}
        }
    }

    Ok(())
}

pub fn extract(content: &str) -> Result<Extraction, ExtractError> {
    validate(content)?;

    let doc: EndpointDoc = serde_json::from_value(parse(content)?)
        .map_err(|e| ExtractError::Extraction(e.to_string()))?;

    // Ascending label order; stable, so duplicate labels keep file order.
    let mut entries: Vec<ChannelEntry> = doc.channels;
    entries.sort_by(|a, b| a.channel.cmp(&b.channel));

    let channel_names: Vec<String> = entries.iter().map(|e| e.channel.clone()).collect();

    let mut features = FeatureMap::new();
    for entry in &entries {
        features.extend(compute_endpoint_features(&entry.channel, entry.value));
    }
    features.extend(compute_global_features(
        &features,
        &channel_names,
        BASELINE_STD_THRESHOLD,
        SNR_THRESHOLD,
    ));

    if let Some(metadata) = doc.metadata.as_object() {
        for (key, value) in metadata {
            features.insert(metadata_key(key), metadata_value(value));
        }
    }

    Ok(Extraction::from_features(features))
}

/// Metadata passes through as scalars; composite JSON shapes are carried as
/// their serialized text so the feature map stays a closed scalar union.
fn metadata_value(value: &Value) -> FeatureValue {
    match value {
        Value::Null => FeatureValue::Null,
        Value::Number(n) => match n.as_f64() {
            Some(v) => FeatureValue::Number(v),
            None => FeatureValue::Text(n.to_string()),
        },
        Value::String(s) => FeatureValue::Text(s.clone()),
        other => FeatureValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "channels": [
            {"channel": "CRP", "value": 55.1},
            {"channel": "IL6", "value": 123.4}
        ],
        "metadata": {"instrument_id": "NEXT-001"}
    }"#;

    #[test]
    fn extracts_endpoint_channels_and_metadata() {
        let result = extract(PAYLOAD).unwrap();
        let f = &result.features;

        assert_eq!(
            f["channel.CRP.endpoint_value"],
            FeatureValue::Number(55.1)
        );
        assert_eq!(
            f["channel.IL6.endpoint_value"],
            FeatureValue::Number(123.4)
        );
        assert_eq!(f["global.num_channels"], FeatureValue::Number(2.0));
        assert_eq!(f["global.signal_quality_flag"], FeatureValue::from("ok"));
        assert_eq!(
            f["metadata.instrument_id"],
            FeatureValue::from("NEXT-001")
        );
        assert_eq!(result.num_features, 5);
    }

    #[test]
    fn channels_sort_lexicographically() {
        // Entries arrive IL6 first; the assembled map iterates CRP first.
        let payload = r#"{"channels": [
            {"channel": "IL6", "value": 1.0},
            {"channel": "CRP", "value": 2.0}
        ]}"#;
        let result = extract(payload).unwrap();
        let channel_keys: Vec<&String> = result
            .features
            .keys()
            .filter(|k| k.starts_with("channel."))
            .collect();
        assert_eq!(
            channel_keys,
            ["channel.CRP.endpoint_value", "channel.IL6.endpoint_value"]
        );
    }

    #[test]
    fn missing_channels_field_fails() {
        let err = extract(r#"{"metadata": {}}"#).unwrap_err();
        assert!(err.to_string().contains("missing required field 'channels'"));
    }

    #[test]
    fn empty_channels_array_fails() {
        let err = extract(r#"{"channels": []}"#).unwrap_err();
        assert!(err.to_string().contains("at least one entry"));
    }

    #[test]
    fn validation_errors_are_positional() {
        let err = extract(r#"{"channels": [{"channel": "A", "value": 1.0}, {"channel": "B"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("channel entry 1 missing 'value'"));

        let err = extract(r#"{"channels": [{"channel": 5, "value": 1.0}]}"#).unwrap_err();
        assert!(err
            .to_string()
            .contains("channel entry 0 'channel' must be a string"));

        let err = extract(r#"{"channels": [{"channel": "A", "value": "high"}]}"#).unwrap_err();
        assert!(err
            .to_string()
            .contains("channel entry 0 'value' must be a number"));
    }

    #[test]
    fn non_object_root_fails() {
        let err = extract("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("root must be an object"));
    }

    #[test]
    fn metadata_scalars_pass_through() {
        let payload = r#"{
            "channels": [{"channel": "A", "value": 1.0}],
            "metadata": {"temperature_c": 23.5, "operator": "lab-3", "lot": null}
        }"#;
        let f = extract(payload).unwrap().features;
        assert_eq!(f["metadata.temperature_c"], FeatureValue::Number(23.5));
        assert_eq!(f["metadata.operator"], FeatureValue::from("lab-3"));
        assert!(f["metadata.lot"].is_null());
    }
}
