//! End-to-end extraction scenarios across both shipping schemas.

use pretty_assertions::assert_eq;

use biomarker_worker::extractors::{Extractor, SUPPORTED_SCHEMA_VERSIONS};
use biomarker_worker::features::{FeatureMap, FeatureValue};

fn number(features: &FeatureMap, key: &str) -> f64 {
    features
        .get(key)
        .and_then(FeatureValue::as_number)
        .unwrap_or_else(|| panic!("expected numeric feature {key}"))
}

fn text<'a>(features: &'a FeatureMap, key: &str) -> &'a str {
    match features.get(key) {
        Some(FeatureValue::Text(s)) => s,
        other => panic!("expected text feature {key}, got {other:?}"),
    }
}

fn assert_close(actual: f64, expected: f64) {
    let tol = 1e-9 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn timeseries_csv_triangle_scenario() {
    let payload = "channel,t,y\nA,0,1\nA,1,3\nA,2,5\nA,3,3\nA,4,1\n";
    let extractor = Extractor::for_schema_version("v1_timeseries_csv").unwrap();
    let result = extractor.extract(payload).unwrap();
    let f = &result.features;

    assert_close(number(f, "channel.A.baseline_mean"), 1.0);
    assert_close(number(f, "channel.A.baseline_std"), 0.0);
    assert_close(number(f, "channel.A.y_max"), 5.0);
    assert_close(number(f, "channel.A.y_min"), 1.0);
    assert_close(number(f, "channel.A.t_at_max"), 2.0);
    assert_close(number(f, "channel.A.slope_early"), 2.0);
    assert_close(number(f, "channel.A.t_halfmax"), 1.0);
    assert_close(number(f, "channel.A.snr"), 4e9);
    assert_close(number(f, "global.num_channels"), 1.0);
    assert_eq!(text(f, "global.signal_quality_flag"), "ok");
}

#[test]
fn endpoint_json_scenario() {
    let payload = r#"{
        "channels": [
            {"channel": "CRP", "value": 55.1},
            {"channel": "IL6", "value": 123.4}
        ],
        "metadata": {"instrument_id": "NEXT-001"}
    }"#;
    let extractor = Extractor::for_schema_version("v1_endpoint_json").unwrap();
    let result = extractor.extract(payload).unwrap();
    let f = &result.features;

    assert_close(number(f, "channel.CRP.endpoint_value"), 55.1);
    assert_close(number(f, "channel.IL6.endpoint_value"), 123.4);
    assert_close(number(f, "global.num_channels"), 2.0);
    assert_eq!(text(f, "global.signal_quality_flag"), "ok");
    assert_eq!(text(f, "metadata.instrument_id"), "NEXT-001");

    // Channel iteration order is lexicographic: CRP before IL6.
    let channel_keys: Vec<&String> =
        f.keys().filter(|k| k.starts_with("channel.")).collect();
    assert_eq!(
        channel_keys,
        ["channel.CRP.endpoint_value", "channel.IL6.endpoint_value"]
    );
}

#[test]
fn unknown_schema_version_is_not_an_extractor() {
    assert!(Extractor::for_schema_version("v2_foo").is_none());
    // Callers enumerate the supported set in their failure message.
    assert_eq!(
        SUPPORTED_SCHEMA_VERSIONS.join(", "),
        "v1_timeseries_csv, v1_endpoint_json"
    );
}

#[test]
fn extraction_is_deterministic_across_runs() {
    let csv = "channel,t,y\nIL6,0,12.1\nIL6,0.5,12.6\nIL6,1.0,14.9\nCRP,0,3.2\nCRP,0.5,3.4\n";
    let extractor = Extractor::for_schema_version("v1_timeseries_csv").unwrap();

    let first = extractor.extract(csv).unwrap();
    let second = extractor.extract(csv).unwrap();
    assert_eq!(first.features, second.features);
    assert_eq!(
        serde_json::to_string(&first.features).unwrap(),
        serde_json::to_string(&second.features).unwrap()
    );
}

#[test]
fn every_emitted_key_matches_the_declared_shapes() {
    let csv = "channel,t,y\nA,0,1\nA,1,2\nB,0,3\nB,1,4\n";
    let json = r#"{
        "channels": [{"channel": "CRP", "value": 1.0}],
        "metadata": {"lot": "L-17", "temperature_c": 23.5}
    }"#;

    let mut keys: Vec<String> = Extractor::TimeseriesCsv
        .extract(csv)
        .unwrap()
        .features
        .into_keys()
        .collect();
    keys.extend(
        Extractor::EndpointJson
            .extract(json)
            .unwrap()
            .features
            .into_keys(),
    );

    for key in keys {
        let valid = key.strip_prefix("channel.").map_or(false, |rest| {
            let mut parts = rest.splitn(2, '.');
            let channel = parts.next().unwrap_or("");
            let name = parts.next().unwrap_or("");
            !channel.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c == '_')
        }) || key
            .strip_prefix("global.")
            .map_or(false, |name| {
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
            })
            || key
                .strip_prefix("metadata.")
                .map_or(false, |name| !name.is_empty());
        assert!(valid, "feature key {key} does not match any declared shape");
    }
}

#[test]
fn multi_channel_quality_flag_is_low_when_any_channel_fails() {
    // Channel B is flat: no rise over baseline, snr = 0 < 3.
    let csv = "channel,t,y\n\
               A,0,1\nA,1,3\nA,2,5\n\
               B,0,10\nB,1,10\nB,2,10\n";
    let result = Extractor::TimeseriesCsv.extract(csv).unwrap();
    assert_eq!(
        result.features["global.signal_quality_flag"],
        FeatureValue::from("low")
    );
}
