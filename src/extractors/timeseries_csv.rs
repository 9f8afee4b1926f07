//! Extractor for the `v1_timeseries_csv` schema.
//!
//! Payload is a delimited table with required columns `channel` (text),
//! `t` (seconds), and `y` (signal value), one row per observation:
//!
//! ```text
//! channel,t,y
//! IL6,0.0,12.1
//! IL6,0.5,12.6
//! CRP,0.0,3.2
//! ```

use std::collections::BTreeMap;

use crate::extractors::{ExtractError, Extraction};
use crate::features::kernels::{
    compute_global_features, compute_timeseries_features, BASELINE_STD_THRESHOLD, SNR_THRESHOLD,
};
use crate::features::FeatureMap;

const REQUIRED_COLUMNS: [&str; 3] = ["channel", "t", "y"];

struct Columns {
    channel: usize,
    t: usize,
    y: usize,
}

fn reader(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes())
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<Columns, ExtractError> {
    let index_of = |name: &str| headers.iter().position(|h| h == name);

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| index_of(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ExtractError::Validation(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(Columns {
        channel: index_of("channel").unwrap(),
        t: index_of("t").unwrap(),
        y: index_of("y").unwrap(),
    })
}

pub fn validate(content: &str) -> Result<(), ExtractError> {
    let mut rdr = reader(content);
    let headers = rdr
        .headers()
        .map_err(|e| ExtractError::Validation(format!("CSV parsing error: {e}")))?
        .clone();
    let columns = resolve_columns(&headers)?;

    let mut rows = 0usize;
    for record in rdr.records() {
        let record =
            record.map_err(|e| ExtractError::Validation(format!("CSV parsing error: {e}")))?;
        rows += 1;

        for (idx, name) in [(columns.t, "t"), (columns.y, "y")] {
            let raw = record.get(idx).unwrap_or("");
            if raw.trim().parse::<f64>().is_err() {
                return Err(ExtractError::Validation(format!(
                    "column '{name}' must be numeric (float)"
                )));
            }
        }
    }

    if rows == 0 {
        return Err(ExtractError::Validation(
            "CSV file is empty (no data rows)".to_string(),
        ));
    }

    Ok(())
}

pub fn extract(content: &str) -> Result<Extraction, ExtractError> {
    validate(content)?;

    let mut rdr = reader(content);
    let headers = rdr
        .headers()
        .map_err(|e| ExtractError::Extraction(format!("CSV parsing error: {e}")))?
        .clone();
    let columns = resolve_columns(&headers)?;

    // Group observations per channel, keeping file order within a channel
    // so tied timestamps retain their original relative order.
    let mut series: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for record in rdr.records() {
        let record =
            record.map_err(|e| ExtractError::Extraction(format!("CSV parsing error: {e}")))?;

        let channel = record.get(columns.channel).unwrap_or("").to_string();
        let t: f64 = match record.get(columns.t).unwrap_or("").trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let y: f64 = match record.get(columns.y).unwrap_or("").trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        // Values that parse to NaN carry no observation.
        if t.is_nan() || y.is_nan() {
            continue;
        }

        let entry = series.entry(channel).or_default();
        entry.0.push(t);
        entry.1.push(y);
    }

    if series.is_empty() {
        return Err(ExtractError::Extraction(
            "no valid data after parsing".to_string(),
        ));
    }

    // BTreeMap iteration gives channels in ascending label order.
    let channels: Vec<String> = series.keys().cloned().collect();

    let mut features = FeatureMap::new();
    for (channel, (t, y)) in &series {
        features.extend(compute_timeseries_features(t, y, channel));
    }
    features.extend(compute_global_features(
        &features,
        &channels,
        BASELINE_STD_THRESHOLD,
        SNR_THRESHOLD,
    ));

    Ok(Extraction::from_features(features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureValue;

    const TRIANGLE: &str = "channel,t,y\nA,0,1\nA,1,3\nA,2,5\nA,3,3\nA,4,1\n";

    fn number(features: &FeatureMap, key: &str) -> f64 {
        features.get(key).and_then(FeatureValue::as_number).unwrap()
    }

    #[test]
    fn extracts_single_channel_features() {
        let result = extract(TRIANGLE).unwrap();
        let f = &result.features;

        assert_eq!(number(f, "channel.A.baseline_mean"), 1.0);
        assert_eq!(number(f, "channel.A.baseline_std"), 0.0);
        assert_eq!(number(f, "channel.A.y_max"), 5.0);
        assert_eq!(number(f, "channel.A.y_min"), 1.0);
        assert_eq!(number(f, "channel.A.t_at_max"), 2.0);
        assert_eq!(number(f, "channel.A.slope_early"), 2.0);
        assert_eq!(number(f, "channel.A.t_halfmax"), 1.0);
        assert_eq!(number(f, "global.num_channels"), 1.0);
        assert_eq!(
            f["global.signal_quality_flag"],
            FeatureValue::from("ok")
        );
        assert_eq!(result.num_features, 11);
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract(TRIANGLE).unwrap();
        let b = extract(TRIANGLE).unwrap();
        assert_eq!(a.features, b.features);
        assert_eq!(
            serde_json::to_string(&a.features).unwrap(),
            serde_json::to_string(&b.features).unwrap()
        );
    }

    #[test]
    fn channels_iterate_in_ascending_label_order() {
        let csv = "channel,t,y\nZZ,0,1\nZZ,1,2\nAA,0,5\nAA,1,6\n";
        let result = extract(csv).unwrap();
        assert_eq!(number(&result.features, "global.num_channels"), 2.0);
        assert!(result.features.contains_key("channel.AA.y_max"));
        assert!(result.features.contains_key("channel.ZZ.y_max"));
    }

    #[test]
    fn missing_column_fails_validation() {
        let err = extract("channel,t\nA,0\n").unwrap_err();
        assert!(err.to_string().contains("missing required columns: y"));
    }

    #[test]
    fn empty_table_fails_validation() {
        let err = extract("channel,t,y\n").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn non_numeric_column_fails_validation() {
        let err = extract("channel,t,y\nA,abc,1\n").unwrap_err();
        assert!(err.to_string().contains("'t' must be numeric"));
    }

    #[test]
    fn nan_rows_are_dropped() {
        // The NaN observation is discarded, leaving two valid rows.
        let csv = "channel,t,y\nA,0,1\nA,1,NaN\nA,2,3\n";
        let result = extract(csv).unwrap();
        assert_eq!(number(&result.features, "channel.A.y_max"), 3.0);
        assert_eq!(number(&result.features, "channel.A.auc"), 4.0);
    }

    #[test]
    fn all_nan_rows_leave_no_data() {
        let err = extract("channel,t,y\nA,NaN,1\nA,NaN,2\n").unwrap_err();
        assert!(err.to_string().contains("no valid data"));
    }
}
