//! Pure numeric feature kernels.
//!
//! Every routine here is deterministic: no I/O, no hidden state, no RNG.
//! Determinism choices that are load-bearing for reproducible extraction:
//! population standard deviation (divisor n), stable sort by time with ties
//! kept in original relative order, first-occurrence argmax, and a fixed
//! floor on the noise denominator.

use std::cmp::Ordering;

use crate::features::{channel_key, global_key, FeatureMap, FeatureValue};

/// Feature names emitted per time-series channel.
pub const TIMESERIES_FEATURES: [&str; 9] = [
    "baseline_mean",
    "baseline_std",
    "y_max",
    "y_min",
    "t_at_max",
    "auc",
    "slope_early",
    "t_halfmax",
    "snr",
];

/// Channels whose baseline noise exceeds this are flagged low quality.
pub const BASELINE_STD_THRESHOLD: f64 = 10.0;
/// Channels whose signal-to-noise ratio falls below this are flagged low quality.
pub const SNR_THRESHOLD: f64 = 3.0;

const NOISE_FLOOR: f64 = 1e-9;

/// Compute features for a single channel's time-series data.
///
/// `t` and `y` must have equal length; empty input yields an all-null map
/// for the channel.
pub fn compute_timeseries_features(t: &[f64], y: &[f64], channel: &str) -> FeatureMap {
    if t.is_empty() || y.is_empty() {
        return empty_channel_features(channel);
    }

    let n = t.len().min(y.len());

    // Stable sort by time; ties keep original relative order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| t[a].partial_cmp(&t[b]).unwrap_or(Ordering::Equal));
    let ts: Vec<f64> = order.iter().map(|&i| t[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    // Baseline over the first 10% of samples.
    let baseline_n = usize::max(1, (n as f64 * 0.1) as usize);
    let baseline = &ys[..baseline_n];
    let baseline_mean = mean(baseline);
    let baseline_std = population_std(baseline, baseline_mean);

    let (max_idx, y_max) = argmax_first(&ys);
    let y_min = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let t_at_max = ts[max_idx];

    let auc = trapezoid(&ts, &ys);

    // Slope over the first 20% of points, ordinary least squares.
    let early_n = usize::max(2, (n as f64 * 0.2) as usize).min(n);
    let slope_early = if early_n >= 2 {
        ols_slope(&ts[..early_n], &ys[..early_n])
    } else {
        0.0
    };

    // First time the signal reaches halfway between baseline and peak.
    let halfmax = baseline_mean + 0.5 * (y_max - baseline_mean);
    let t_halfmax = ys
        .iter()
        .position(|&v| v >= halfmax)
        .map(|i| FeatureValue::Number(ts[i]))
        .unwrap_or(FeatureValue::Null);

    let snr = (y_max - baseline_mean) / baseline_std.max(NOISE_FLOOR);

    let mut features = FeatureMap::new();
    features.insert(channel_key(channel, "baseline_mean"), baseline_mean.into());
    features.insert(channel_key(channel, "baseline_std"), baseline_std.into());
    features.insert(channel_key(channel, "y_max"), y_max.into());
    features.insert(channel_key(channel, "y_min"), y_min.into());
    features.insert(channel_key(channel, "t_at_max"), t_at_max.into());
    features.insert(channel_key(channel, "auc"), auc.into());
    features.insert(channel_key(channel, "slope_early"), slope_early.into());
    features.insert(channel_key(channel, "t_halfmax"), t_halfmax);
    features.insert(channel_key(channel, "snr"), snr.into());
    features
}

/// Compute features for a single endpoint (scalar) channel.
pub fn compute_endpoint_features(channel: &str, value: f64) -> FeatureMap {
    let mut features = FeatureMap::new();
    features.insert(channel_key(channel, "endpoint_value"), value.into());
    features
}

/// Compute cross-channel features over an assembled channel feature map.
///
/// A channel with null noise/SNR features contributes no evidence either
/// way; the scan stops at the first channel that fails a threshold.
pub fn compute_global_features(
    channel_features: &FeatureMap,
    channels: &[String],
    baseline_std_threshold: f64,
    snr_threshold: f64,
) -> FeatureMap {
    let mut low_quality = false;
    for channel in channels {
        let baseline_std = channel_features
            .get(&channel_key(channel, "baseline_std"))
            .and_then(FeatureValue::as_number);
        let snr = channel_features
            .get(&channel_key(channel, "snr"))
            .and_then(FeatureValue::as_number);

        if let Some(std) = baseline_std {
            if std > baseline_std_threshold {
                low_quality = true;
                break;
            }
        }
        if let Some(snr) = snr {
            if snr < snr_threshold {
                low_quality = true;
                break;
            }
        }
    }

    let mut features = FeatureMap::new();
    features.insert(global_key("num_channels"), (channels.len() as f64).into());
    features.insert(
        global_key("signal_quality_flag"),
        FeatureValue::from(if low_quality { "low" } else { "ok" }),
    );
    features
}

fn empty_channel_features(channel: &str) -> FeatureMap {
    TIMESERIES_FEATURES
        .iter()
        .map(|name| (channel_key(channel, name), FeatureValue::Null))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Index and value of the maximum, first occurrence on ties.
fn argmax_first(values: &[f64]) -> (usize, f64) {
    let mut best_idx = 0;
    let mut best = values[0];
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    (best_idx, best)
}

fn trapezoid(t: &[f64], y: &[f64]) -> f64 {
    let mut area = 0.0;
    for i in 1..t.len() {
        area += (t[i] - t[i - 1]) * (y[i] + y[i - 1]) / 2.0;
    }
    area
}

fn ols_slope(t: &[f64], y: &[f64]) -> f64 {
    let mt = mean(t);
    let my = mean(y);
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..t.len() {
        num += (t[i] - mt) * (y[i] - my);
        den += (t[i] - mt) * (t[i] - mt);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
