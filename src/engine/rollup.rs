//! Functions evaluated over the samples of a range window.
//!
//! Every function returns `None` when the window holds too few samples to
//! produce a value, in which case the series is absent from the step's output.

use crate::common::{Sample, Timestamp};
use crate::error::{QueryError, QueryResult};

/// Increase over `[range_start, range_end]`, extrapolated to the window edges.
///
/// The gap at either edge is filled in completely when it is less than 1.1x the
/// average sample interval, otherwise by half an interval. Counters compensate
/// for resets and are never extrapolated below zero.
pub(crate) fn extrapolated_rate(
    samples: &[Sample],
    range_start: Timestamp,
    range_end: Timestamp,
    is_counter: bool,
    is_rate: bool,
) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let first = samples[0];
    let last = samples[samples.len() - 1];

    let mut result = last.value - first.value;
    if is_counter {
        let mut prev = 0.0;
        for sample in samples {
            if sample.value < prev {
                result += prev;
            }
            prev = sample.value;
        }
    }

    let sampled_interval = (last.timestamp - first.timestamp) as f64 / 1000.0;
    if sampled_interval <= 0.0 {
        return None;
    }
    let mut duration_to_start = (first.timestamp - range_start) as f64 / 1000.0;
    let duration_to_end = (range_end - last.timestamp) as f64 / 1000.0;
    let avg_interval = sampled_interval / (samples.len() - 1) as f64;

    if is_counter && result > 0.0 && first.value >= 0.0 {
        let duration_to_zero = sampled_interval * (first.value / result);
        if duration_to_zero < duration_to_start {
            duration_to_start = duration_to_zero;
        }
    }

    let threshold = avg_interval * 1.1;
    let mut extrapolate_to = sampled_interval;
    extrapolate_to += if duration_to_start < threshold {
        duration_to_start
    } else {
        avg_interval / 2.0
    };
    extrapolate_to += if duration_to_end < threshold {
        duration_to_end
    } else {
        avg_interval / 2.0
    };

    result *= extrapolate_to / sampled_interval;
    if is_rate {
        result /= (range_end - range_start) as f64 / 1000.0;
    }
    Some(result)
}

/// Change between the last two samples; per second when `is_rate` is set,
/// in which case a drop is read as a counter reset.
pub(crate) fn instant_value(samples: &[Sample], is_rate: bool) -> Option<f64> {
    let n = samples.len();
    if n < 2 {
        return None;
    }
    let last = samples[n - 1];
    let prev = samples[n - 2];

    let mut result = if is_rate && last.value < prev.value {
        last.value
    } else {
        last.value - prev.value
    };
    let interval = last.timestamp - prev.timestamp;
    if interval == 0 {
        return None;
    }
    if is_rate {
        result /= interval as f64 / 1000.0;
    }
    Some(result)
}

/// Least squares fit of value over time in seconds relative to `intercept_time`.
/// Returns `(slope, intercept)`.
pub(crate) fn linear_regression(samples: &[Sample], intercept_time: Timestamp) -> (f64, f64) {
    let first = samples.first().map(|s| s.value);
    if samples.iter().all(|s| Some(s.value) == first) {
        return (0.0, first.unwrap_or(0.0));
    }

    let n = samples.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for sample in samples {
        let x = (sample.timestamp - intercept_time) as f64 / 1000.0;
        sum_x += x;
        sum_y += sample.value;
        sum_xy += x * sample.value;
        sum_x2 += x * x;
    }
    let cov_xy = sum_xy - sum_x * sum_y / n;
    let var_x = sum_x2 - sum_x * sum_x / n;
    let slope = cov_xy / var_x;
    let intercept = sum_y / n - slope * sum_x / n;
    (slope, intercept)
}

fn holt_winters(samples: &[Sample], sf: f64, tf: f64) -> QueryResult<Option<f64>> {
    if samples.len() < 2 {
        return Ok(None);
    }
    if sf <= 0.0 || sf >= 1.0 {
        return Err(QueryError::InvalidArgs(format!(
            "invalid smoothing factor. Expected: 0 < sf < 1, got: {sf}"
        )));
    }
    if tf <= 0.0 || tf >= 1.0 {
        return Err(QueryError::InvalidArgs(format!(
            "invalid trend factor. Expected: 0 < tf < 1, got: {tf}"
        )));
    }

    let mut s0 = 0.0;
    let mut s1 = samples[0].value;
    let mut b = samples[1].value - samples[0].value;
    for (i, sample) in samples.iter().enumerate().skip(1) {
        // trend for every sample but the first
        if i > 1 {
            b = tf * (s1 - s0) + (1.0 - tf) * b;
        }
        let x = sf * sample.value;
        let y = (1.0 - sf) * (s1 + b);
        s0 = s1;
        s1 = x + y;
    }
    Ok(Some(s1))
}

/// Interpolated `q`-quantile of `values`, `q` outside `[0, 1]` maps to `-Inf`/`+Inf`.
pub(crate) fn quantile(q: f64, values: &mut [f64]) -> Option<f64> {
    if values.is_empty() || q.is_nan() {
        return if values.is_empty() { None } else { Some(f64::NAN) };
    }
    if q < 0.0 {
        return Some(f64::NEG_INFINITY);
    }
    if q > 1.0 {
        return Some(f64::INFINITY);
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let rank = q * (n - 1.0);
    let lower = rank.floor().max(0.0) as usize;
    let upper = (lower + 1).min(values.len() - 1);
    let weight = rank - rank.floor();
    Some(values[lower] * (1.0 - weight) + values[upper] * weight)
}

fn variance(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let (mut count, mut mean, mut aux) = (0.0, 0.0, 0.0);
    for sample in samples {
        count += 1.0;
        let delta = sample.value - mean;
        mean += delta / count;
        aux += delta * (sample.value - mean);
    }
    Some(aux / count)
}

fn aggregate<F>(samples: &[Sample], f: F) -> Option<f64>
where
    F: Fn(f64, f64) -> f64,
{
    samples.iter().map(|s| s.value).reduce(f)
}

fn scalar_param(params: &[f64], idx: usize, func: &str) -> QueryResult<f64> {
    params
        .get(idx)
        .copied()
        .ok_or_else(|| QueryError::InvalidArgs(format!("missing scalar argument {idx} for {func}")))
}

/// Evaluates the range function `name` over `window`.
///
/// `eval_ts` is the evaluation time of the enclosing step, `params` the scalar
/// arguments of the call in declaration order.
pub(crate) fn eval_range_function(
    name: &str,
    window: &[Sample],
    range_start: Timestamp,
    range_end: Timestamp,
    eval_ts: Timestamp,
    params: &[f64],
) -> QueryResult<Option<f64>> {
    if window.is_empty() {
        return Ok(None);
    }
    let value = match name {
        "rate" => extrapolated_rate(window, range_start, range_end, true, true),
        "increase" => extrapolated_rate(window, range_start, range_end, true, false),
        "delta" => extrapolated_rate(window, range_start, range_end, false, false),
        "irate" => instant_value(window, true),
        "idelta" => instant_value(window, false),
        "deriv" => {
            if window.len() < 2 {
                return Ok(None);
            }
            Some(linear_regression(window, window[0].timestamp).0)
        }
        "predict_linear" => {
            if window.len() < 2 {
                return Ok(None);
            }
            let duration = scalar_param(params, 0, name)?;
            let (slope, intercept) = linear_regression(window, eval_ts);
            Some(slope * duration + intercept)
        }
        "holt_winters" => {
            let sf = scalar_param(params, 0, name)?;
            let tf = scalar_param(params, 1, name)?;
            return holt_winters(window, sf, tf);
        }
        "changes" => {
            let changes = window
                .windows(2)
                .filter(|w| w[0].value != w[1].value && !(w[0].value.is_nan() && w[1].value.is_nan()))
                .count();
            Some(changes as f64)
        }
        "resets" => {
            let resets = window.windows(2).filter(|w| w[1].value < w[0].value).count();
            Some(resets as f64)
        }
        "avg_over_time" => Some(window.iter().map(|s| s.value).sum::<f64>() / window.len() as f64),
        "count_over_time" => Some(window.len() as f64),
        "sum_over_time" => Some(window.iter().map(|s| s.value).sum()),
        "min_over_time" => aggregate(window, |acc, v| if v < acc || acc.is_nan() { v } else { acc }),
        "max_over_time" => aggregate(window, |acc, v| if v > acc || acc.is_nan() { v } else { acc }),
        "stdvar_over_time" => variance(window),
        "stddev_over_time" => variance(window).map(f64::sqrt),
        "quantile_over_time" => {
            let q = scalar_param(params, 0, name)?;
            let mut values: Vec<f64> = window.iter().map(|s| s.value).collect();
            quantile(q, &mut values)
        }
        other => {
            return Err(QueryError::UnknownFunction(other.to_string()));
        }
    };
    Ok(value)
}
