//! Conversion of the metrics section into time series

use crate::errors::Result;
use crate::exposition::{parse_text, Metric, MetricType, MetricValue};
use crate::telemetry::{LabelPair, TimeSeries};

const PROBE_SUCCESS: &str = "probe_success";

/// Outcome of converting one metrics block
#[derive(Clone, Debug, PartialEq)]
pub enum MetricsOutcome {
    /// Every family was converted.
    Passed(Vec<TimeSeries>),
    /// The prober reported `probe_success 0`. Holds the series converted up
    /// to and including the failing sample.
    CheckFailed(Vec<TimeSeries>),
}

impl MetricsOutcome {
    pub fn series(&self) -> &[TimeSeries] {
        match self {
            MetricsOutcome::Passed(ts) | MetricsOutcome::CheckFailed(ts) => ts,
        }
    }

    pub fn into_series(self) -> Vec<TimeSeries> {
        match self {
            MetricsOutcome::Passed(ts) | MetricsOutcome::CheckFailed(ts) => ts,
        }
    }

    pub fn is_check_failed(&self) -> bool {
        matches!(self, MetricsOutcome::CheckFailed(_))
    }
}

/// Decode a metrics block and expand every instance into time series.
pub fn convert_metrics(
    block: &[u8],
    timestamp: i64,
    base_labels: &[LabelPair],
) -> Result<MetricsOutcome> {
    let families = parse_text(block)?;
    let mut series = Vec::new();

    for family in &families {
        let is_probe_success =
            family.name == PROBE_SUCCESS && family.metric_type == MetricType::Gauge;

        for metric in &family.metrics {
            append_metric(&mut series, timestamp, &family.name, base_labels, metric);

            if is_probe_success && metric.value == MetricValue::Gauge(0.0) {
                return Ok(MetricsOutcome::CheckFailed(series));
            }
        }
    }

    Ok(MetricsOutcome::Passed(series))
}

fn with_name(labels: &[LabelPair], name: String) -> Vec<LabelPair> {
    let mut labels = labels.to_vec();
    labels[0] = LabelPair::new("__name__", name);
    labels
}

fn with_extra(labels: &[LabelPair], name: &str, value: f64) -> Vec<LabelPair> {
    let mut labels = labels.to_vec();
    labels.push(LabelPair::new(name, format_float(value)));
    labels
}

/// Append the series for one metric instance:
/// `__name__`, then the base labels, then the instance labels.
fn append_metric(
    series: &mut Vec<TimeSeries>,
    timestamp: i64,
    name: &str,
    base_labels: &[LabelPair],
    metric: &Metric,
) {
    let mut labels = Vec::with_capacity(1 + base_labels.len() + metric.labels.len());
    labels.push(LabelPair::new("__name__", name));
    labels.extend_from_slice(base_labels);
    labels.extend_from_slice(&metric.labels);

    match &metric.value {
        MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Untyped(v) => {
            series.push(TimeSeries::new(labels, timestamp, *v));
        }
        MetricValue::Summary {
            sample_sum,
            sample_count,
            quantiles,
        } => {
            series.push(TimeSeries::new(
                with_name(&labels, format!("{}_sum", name)),
                timestamp,
                *sample_sum,
            ));
            series.push(TimeSeries::new(
                with_name(&labels, format!("{}_count", name)),
                timestamp,
                *sample_count,
            ));
            for q in quantiles {
                series.push(TimeSeries::new(
                    with_extra(&labels, "quantile", q.quantile),
                    timestamp,
                    q.value,
                ));
            }
        }
        MetricValue::Histogram {
            sample_sum,
            sample_count,
            buckets,
        } => {
            series.push(TimeSeries::new(
                with_name(&labels, format!("{}_sum", name)),
                timestamp,
                *sample_sum,
            ));
            series.push(TimeSeries::new(
                with_name(&labels, format!("{}_count", name)),
                timestamp,
                *sample_count,
            ));
            for b in buckets {
                series.push(TimeSeries::new(
                    with_extra(&labels, "le", b.upper_bound),
                    timestamp,
                    b.cumulative_count,
                ));
            }
        }
    }
}

/// Format a float the way exposition text does: the shortest decimal that
/// round-trips, switching to exponent notation for very large or small
/// magnitudes (`1e+06`, `1e-05`).
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "-2.5e-1".
    let sci = format!("{:e}", v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return v.to_string();
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let ndigits = digits.len() as i32;

    let mut eprec = 6;
    if eprec > ndigits && ndigits >= exp + 1 {
        eprec = ndigits;
    }

    if exp < -4 || exp >= eprec {
        let mut out = String::from(sign);
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.abs()));
        out
    } else {
        v.to_string()
    }
}
