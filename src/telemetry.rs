//! Time series, log stream and payload data structures

use crate::check::CheckLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A single label. Label sets are ordered by insertion, never sorted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
}

/// A labelled metric with one sample. `__name__` is always the first label.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    pub labels: Vec<LabelPair>,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(labels: Vec<LabelPair>, timestamp: i64, value: f64) -> Self {
        Self {
            labels,
            samples: vec![Sample { timestamp, value }],
        }
    }

    pub fn name(&self) -> &str {
        self.label("__name__").unwrap_or("")
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn value(&self) -> Option<f64> {
        self.samples.first().map(|s| s.value)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// A rendered label selector with its entries. Built with exactly one entry
/// per source log record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogStream {
    pub labels: String,
    pub entries: Vec<LogEntry>,
}

/// Result of one scrape cycle, handed to the publisher as a unit.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub time_series: Vec<TimeSeries>,
    pub streams: Vec<LogStream>,
}

impl Payload {
    pub fn new(time_series: Vec<TimeSeries>, streams: Vec<LogStream>) -> Self {
        Self {
            time_series,
            streams,
        }
    }

    pub fn metrics(&self) -> &[TimeSeries] {
        &self.time_series
    }

    pub fn streams(&self) -> &[LogStream] {
        &self.streams
    }

    pub fn is_empty(&self) -> bool {
        self.time_series.is_empty() && self.streams.is_empty()
    }
}

/// Labels shared by every series and stream produced for a check.
pub fn base_labels(
    check_id: i64,
    check_name: &str,
    endpoint: &str,
    probe: &str,
    labels: &[CheckLabel],
) -> Vec<LabelPair> {
    let mut base = Vec::with_capacity(4 + labels.len());
    base.push(LabelPair::new("check_id", check_id.to_string()));
    base.push(LabelPair::new("check_name", check_name));
    base.push(LabelPair::new("endpoint", endpoint));
    base.push(LabelPair::new("probe", probe));

    for label in labels {
        base.push(LabelPair::new(format!("label_{}", label.name), label.value.clone()));
    }

    base
}

/// Render labels as a `{name="value",...}` selector, preserving order.
pub fn format_labels(labels: &[LabelPair]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let mut s = String::from("{");
    for (i, pair) in labels.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        let _ = write!(s, "{}=\"{}\"", pair.name, pair.value);
    }
    s.push('}');
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_labels_order() {
        let labels = vec![
            CheckLabel {
                name: "env".to_string(),
                value: "prod".to_string(),
            },
            CheckLabel {
                name: "team".to_string(),
                value: "sre".to_string(),
            },
        ];

        let base = base_labels(7, "http", "https://example.com", "p1", &labels);
        let names: Vec<&str> = base.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["check_id", "check_name", "endpoint", "probe", "label_env", "label_team"]
        );
        assert_eq!(base[0].value, "7");
        assert_eq!(base[5].value, "sre");
    }

    #[test]
    fn test_format_labels() {
        assert_eq!(format_labels(&[]), "");

        let labels = vec![LabelPair::new("probe", "p1"), LabelPair::new("level", "info")];
        assert_eq!(format_labels(&labels), r#"{probe="p1",level="info"}"#);
    }

    #[test]
    fn test_time_series_accessors() {
        let ts = TimeSeries::new(
            vec![LabelPair::new("__name__", "up"), LabelPair::new("job", "x")],
            1000,
            1.0,
        );
        assert_eq!(ts.name(), "up");
        assert_eq!(ts.label("job"), Some("x"));
        assert_eq!(ts.label("missing"), None);
        assert_eq!(ts.value(), Some(1.0));
    }

    #[test]
    fn test_payload_is_empty() {
        assert!(Payload::default().is_empty());
        let payload = Payload::new(vec![TimeSeries::new(vec![], 0, 0.0)], vec![]);
        assert!(!payload.is_empty());
        assert_eq!(payload.metrics().len(), 1);
        assert!(payload.streams().is_empty());
    }
}
