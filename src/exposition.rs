//! Decoder for the plain-text metric exposition format
//!
//! Parses a block of exposition text into metric families. Families keep the
//! order in which they first appear; samples for a family that show up later
//! in the block are merged into it.

use crate::errors::{Result, ScraperError};
use crate::telemetry::LabelPair;
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Untyped,
    Summary,
    Histogram,
}

impl MetricType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(MetricType::Counter),
            "gauge" => Some(MetricType::Gauge),
            "untyped" => Some(MetricType::Untyped),
            "summary" => Some(MetricType::Summary),
            "histogram" => Some(MetricType::Histogram),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Counter => write!(f, "counter"),
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::Untyped => write!(f, "untyped"),
            MetricType::Summary => write!(f, "summary"),
            MetricType::Histogram => write!(f, "histogram"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Summary {
        sample_sum: f64,
        sample_count: f64,
        quantiles: Vec<Quantile>,
    },
    Histogram {
        sample_sum: f64,
        sample_count: f64,
        buckets: Vec<Bucket>,
    },
}

/// One labelled instance within a family
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub labels: Vec<LabelPair>,
    pub value: MetricValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

#[derive(Debug)]
struct FamilyBuilder {
    name: String,
    help: Option<String>,
    metric_type: Option<MetricType>,
    metrics: Vec<Metric>,
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: None,
            metric_type: None,
            metrics: Vec::new(),
        }
    }

    fn build(self) -> MetricFamily {
        MetricFamily {
            name: self.name,
            help: self.help,
            metric_type: self.metric_type.unwrap_or(MetricType::Untyped),
            metrics: self.metrics,
        }
    }
}

/// Which part of a summary or histogram a sample line carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SampleRole {
    Plain,
    Sum,
    Count,
    Bucket,
}

struct Sample {
    name: String,
    labels: Vec<LabelPair>,
    value: f64,
}

/// Parse a text exposition block into metric families.
pub fn parse_text(input: &[u8]) -> Result<Vec<MetricFamily>> {
    let text = std::str::from_utf8(input)
        .map_err(|e| ScraperError::decode(0, format!("invalid UTF-8: {}", e)))?;

    let mut parser = Parser::default();
    for (index, line) in text.lines().enumerate() {
        parser.line(index + 1, line)?;
    }

    Ok(parser.families.into_iter().map(FamilyBuilder::build).collect())
}

#[derive(Default)]
struct Parser {
    families: Vec<FamilyBuilder>,
    by_name: HashMap<String, usize>,
}

impl Parser {
    fn line(&mut self, lineno: usize, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(comment) = line.strip_prefix('#') {
            return self.comment(lineno, comment);
        }

        let sample = parse_sample(lineno, line)?;
        self.sample(lineno, sample)
    }

    fn family_mut(&mut self, name: &str) -> &mut FamilyBuilder {
        let index = match self.by_name.get(name) {
            Some(&index) => index,
            None => {
                self.families.push(FamilyBuilder::new(name));
                self.by_name.insert(name.to_string(), self.families.len() - 1);
                self.families.len() - 1
            }
        };
        &mut self.families[index]
    }

    fn comment(&mut self, lineno: usize, comment: &str) -> Result<()> {
        let comment = comment.trim_start();
        let (keyword, rest) = split_token(comment);

        match keyword {
            "HELP" => {
                let (name, text) = split_token(rest);
                if !is_metric_name(name) {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("invalid metric name {:?} in HELP comment", name),
                    ));
                }
                let family = self.family_mut(name);
                if family.help.is_some() {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("second HELP line for metric name {:?}", name),
                    ));
                }
                family.help = Some(unescape_help(text));
            }
            "TYPE" => {
                let (name, rest) = split_token(rest);
                if !is_metric_name(name) {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("invalid metric name {:?} in TYPE comment", name),
                    ));
                }
                let (type_name, trailing) = split_token(rest);
                let metric_type = MetricType::parse(type_name).ok_or_else(|| {
                    ScraperError::decode(lineno, format!("unknown metric type {:?}", type_name))
                })?;
                if !trailing.is_empty() {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("unexpected text after metric type: {:?}", trailing),
                    ));
                }

                let family = self.family_mut(name);
                if family.metric_type.is_some() {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("second TYPE line for metric name {:?}", name),
                    ));
                }
                if !family.metrics.is_empty() {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("TYPE line for {:?} appears after its samples", name),
                    ));
                }
                family.metric_type = Some(metric_type);
            }
            // Any other comment is ignored.
            _ => {}
        }

        Ok(())
    }

    /// Find the family a sample belongs to, honouring summary and histogram
    /// suffixes.
    fn resolve(&self, name: &str) -> Option<(usize, SampleRole)> {
        for (suffix, role) in [
            ("_bucket", SampleRole::Bucket),
            ("_count", SampleRole::Count),
            ("_sum", SampleRole::Sum),
        ] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            let Some(&index) = self.by_name.get(base) else {
                continue;
            };
            match (self.families[index].metric_type, role) {
                (Some(MetricType::Histogram), _) => return Some((index, role)),
                (Some(MetricType::Summary), SampleRole::Count | SampleRole::Sum) => {
                    return Some((index, role));
                }
                _ => {}
            }
        }

        self.by_name
            .get(name)
            .map(|&index| (index, SampleRole::Plain))
    }

    fn sample(&mut self, lineno: usize, sample: Sample) -> Result<()> {
        let (index, role) = match self.resolve(&sample.name) {
            Some(found) => found,
            None => {
                self.family_mut(&sample.name);
                (self.by_name[&sample.name], SampleRole::Plain)
            }
        };

        let family = &mut self.families[index];
        let metric_type = *family.metric_type.get_or_insert(MetricType::Untyped);

        match metric_type {
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => {
                let value = match metric_type {
                    MetricType::Counter => MetricValue::Counter(sample.value),
                    MetricType::Gauge => MetricValue::Gauge(sample.value),
                    _ => MetricValue::Untyped(sample.value),
                };
                family.metrics.push(Metric {
                    labels: sample.labels,
                    value,
                });
            }
            MetricType::Summary => {
                let (labels, quantile) = match role {
                    SampleRole::Plain => {
                        let (labels, q) = take_label(sample.labels, "quantile");
                        let q = q.ok_or_else(|| {
                            ScraperError::decode(lineno, "summary sample without quantile label")
                        })?;
                        (labels, Some(parse_bound(lineno, "quantile", &q)?))
                    }
                    _ => (sample.labels, None),
                };

                let metric = find_or_insert(&mut family.metrics, labels, || MetricValue::Summary {
                    sample_sum: 0.0,
                    sample_count: 0.0,
                    quantiles: Vec::new(),
                });
                if let MetricValue::Summary {
                    sample_sum,
                    sample_count,
                    quantiles,
                } = &mut metric.value
                {
                    match role {
                        SampleRole::Sum => *sample_sum = sample.value,
                        SampleRole::Count => *sample_count = sample.value,
                        _ => quantiles.push(Quantile {
                            quantile: quantile.unwrap_or_default(),
                            value: sample.value,
                        }),
                    }
                }
            }
            MetricType::Histogram => {
                let (labels, bound) = match role {
                    SampleRole::Bucket => {
                        let (labels, le) = take_label(sample.labels, "le");
                        let le = le.ok_or_else(|| {
                            ScraperError::decode(lineno, "histogram bucket without le label")
                        })?;
                        (labels, Some(parse_bound(lineno, "le", &le)?))
                    }
                    SampleRole::Plain => {
                        return Err(ScraperError::decode(
                            lineno,
                            format!(
                                "histogram sample {:?} lacks a _bucket, _sum or _count suffix",
                                sample.name
                            ),
                        ));
                    }
                    _ => (sample.labels, None),
                };

                let metric =
                    find_or_insert(&mut family.metrics, labels, || MetricValue::Histogram {
                        sample_sum: 0.0,
                        sample_count: 0.0,
                        buckets: Vec::new(),
                    });
                if let MetricValue::Histogram {
                    sample_sum,
                    sample_count,
                    buckets,
                } = &mut metric.value
                {
                    match role {
                        SampleRole::Sum => *sample_sum = sample.value,
                        SampleRole::Count => *sample_count = sample.value,
                        _ => buckets.push(Bucket {
                            upper_bound: bound.unwrap_or(f64::INFINITY),
                            cumulative_count: sample.value,
                        }),
                    }
                }
            }
        }

        Ok(())
    }
}

/// Instances of a summary or histogram are identified by their label set,
/// regardless of label order.
fn find_or_insert<F>(metrics: &mut Vec<Metric>, labels: Vec<LabelPair>, init: F) -> &mut Metric
where
    F: FnOnce() -> MetricValue,
{
    let position = metrics.iter().position(|m| same_labels(&m.labels, &labels));
    match position {
        Some(index) => &mut metrics[index],
        None => {
            metrics.push(Metric {
                labels,
                value: init(),
            });
            let last = metrics.len() - 1;
            &mut metrics[last]
        }
    }
}

fn same_labels(a: &[LabelPair], b: &[LabelPair]) -> bool {
    a.len() == b.len() && a.iter().all(|pair| b.contains(pair))
}

fn take_label(labels: Vec<LabelPair>, name: &str) -> (Vec<LabelPair>, Option<String>) {
    let mut value = None;
    let rest = labels
        .into_iter()
        .filter_map(|pair| {
            if pair.name == name {
                value = Some(pair.value);
                None
            } else {
                Some(pair)
            }
        })
        .collect();
    (rest, value)
}

fn parse_bound(lineno: usize, label: &str, value: &str) -> Result<f64> {
    parse_float(value).ok_or_else(|| {
        ScraperError::decode(lineno, format!("invalid {} label value {:?}", label, value))
    })
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(|c: char| c == ' ' || c == '\t') {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse `name{label="value",...} value [timestamp]`.
fn parse_sample(lineno: usize, line: &str) -> Result<Sample> {
    let name_end = line
        .find(|c: char| c == '{' || c == ' ' || c == '\t')
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_metric_name(name) {
        return Err(ScraperError::decode(
            lineno,
            format!("invalid metric name {:?}", name),
        ));
    }

    let mut rest = line[name_end..].trim_start();
    let mut labels = Vec::new();

    if let Some(inner) = rest.strip_prefix('{') {
        let (parsed, remainder) = parse_labels(lineno, inner)?;
        labels = parsed;
        rest = remainder.trim_start();
    }

    let (value_token, rest) = split_token(rest);
    if value_token.is_empty() {
        return Err(ScraperError::decode(lineno, format!("missing value for {:?}", name)));
    }
    let value = parse_float(value_token).ok_or_else(|| {
        ScraperError::decode(lineno, format!("expected float as value, got {:?}", value_token))
    })?;

    let (timestamp, trailing) = split_token(rest);
    if !timestamp.is_empty() && timestamp.parse::<i64>().is_err() {
        return Err(ScraperError::decode(
            lineno,
            format!("expected integer as timestamp, got {:?}", timestamp),
        ));
    }
    if !trailing.is_empty() {
        return Err(ScraperError::decode(
            lineno,
            format!("unexpected text after timestamp: {:?}", trailing),
        ));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse the inside of a label block, returning the labels and whatever
/// follows the closing brace.
fn parse_labels(lineno: usize, input: &str) -> Result<(Vec<LabelPair>, &str)> {
    let mut labels: Vec<LabelPair> = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .ok_or_else(|| ScraperError::decode(lineno, "unterminated label set"))?;
        let name = &rest[..name_end];
        if !is_label_name(name) {
            return Err(ScraperError::decode(
                lineno,
                format!("invalid label name {:?}", name),
            ));
        }
        if labels.iter().any(|l| l.name == name) {
            return Err(ScraperError::decode(
                lineno,
                format!("duplicate label name {:?}", name),
            ));
        }

        rest = rest[name_end..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| ScraperError::decode(lineno, format!("expected '=' after label {:?}", name)))?
            .trim_start();
        rest = rest.strip_prefix('"').ok_or_else(|| {
            ScraperError::decode(lineno, format!("expected '\"' to open value of label {:?}", name))
        })?;

        let (value, after) = parse_label_value(lineno, rest)?;
        labels.push(LabelPair::new(name, value));

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(ScraperError::decode(
                lineno,
                "expected ',' or '}' after label value",
            ));
        }
    }
}

/// Read an escaped label value up to its closing quote.
fn parse_label_value(lineno: usize, input: &str) -> Result<(String, &str)> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[i + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => {
                    return Err(ScraperError::decode(
                        lineno,
                        format!("invalid escape sequence '\\{}' in label value", other),
                    ));
                }
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err(ScraperError::decode(lineno, "unterminated label value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<MetricFamily> {
        parse_text(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_simple_untyped_and_gauge() {
        let families = parse(
            "# HELP probe_success Displays whether or not the probe was a success\n\
             # TYPE probe_success gauge\n\
             probe_success 1\n\
             probe_duration_seconds 0.5\n",
        );

        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name, "probe_success");
        assert_eq!(families[0].metric_type, MetricType::Gauge);
        assert_eq!(
            families[0].help.as_deref(),
            Some("Displays whether or not the probe was a success")
        );
        assert_eq!(families[0].metrics[0].value, MetricValue::Gauge(1.0));

        assert_eq!(families[1].name, "probe_duration_seconds");
        assert_eq!(families[1].metric_type, MetricType::Untyped);
        assert_eq!(families[1].metrics[0].value, MetricValue::Untyped(0.5));
    }

    #[test]
    fn test_labels_and_escapes() {
        let families = parse(
            "# TYPE probe_http_duration_seconds gauge\n\
             probe_http_duration_seconds{phase=\"connect\", path=\"a\\\"b\\\\c\\nd\",} 0.01 1588334400000\n",
        );

        let metric = &families[0].metrics[0];
        assert_eq!(metric.labels[0], LabelPair::new("phase", "connect"));
        assert_eq!(metric.labels[1], LabelPair::new("path", "a\"b\\c\nd"));
        assert_eq!(metric.value, MetricValue::Gauge(0.01));
    }

    #[test]
    fn test_special_values() {
        let families = parse("a +Inf\nb -Inf\nc NaN\n");
        assert_eq!(families[0].metrics[0].value, MetricValue::Untyped(f64::INFINITY));
        assert_eq!(families[1].metrics[0].value, MetricValue::Untyped(f64::NEG_INFINITY));
        match families[2].metrics[0].value {
            MetricValue::Untyped(v) => assert!(v.is_nan()),
            ref other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_summary() {
        let families = parse(
            "# TYPE rpc_duration_seconds summary\n\
             rpc_duration_seconds{service=\"a\",quantile=\"0.5\"} 0.2\n\
             rpc_duration_seconds{service=\"a\",quantile=\"0.99\"} 0.9\n\
             rpc_duration_seconds_sum{service=\"a\"} 17\n\
             rpc_duration_seconds_count{service=\"a\"} 42\n",
        );

        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.metric_type, MetricType::Summary);
        assert_eq!(family.metrics.len(), 1);
        assert_eq!(family.metrics[0].labels, vec![LabelPair::new("service", "a")]);
        assert_eq!(
            family.metrics[0].value,
            MetricValue::Summary {
                sample_sum: 17.0,
                sample_count: 42.0,
                quantiles: vec![
                    Quantile { quantile: 0.5, value: 0.2 },
                    Quantile { quantile: 0.99, value: 0.9 },
                ],
            }
        );
    }

    #[test]
    fn test_histogram_groups_instances_by_labels() {
        let families = parse(
            "# TYPE probe_dns_lookup histogram\n\
             probe_dns_lookup_bucket{server=\"a\",le=\"0.1\"} 1\n\
             probe_dns_lookup_bucket{le=\"0.1\",server=\"b\"} 3\n\
             probe_dns_lookup_bucket{server=\"a\",le=\"+Inf\"} 2\n\
             probe_dns_lookup_sum{server=\"a\"} 0.3\n\
             probe_dns_lookup_count{server=\"a\"} 2\n",
        );

        let family = &families[0];
        assert_eq!(family.metrics.len(), 2);
        match &family.metrics[0].value {
            MetricValue::Histogram {
                sample_sum,
                sample_count,
                buckets,
            } => {
                assert_eq!(*sample_sum, 0.3);
                assert_eq!(*sample_count, 2.0);
                assert_eq!(buckets.len(), 2);
                assert_eq!(buckets[1].upper_bound, f64::INFINITY);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_suffix_without_typed_parent_is_its_own_family() {
        let families = parse("# TYPE x counter\nx 1\nx_sum 2\n");
        assert_eq!(families.len(), 2);
        assert_eq!(families[1].name, "x_sum");
        assert_eq!(families[1].metric_type, MetricType::Untyped);
    }

    #[test]
    fn test_non_consecutive_samples_merge() {
        let families = parse("a 1\nb 2\na{x=\"y\"} 3\n");
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].metrics.len(), 2);
    }

    #[test]
    fn test_other_comments_and_blank_lines_are_ignored() {
        let families = parse("# just a comment\n\n   \na 1\n");
        assert_eq!(families.len(), 1);
    }

    #[test]
    fn test_grammar_errors() {
        let cases = [
            "a not-a-number\n",
            "a\n",
            "1a 1\n",
            "a{b=\"c\" 1\n",
            "a{b=c} 1\n",
            "a{b=\"c\",b=\"d\"} 1\n",
            "a{b=\"\\q\"} 1\n",
            "a 1 notatimestamp\n",
            "a 1 123 extra\n",
            "# TYPE a bogus\n",
            "# TYPE a gauge\n# TYPE a gauge\n",
            "# HELP a one\n# HELP a two\n",
            "a 1\n# TYPE a gauge\n",
            "# TYPE s summary\ns 1\n",
            "# TYPE h histogram\nh_bucket 1\n",
            "# TYPE h histogram\nh 1\n",
            "# TYPE h histogram\nh_bucket{le=\"x\"} 1\n",
        ];

        for case in cases {
            let err = parse_text(case.as_bytes());
            assert!(
                matches!(err, Err(ScraperError::Decode { .. })),
                "expected decode error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_error_reports_line_number() {
        match parse_text(b"a 1\nb 2\nc x\n") {
            Err(ScraperError::Decode { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(parse_text(&[b'a', b' ', 0xff]).is_err());
    }
}
